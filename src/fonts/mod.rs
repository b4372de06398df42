//! Font binary handling.
//!
//! This module validates sfnt containers, extracts flat glyph outlines and the
//! font's own cmap, and can write small synthetic TrueType fonts for fixtures.

pub mod outline;
pub mod sfnt;
pub mod synth;
pub mod truetype_parser;

pub use outline::{Contour, GlyphOutline, OutlinePoint, PointKind};
pub use sfnt::OutlineFormat;
pub use truetype_parser::{parse_font, parse_glyphs, ParsedFont};
