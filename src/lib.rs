// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::needless_range_loop)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # Glyph Match
//!
//! Recover the real characters behind obfuscation fonts: web fonts generated per
//! page whose glyph shapes are shuffled across arbitrary code points.
//!
//! ## How it works
//!
//! - **Parsing**: TrueType, OpenType/CFF and collection fonts are decoded into
//!   flat glyph outlines ([`fonts`]); truncated binaries are rejected whole.
//! - **Signatures**: each outline is reduced to a translation-, scale-, start
//!   point- and winding-invariant key ([`signature`]).
//! - **Fast path**: the key is looked up in the coordinate table, the durable
//!   signature → character mapping ([`table`]).
//! - **Slow path**: on request, a miss is matched by Hausdorff distance against
//!   reference fonts such as Source Han Sans ([`matcher`]). Confident matches
//!   are written back to the table.
//!
//! Parsed fonts are memoised by content fingerprint ([`cache`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! use glyph_match::{Engine, EngineConfig, SlowMode, GuessRange};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::open(
//!     EngineConfig::new()
//!         .with_table_path("instance/coor_table.json")
//!         .with_bundled_table_path("assets/coor_table.json")
//!         .with_reference_font("assets/SourceHanSansSC-Normal.otf"),
//! )?;
//!
//! let font = std::fs::read("obfuscated.ttf")?;
//! let report = engine.identify_font(&font, SlowMode::Enabled(GuessRange::cjk_unified()))?;
//! for (fake, real) in report.mapping() {
//!     println!("{} -> {}", fake, real);
//! }
//! println!("slow path: {:?}", report.slow_path_time);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Error handling
pub mod error;

// Configuration
pub mod config;

// Font parsing
pub mod fonts;

// Shape keys and the learned table
pub mod signature;
pub mod table;

// Matching
pub mod engine;
pub mod matcher;

// Storage
pub mod cache;
pub mod persist;

pub use config::EngineConfig;
pub use engine::{CharMatch, Engine, FontReport, SlowMode};
pub use error::{Error, Result};
pub use matcher::{GuessRange, MatchResult, Provenance, SlowMatch, UnresolvedReason};
pub use signature::ShapeSignature;
pub use table::{CoorTableEntry, CoordinateTable, MappingConflict, ReconcileReport};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
