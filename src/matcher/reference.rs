//! Reference font index.
//!
//! A [`ReferenceFontIndex`] holds every glyph of a trusted standard font that
//! the font's own cmap assigns to at least one character. It is the search
//! space of the slow path and is built once per reference font.

use std::collections::{BTreeSet, HashMap};
use std::ops::RangeInclusive;

use crate::error::Result;
use crate::fonts::truetype_parser::{parse_font, ParsedFont};
use crate::signature::{NormalizedShape, ShapeSignature};

use super::geometry::{Bounds, SampledShape};

/// One searchable reference glyph.
#[derive(Debug, Clone)]
pub struct ReferenceGlyph {
    /// Glyph id in the reference font
    pub glyph_id: u16,
    /// Characters the reference font maps to this glyph, ascending
    pub chars: Vec<char>,
    /// Signature of the outline
    pub signature: ShapeSignature,
    samples: SampledShape,
    bounds: Bounds,
}

impl ReferenceGlyph {
    /// Outline samples, taken once when the index is built.
    pub fn samples(&self) -> &SampledShape {
        &self.samples
    }

    /// Bounds of the outline samples.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// First character of this glyph allowed by `range`.
    pub fn character_in(&self, range: &GuessRange) -> Option<char> {
        self.chars.iter().copied().find(|&c| range.contains(c))
    }
}

/// Signatures and outlines of one reference font.
#[derive(Debug, Clone)]
pub struct ReferenceFontIndex {
    name: String,
    fingerprint: String,
    sample_step: f64,
    glyphs: Vec<ReferenceGlyph>,
    by_signature: HashMap<ShapeSignature, usize>,
}

impl ReferenceFontIndex {
    /// Parse a reference font and index it.
    ///
    /// # Arguments
    /// * `name` - Label used in logs
    /// * `data` - Font bytes
    /// * `sample_step` - Sampling step the index will be searched with
    pub fn build(name: impl Into<String>, data: &[u8], sample_step: f64) -> Result<Self> {
        let parsed = parse_font(data)?;
        Ok(Self::from_parsed(name, &parsed, sample_step))
    }

    /// Index an already parsed font.
    pub fn from_parsed(name: impl Into<String>, font: &ParsedFont, sample_step: f64) -> Self {
        let name = name.into();
        let mut chars_by_glyph: HashMap<u16, Vec<char>> = HashMap::new();
        for &(cp, gid) in &font.cmap {
            if let Some(c) = char::from_u32(cp) {
                chars_by_glyph.entry(gid).or_default().push(c);
            }
        }

        let mut glyphs = Vec::new();
        let mut by_signature = HashMap::new();
        for outline in &font.glyphs {
            let Some(chars) = chars_by_glyph.remove(&outline.glyph_id) else {
                continue;
            };
            let shape = NormalizedShape::from_outline(outline);
            let samples = SampledShape::from_shape(&shape, sample_step);
            let Some(bounds) = samples.bounds() else {
                continue;
            };
            let signature = shape.signature();
            // Earlier glyph ids keep the exact-hit slot for shared outlines.
            by_signature.entry(signature.clone()).or_insert(glyphs.len());
            glyphs.push(ReferenceGlyph {
                glyph_id: outline.glyph_id,
                chars,
                signature,
                samples,
                bounds,
            });
        }

        log::info!(
            "Indexed reference font {}: {} of {} glyphs searchable",
            name,
            glyphs.len(),
            font.num_glyphs
        );

        Self {
            name,
            fingerprint: font.fingerprint.clone(),
            sample_step,
            glyphs,
            by_signature,
        }
    }

    /// Label of the font.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content fingerprint of the font bytes.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Sampling step the bounds were computed with.
    pub fn sample_step(&self) -> f64 {
        self.sample_step
    }

    /// Searchable glyphs, in glyph id order.
    pub fn glyphs(&self) -> &[ReferenceGlyph] {
        &self.glyphs
    }

    /// Number of searchable glyphs.
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    /// True if no glyph is searchable.
    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Glyph whose signature equals `signature`.
    pub fn exact(&self, signature: &ShapeSignature) -> Option<&ReferenceGlyph> {
        self.by_signature.get(signature).map(|&i| &self.glyphs[i])
    }
}

/// Set of characters the slow path may answer with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuessRange {
    ranges: Vec<RangeInclusive<char>>,
    chars: BTreeSet<char>,
    unrestricted: bool,
}

impl GuessRange {
    /// Every character.
    pub fn all() -> Self {
        Self {
            unrestricted: true,
            ..Self::default()
        }
    }

    /// Exactly the given characters.
    pub fn from_chars(chars: impl IntoIterator<Item = char>) -> Self {
        Self {
            chars: chars.into_iter().collect(),
            ..Self::default()
        }
    }

    /// CJK Unified Ideographs (U+4E00..=U+9FFF).
    pub fn cjk_unified() -> Self {
        Self::default().with_range('\u{4E00}'..='\u{9FFF}')
    }

    /// Also allow a code point range.
    pub fn with_range(mut self, range: RangeInclusive<char>) -> Self {
        self.ranges.push(range);
        self
    }

    /// Also allow the given characters.
    pub fn with_chars(mut self, chars: impl IntoIterator<Item = char>) -> Self {
        self.chars.extend(chars);
        self
    }

    /// True if `c` may be returned.
    pub fn contains(&self, c: char) -> bool {
        self.unrestricted || self.chars.contains(&c) || self.ranges.iter().any(|r| r.contains(&c))
    }
}
