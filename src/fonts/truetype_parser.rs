//! TrueType/OpenType outline parser.
//!
//! This module wraps the `ttf-parser` crate to extract every glyph's outline
//! plus the code-point mapping the font declares itself.
//!
//! # Supported fonts
//!
//! - Quadratic `glyf` outlines, including composite glyphs (offsets and scale
//!   transforms are applied, the result is a flat contour set)
//! - Cubic `CFF ` and `CFF2` outlines (reference faces such as Source Han Sans)
//! - The first face of a `ttcf` collection
//!
//! WOFF wrappers and bitmap-only fonts are rejected with `UnsupportedFormat`.
//! Structural damage is rejected with `MalformedFont` before any outline is
//! returned, so callers never see a partially decoded font.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ttf_parser::{Face, GlyphId};

use super::outline::{GlyphOutline, OutlineCollector};
use super::sfnt::{GlyfLayout, OutlineFormat, TableDirectory};
use crate::cache::fingerprint;
use crate::error::{Error, Result};

/// Outlines and character mapping extracted from one font binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFont {
    /// SHA-256 of the font bytes (lowercase hex)
    pub fingerprint: String,
    /// Units per em declared in `head`
    pub units_per_em: u16,
    /// Number of glyphs declared in `maxp`
    pub num_glyphs: u16,
    /// Decoded glyphs, sorted by glyph id
    pub glyphs: Vec<GlyphOutline>,
    /// Unicode code point to glyph id, sorted by code point
    pub cmap: Vec<(u32, u16)>,
}

impl ParsedFont {
    /// Outline of a glyph, if it was decoded.
    pub fn glyph(&self, glyph_id: u16) -> Option<&GlyphOutline> {
        self.glyphs
            .binary_search_by_key(&glyph_id, |g| g.glyph_id)
            .ok()
            .map(|i| &self.glyphs[i])
    }

    /// Outline of a glyph, or `GlyphOutOfRange`.
    pub fn require_glyph(&self, glyph_id: u16) -> Result<&GlyphOutline> {
        self.glyph(glyph_id).ok_or(Error::GlyphOutOfRange {
            glyph_id,
            num_glyphs: self.num_glyphs,
        })
    }

    /// Glyph the font maps a code point to.
    pub fn glyph_for_char(&self, code_point: u32) -> Option<u16> {
        self.cmap
            .binary_search_by_key(&code_point, |&(cp, _)| cp)
            .ok()
            .map(|i| self.cmap[i].1)
    }

    /// All characters the font maps to a glyph, in code point order.
    pub fn chars_for_glyph(&self, glyph_id: u16) -> Vec<char> {
        self.cmap
            .iter()
            .filter(|&&(_, gid)| gid == glyph_id)
            .filter_map(|&(cp, _)| char::from_u32(cp))
            .collect()
    }
}

/// Parse every glyph of a font.
///
/// # Arguments
/// * `data` - Raw font file bytes (TTF, OTF or TTC)
///
/// # Errors
/// `MalformedFont` for truncated or inconsistent binaries, `UnsupportedFormat`
/// for WOFF wrappers and fonts without vector outlines.
pub fn parse_font(data: &[u8]) -> Result<ParsedFont> {
    parse_impl(data, None)
}

/// Parse only the requested glyphs.
///
/// The table directory, `loca` and cmap are still validated in full.
pub fn parse_glyphs(data: &[u8], glyph_ids: &[u16]) -> Result<ParsedFont> {
    parse_impl(data, Some(glyph_ids))
}

fn parse_impl(data: &[u8], subset: Option<&[u16]>) -> Result<ParsedFont> {
    if data.is_empty() {
        return Err(Error::MalformedFont("font data is empty".to_string()));
    }

    let dir = TableDirectory::parse(data)?;
    let format = dir.outline_format()?;
    let layout = match format {
        OutlineFormat::TrueType => Some(GlyfLayout::parse(data, &dir)?),
        OutlineFormat::Cff | OutlineFormat::Cff2 => None,
    };

    let face = Face::parse(data, 0).map_err(|e| Error::MalformedFont(e.to_string()))?;
    let num_glyphs = face.number_of_glyphs();

    let glyph_ids: Vec<u16> = match subset {
        Some(ids) => {
            let mut ids = ids.to_vec();
            ids.sort_unstable();
            ids.dedup();
            if let Some(&bad) = ids.iter().find(|&&id| id >= num_glyphs) {
                return Err(Error::GlyphOutOfRange {
                    glyph_id: bad,
                    num_glyphs,
                });
            }
            ids
        },
        None => (0..num_glyphs).collect(),
    };

    let glyphs = glyph_ids
        .iter()
        .map(|&id| extract_outline(&face, layout.as_ref(), data, id))
        .collect::<Result<Vec<_>>>()?;

    let cmap = unicode_map(&face);
    log::debug!(
        "Parsed {:?} font: {} of {} glyphs, {} cmap entries",
        format,
        glyphs.len(),
        num_glyphs,
        cmap.len()
    );

    Ok(ParsedFont {
        fingerprint: fingerprint(data),
        units_per_em: face.units_per_em(),
        num_glyphs,
        glyphs,
        cmap,
    })
}

/// Decode one glyph, telling empty glyphs apart from undecodable ones.
fn extract_outline(
    face: &Face<'_>,
    layout: Option<&GlyfLayout>,
    data: &[u8],
    glyph_id: u16,
) -> Result<GlyphOutline> {
    if let Some(layout) = layout {
        if layout.is_empty_glyph(glyph_id) {
            return Ok(GlyphOutline::empty(glyph_id));
        }
        layout.check_glyph(data, glyph_id)?;
    }

    let mut collector = OutlineCollector::new();
    match face.outline_glyph(GlyphId(glyph_id), &mut collector) {
        Some(_) => Ok(collector.into_outline(glyph_id)),
        None if collector.has_points() => Err(Error::MalformedFont(format!(
            "glyph {} outline could not be decoded",
            glyph_id
        ))),
        None => Ok(GlyphOutline::empty(glyph_id)),
    }
}

/// Build the code point to glyph mapping from all Unicode cmap subtables.
///
/// Earlier subtables win when two subtables disagree. Mappings to `.notdef`
/// are dropped.
fn unicode_map(face: &Face<'_>) -> Vec<(u32, u16)> {
    let mut map = BTreeMap::new();
    if let Some(cmap) = &face.tables().cmap {
        for subtable in cmap.subtables {
            if !subtable.is_unicode() {
                continue;
            }
            subtable.codepoints(|code_point| {
                if let Some(gid) = subtable.glyph_index(code_point) {
                    if gid.0 != 0 {
                        map.entry(code_point).or_insert(gid.0);
                    }
                }
            });
        }
    }
    map.into_iter().collect()
}
