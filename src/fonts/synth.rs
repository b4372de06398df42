//! Minimal TrueType writer.
//!
//! Produces small but complete `glyf` fonts (head, hhea, maxp, hmtx, loca, glyf,
//! cmap) from integer contours. Used to generate fixture fonts for tests and
//! benchmarks without shipping binary assets, and handy for reproducing a
//! customer's obfuscation font from dumped coordinates.
//!
//! # Example
//!
//! ```
//! use glyph_match::fonts::synth::SyntheticFont;
//!
//! let mut font = SyntheticFont::new(1000);
//! let square = font.add_glyph(&[vec![(0, 0, true), (0, 500, true), (500, 500, true), (500, 0, true)]]);
//! font.map_char('\u{E001}', square);
//! let bytes = font.build();
//! assert!(glyph_match::fonts::parse_font(&bytes).is_ok());
//! ```

use std::collections::BTreeMap;

/// A point as `(x, y, on_curve)` in font units.
pub type SynthPoint = (i16, i16, bool);

/// Reference to another glyph inside a composite glyph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    /// Referenced glyph
    pub glyph_id: u16,
    /// Horizontal offset
    pub dx: i16,
    /// Vertical offset
    pub dy: i16,
    /// Optional uniform scale (stored as F2Dot14, so below 2.0)
    pub scale: Option<f32>,
}

#[derive(Debug, Clone)]
enum SynthGlyph {
    Empty,
    Simple(Vec<Vec<SynthPoint>>),
    Composite(Vec<Component>),
}

const ON_CURVE: u8 = 0x01;
const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
const ARGS_ARE_XY_VALUES: u16 = 0x0002;
const WE_HAVE_A_SCALE: u16 = 0x0008;
const MORE_COMPONENTS: u16 = 0x0020;

/// Builder for a synthetic TrueType font. Glyph 0 is an empty `.notdef`.
#[derive(Debug, Clone)]
pub struct SyntheticFont {
    units_per_em: u16,
    glyphs: Vec<SynthGlyph>,
    cmap: BTreeMap<u32, u16>,
}

impl SyntheticFont {
    /// Create a font with the given em size (16..=16384).
    pub fn new(units_per_em: u16) -> Self {
        Self {
            units_per_em,
            glyphs: vec![SynthGlyph::Empty],
            cmap: BTreeMap::new(),
        }
    }

    /// Add a simple glyph and return its id.
    pub fn add_glyph(&mut self, contours: &[Vec<SynthPoint>]) -> u16 {
        self.push(SynthGlyph::Simple(contours.to_vec()))
    }

    /// Add a glyph without outline (e.g. a space) and return its id.
    pub fn add_empty_glyph(&mut self) -> u16 {
        self.push(SynthGlyph::Empty)
    }

    /// Add a composite glyph and return its id.
    pub fn add_composite(&mut self, components: &[Component]) -> u16 {
        self.push(SynthGlyph::Composite(components.to_vec()))
    }

    /// Map a character to a glyph in the font's cmap.
    pub fn map_char(&mut self, ch: char, glyph_id: u16) -> &mut Self {
        self.cmap.insert(ch as u32, glyph_id);
        self
    }

    /// Number of glyphs including `.notdef`.
    pub fn num_glyphs(&self) -> u16 {
        self.glyphs.len() as u16
    }

    fn push(&mut self, glyph: SynthGlyph) -> u16 {
        self.glyphs.push(glyph);
        (self.glyphs.len() - 1) as u16
    }

    /// Serialize the font.
    pub fn build(&self) -> Vec<u8> {
        let mut glyf = Vec::new();
        let mut loca = Vec::new();
        let mut bbox: Option<(i16, i16, i16, i16)> = None;

        for glyph in &self.glyphs {
            put_u32(&mut loca, glyf.len() as u32);
            match glyph {
                SynthGlyph::Empty => {},
                SynthGlyph::Simple(contours) => {
                    if let Some(b) = encode_simple(&mut glyf, contours) {
                        bbox = Some(match bbox {
                            None => b,
                            Some(g) => (g.0.min(b.0), g.1.min(b.1), g.2.max(b.2), g.3.max(b.3)),
                        });
                    }
                },
                SynthGlyph::Composite(components) => encode_composite(&mut glyf, components),
            }
            while glyf.len() % 4 != 0 {
                glyf.push(0);
            }
        }
        put_u32(&mut loca, glyf.len() as u32);

        let bbox = bbox.unwrap_or((0, 0, 0, 0));
        let tables: Vec<([u8; 4], Vec<u8>)> = vec![
            (*b"cmap", self.cmap_table()),
            (*b"glyf", glyf),
            (*b"head", self.head_table(bbox)),
            (*b"hhea", self.hhea_table()),
            (*b"hmtx", self.hmtx_table()),
            (*b"loca", loca),
            (*b"maxp", self.maxp_table()),
        ];
        write_sfnt(&tables)
    }

    fn head_table(&self, bbox: (i16, i16, i16, i16)) -> Vec<u8> {
        let mut t = Vec::with_capacity(54);
        put_u32(&mut t, 0x0001_0000); // version
        put_u32(&mut t, 0x0001_0000); // fontRevision
        put_u32(&mut t, 0); // checkSumAdjustment
        put_u32(&mut t, 0x5F0F_3CF5); // magicNumber
        put_u16(&mut t, 0); // flags
        put_u16(&mut t, self.units_per_em);
        t.extend_from_slice(&[0u8; 16]); // created, modified
        put_i16(&mut t, bbox.0);
        put_i16(&mut t, bbox.1);
        put_i16(&mut t, bbox.2);
        put_i16(&mut t, bbox.3);
        put_u16(&mut t, 0); // macStyle
        put_u16(&mut t, 8); // lowestRecPPEM
        put_i16(&mut t, 2); // fontDirectionHint
        put_i16(&mut t, 1); // indexToLocFormat: long
        put_i16(&mut t, 0); // glyphDataFormat
        t
    }

    fn hhea_table(&self) -> Vec<u8> {
        let em = self.units_per_em as i16;
        let mut t = Vec::with_capacity(36);
        put_u32(&mut t, 0x0001_0000);
        put_i16(&mut t, em - em / 5); // ascender
        put_i16(&mut t, -(em / 5)); // descender
        put_i16(&mut t, 0); // lineGap
        put_u16(&mut t, self.units_per_em); // advanceWidthMax
        put_i16(&mut t, 0); // minLeftSideBearing
        put_i16(&mut t, 0); // minRightSideBearing
        put_i16(&mut t, em); // xMaxExtent
        put_i16(&mut t, 1); // caretSlopeRise
        put_i16(&mut t, 0); // caretSlopeRun
        put_i16(&mut t, 0); // caretOffset
        t.extend_from_slice(&[0u8; 8]); // reserved
        put_i16(&mut t, 0); // metricDataFormat
        put_u16(&mut t, self.num_glyphs());
        t
    }

    fn hmtx_table(&self) -> Vec<u8> {
        let mut t = Vec::with_capacity(self.glyphs.len() * 4);
        for _ in &self.glyphs {
            put_u16(&mut t, self.units_per_em);
            put_i16(&mut t, 0);
        }
        t
    }

    fn maxp_table(&self) -> Vec<u8> {
        let mut t = Vec::with_capacity(6);
        put_u32(&mut t, 0x0000_5000);
        put_u16(&mut t, self.num_glyphs());
        t
    }

    /// Windows full-repertoire (3, 10) format 12 subtable.
    fn cmap_table(&self) -> Vec<u8> {
        let mut t = Vec::new();
        put_u16(&mut t, 0); // version
        put_u16(&mut t, 1); // numTables
        put_u16(&mut t, 3); // platformID
        put_u16(&mut t, 10); // encodingID
        put_u32(&mut t, 12); // subtable offset

        put_u16(&mut t, 12); // format
        put_u16(&mut t, 0); // reserved
        put_u32(&mut t, 16 + 12 * self.cmap.len() as u32);
        put_u32(&mut t, 0); // language
        put_u32(&mut t, self.cmap.len() as u32);
        for (&code_point, &glyph_id) in &self.cmap {
            put_u32(&mut t, code_point);
            put_u32(&mut t, code_point);
            put_u32(&mut t, glyph_id as u32);
        }
        t
    }
}

fn encode_simple(out: &mut Vec<u8>, contours: &[Vec<SynthPoint>]) -> Option<(i16, i16, i16, i16)> {
    let points: Vec<SynthPoint> = contours.iter().flatten().copied().collect();
    let first = points.first()?;
    let bbox = points.iter().fold((first.0, first.1, first.0, first.1), |b, p| {
        (b.0.min(p.0), b.1.min(p.1), b.2.max(p.0), b.3.max(p.1))
    });

    put_i16(out, contours.len() as i16);
    put_i16(out, bbox.0);
    put_i16(out, bbox.1);
    put_i16(out, bbox.2);
    put_i16(out, bbox.3);

    let mut end = 0usize;
    for contour in contours {
        end += contour.len();
        put_u16(out, (end - 1) as u16);
    }
    put_u16(out, 0); // instructionLength

    for p in &points {
        out.push(if p.2 { ON_CURVE } else { 0 });
    }
    let mut prev = 0i32;
    for p in &points {
        put_i16(out, (p.0 as i32 - prev) as i16);
        prev = p.0 as i32;
    }
    prev = 0;
    for p in &points {
        put_i16(out, (p.1 as i32 - prev) as i16);
        prev = p.1 as i32;
    }
    Some(bbox)
}

fn encode_composite(out: &mut Vec<u8>, components: &[Component]) {
    put_i16(out, -1);
    out.extend_from_slice(&[0u8; 8]); // bbox is recomputed by readers
    for (i, c) in components.iter().enumerate() {
        let mut flags = ARG_1_AND_2_ARE_WORDS | ARGS_ARE_XY_VALUES;
        if c.scale.is_some() {
            flags |= WE_HAVE_A_SCALE;
        }
        if i + 1 < components.len() {
            flags |= MORE_COMPONENTS;
        }
        put_u16(out, flags);
        put_u16(out, c.glyph_id);
        put_i16(out, c.dx);
        put_i16(out, c.dy);
        if let Some(scale) = c.scale {
            put_i16(out, (scale * 16384.0).round() as i16);
        }
    }
}

fn write_sfnt(tables: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
    let num_tables = tables.len() as u16;
    let entry_selector = 15 - num_tables.max(1).leading_zeros() as u16;
    let search_range = (1u16 << entry_selector) * 16;

    let mut out = Vec::new();
    put_u32(&mut out, 0x0001_0000);
    put_u16(&mut out, num_tables);
    put_u16(&mut out, search_range);
    put_u16(&mut out, entry_selector);
    put_u16(&mut out, num_tables * 16 - search_range);

    let mut offset = 12 + tables.len() * 16;
    for (tag, data) in tables {
        out.extend_from_slice(tag);
        put_u32(&mut out, checksum(data));
        put_u32(&mut out, offset as u32);
        put_u32(&mut out, data.len() as u32);
        offset += padded_len(data.len());
    }
    for (_, data) in tables {
        out.extend_from_slice(data);
        out.resize(out.len() + padded_len(data.len()) - data.len(), 0);
    }
    out
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn checksum(data: &[u8]) -> u32 {
    data.chunks(4).fold(0u32, |sum, chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum.wrapping_add(u32::from_be_bytes(word))
    })
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_i16(out: &mut Vec<u8>, v: i16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}
