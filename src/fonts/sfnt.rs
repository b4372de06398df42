//! Structural validation of the sfnt container.
//!
//! `ttf-parser` silently ignores table records that point outside the file and
//! reports undecodable glyphs the same way as empty ones. Obfuscation fonts are
//! generated per request and occasionally arrive truncated, so before handing the
//! bytes to `ttf-parser` we check the table directory and the `loca` offsets
//! ourselves and reject anything inconsistent with `MalformedFont`.

use std::ops::Range;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

const TRUETYPE: u32 = 0x0001_0000;
const APPLE_TRUE: u32 = u32::from_be_bytes(*b"true");
const OPENTYPE_CFF: u32 = u32::from_be_bytes(*b"OTTO");
const COLLECTION: u32 = u32::from_be_bytes(*b"ttcf");
const WOFF: u32 = u32::from_be_bytes(*b"wOFF");
const WOFF2: u32 = u32::from_be_bytes(*b"wOF2");

const TABLE_RECORD_SIZE: usize = 16;
const HEAD_INDEX_TO_LOC_OFFSET: usize = 50;

const FLAG_X_SHORT: u8 = 0x02;
const FLAG_Y_SHORT: u8 = 0x04;
const FLAG_REPEAT: u8 = 0x08;
const FLAG_X_SAME_OR_POSITIVE: u8 = 0x10;
const FLAG_Y_SAME_OR_POSITIVE: u8 = 0x20;

/// Outline encoding carried by a font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlineFormat {
    /// Quadratic `glyf`/`loca` outlines
    TrueType,
    /// Cubic `CFF ` outlines
    Cff,
    /// Cubic `CFF2` outlines
    Cff2,
}

/// One table directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRecord {
    /// Four-byte table tag
    pub tag: [u8; 4],
    /// Offset from the start of the file
    pub offset: usize,
    /// Length in bytes
    pub length: usize,
}

/// Validated table directory of the first face in the file.
#[derive(Debug, Clone)]
pub struct TableDirectory {
    tables: Vec<TableRecord>,
}

impl TableDirectory {
    /// Parse and bounds-check the table directory.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let magic = read_u32(data, 0, "sfnt version")?;
        let dir_offset = match magic {
            TRUETYPE | APPLE_TRUE | OPENTYPE_CFF => 0,
            COLLECTION => read_u32(data, 12, "collection face offset")? as usize,
            WOFF | WOFF2 => {
                return Err(Error::UnsupportedFormat(
                    "WOFF/WOFF2 wrapped fonts must be decompressed first".to_string(),
                ))
            },
            other => {
                return Err(Error::MalformedFont(format!(
                    "unrecognised sfnt version 0x{:08X}",
                    other
                )))
            },
        };

        if dir_offset != 0 {
            let face_magic = read_u32(data, dir_offset, "collection face version")?;
            if !matches!(face_magic, TRUETYPE | APPLE_TRUE | OPENTYPE_CFF) {
                return Err(Error::MalformedFont(format!(
                    "collection face has sfnt version 0x{:08X}",
                    face_magic
                )));
            }
        }

        let num_tables = read_u16(data, dir_offset + 4, "numTables")? as usize;
        let records_start = dir_offset + 12;
        let records_end = records_start + num_tables * TABLE_RECORD_SIZE;
        if records_end > data.len() {
            return Err(Error::MalformedFont(format!(
                "table directory declares {} tables but the file ends at byte {}",
                num_tables,
                data.len()
            )));
        }

        let mut tables = Vec::with_capacity(num_tables);
        for i in 0..num_tables {
            let base = records_start + i * TABLE_RECORD_SIZE;
            let mut tag = [0u8; 4];
            tag.copy_from_slice(&data[base..base + 4]);
            let offset = BigEndian::read_u32(&data[base + 8..base + 12]) as usize;
            let length = BigEndian::read_u32(&data[base + 12..base + 16]) as usize;
            let in_range = offset
                .checked_add(length)
                .is_some_and(|end| end <= data.len());
            if !in_range {
                return Err(Error::MalformedFont(format!(
                    "table '{}' at {}..{} lies outside the {}-byte file",
                    tag_name(&tag),
                    offset,
                    offset.saturating_add(length),
                    data.len()
                )));
            }
            tables.push(TableRecord {
                tag,
                offset,
                length,
            });
        }

        Ok(Self { tables })
    }

    /// Find a table record by tag.
    pub fn record(&self, tag: &[u8; 4]) -> Option<&TableRecord> {
        self.tables.iter().find(|t| &t.tag == tag)
    }

    /// Slice a table's bytes out of `data`.
    pub fn table<'a>(&self, data: &'a [u8], tag: &[u8; 4]) -> Option<&'a [u8]> {
        self.record(tag)
            .and_then(|r| data.get(r.offset..r.offset + r.length))
    }

    /// All table records in directory order.
    pub fn records(&self) -> &[TableRecord] {
        &self.tables
    }

    /// Decide which outline encoding the font uses.
    pub fn outline_format(&self) -> Result<OutlineFormat> {
        if self.record(b"glyf").is_some() {
            Ok(OutlineFormat::TrueType)
        } else if self.record(b"CFF ").is_some() {
            Ok(OutlineFormat::Cff)
        } else if self.record(b"CFF2").is_some() {
            Ok(OutlineFormat::Cff2)
        } else {
            Err(Error::UnsupportedFormat(
                "font has no glyf, CFF or CFF2 outlines".to_string(),
            ))
        }
    }
}

/// Byte ranges of every glyph inside the `glyf` table.
#[derive(Debug, Clone)]
pub struct GlyfLayout {
    ranges: Vec<Range<usize>>,
    glyf: Range<usize>,
}

impl GlyfLayout {
    /// Read `head`, `maxp` and `loca` and check every glyph range.
    pub fn parse(data: &[u8], dir: &TableDirectory) -> Result<Self> {
        let head = dir
            .table(data, b"head")
            .ok_or_else(|| Error::MalformedFont("missing 'head' table".to_string()))?;
        let maxp = dir
            .table(data, b"maxp")
            .ok_or_else(|| Error::MalformedFont("missing 'maxp' table".to_string()))?;
        let loca = dir
            .table(data, b"loca")
            .ok_or_else(|| Error::MalformedFont("glyf font without 'loca' table".to_string()))?;
        let glyf = dir
            .record(b"glyf")
            .ok_or_else(|| Error::MalformedFont("missing 'glyf' table".to_string()))?;

        let long_offsets = match read_u16(head, HEAD_INDEX_TO_LOC_OFFSET, "indexToLocFormat")? {
            0 => false,
            1 => true,
            other => {
                return Err(Error::MalformedFont(format!(
                    "invalid indexToLocFormat {}",
                    other
                )))
            },
        };
        let num_glyphs = read_u16(maxp, 4, "numGlyphs")? as usize;

        let entry_size = if long_offsets { 4 } else { 2 };
        let needed = (num_glyphs + 1) * entry_size;
        if loca.len() < needed {
            return Err(Error::MalformedFont(format!(
                "'loca' holds {} bytes, {} glyphs need {}",
                loca.len(),
                num_glyphs,
                needed
            )));
        }

        let offset_at = |i: usize| -> usize {
            if long_offsets {
                BigEndian::read_u32(&loca[i * 4..i * 4 + 4]) as usize
            } else {
                BigEndian::read_u16(&loca[i * 2..i * 2 + 2]) as usize * 2
            }
        };

        let mut ranges = Vec::with_capacity(num_glyphs);
        let mut start = offset_at(0);
        for i in 0..num_glyphs {
            let end = offset_at(i + 1);
            if end < start {
                return Err(Error::MalformedFont(format!(
                    "'loca' offsets decrease at glyph {}",
                    i
                )));
            }
            if end > glyf.length {
                return Err(Error::MalformedFont(format!(
                    "glyph {} ends at {} past the {}-byte 'glyf' table",
                    i, end, glyf.length
                )));
            }
            ranges.push(start..end);
            start = end;
        }

        Ok(Self {
            ranges,
            glyf: glyf.offset..glyf.offset + glyf.length,
        })
    }

    /// Number of glyphs covered by `loca`.
    pub fn num_glyphs(&self) -> usize {
        self.ranges.len()
    }

    /// True if the glyph has no outline data.
    pub fn is_empty_glyph(&self, glyph_id: u16) -> bool {
        self.ranges
            .get(glyph_id as usize)
            .map_or(true, |r| r.is_empty())
    }

    /// Check that a non-empty glyph's data covers everything its header declares.
    ///
    /// For simple glyphs this walks the flag array to compute the exact size of
    /// the coordinate arrays; composite glyphs only get their header checked.
    pub fn check_glyph(&self, data: &[u8], glyph_id: u16) -> Result<()> {
        let Some(range) = self.ranges.get(glyph_id as usize) else {
            return Ok(());
        };
        if range.is_empty() {
            return Ok(());
        }
        let glyph = &data[self.glyf.start + range.start..self.glyf.start + range.end];
        let truncated = || Error::MalformedFont(format!("glyph {} data truncated", glyph_id));

        let contours = read_u16(glyph, 0, "numberOfContours")? as i16;
        if contours <= 0 {
            return if glyph.len() < 10 { Err(truncated()) } else { Ok(()) };
        }

        let contours = contours as usize;
        let end_pts_at = 10 + (contours - 1) * 2;
        let last_end = read_u16(glyph, end_pts_at, "endPtsOfContours").map_err(|_| truncated())?;
        let num_points = last_end as usize + 1;
        let instr_at = 10 + contours * 2;
        let instr_len = read_u16(glyph, instr_at, "instructionLength").map_err(|_| truncated())?;

        let mut pos = instr_at + 2 + instr_len as usize;
        let mut coord_bytes = 0usize;
        let mut seen = 0usize;
        while seen < num_points {
            let flag = *glyph.get(pos).ok_or_else(truncated)?;
            pos += 1;
            let mut repeat = 1usize;
            if flag & FLAG_REPEAT != 0 {
                repeat += *glyph.get(pos).ok_or_else(truncated)? as usize;
                pos += 1;
            }
            let x = if flag & FLAG_X_SHORT != 0 {
                1
            } else if flag & FLAG_X_SAME_OR_POSITIVE != 0 {
                0
            } else {
                2
            };
            let y = if flag & FLAG_Y_SHORT != 0 {
                1
            } else if flag & FLAG_Y_SAME_OR_POSITIVE != 0 {
                0
            } else {
                2
            };
            let repeat = repeat.min(num_points - seen);
            coord_bytes += (x + y) * repeat;
            seen += repeat;
        }

        if pos + coord_bytes > glyph.len() {
            return Err(Error::MalformedFont(format!(
                "glyph {} needs {} bytes for {} points, has {}",
                glyph_id,
                pos + coord_bytes,
                num_points,
                glyph.len()
            )));
        }
        Ok(())
    }
}

fn read_u16(data: &[u8], offset: usize, what: &str) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(BigEndian::read_u16)
        .ok_or_else(|| Error::MalformedFont(format!("truncated while reading {}", what)))
}

fn read_u32(data: &[u8], offset: usize, what: &str) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(BigEndian::read_u32)
        .ok_or_else(|| Error::MalformedFont(format!("truncated while reading {}", what)))
}

fn tag_name(tag: &[u8; 4]) -> String {
    String::from_utf8_lossy(tag).into_owned()
}
