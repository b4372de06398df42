//! Error types for the glyph identification engine.
//!
//! Font errors (`MalformedFont`, `UnsupportedFormat`) are fatal to the request that
//! hit them and propagate to the caller of `identify*`. Table errors are absorbed by
//! the store (it falls back to the bundled baseline) and only escape when no usable
//! table exists at all.

use std::path::PathBuf;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while parsing fonts or maintaining the coordinate table.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Font binary is truncated or structurally inconsistent
    #[error("Malformed font: {0}")]
    MalformedFont(String),

    /// Font uses an encoding or wrapper this engine does not decode
    #[error("Unsupported font format: {0}")]
    UnsupportedFormat(String),

    /// Requested glyph id does not exist in the font
    #[error("Glyph {glyph_id} out of range (font has {num_glyphs} glyphs)")]
    GlyphOutOfRange {
        /// Requested glyph id
        glyph_id: u16,
        /// Number of glyphs declared by the font
        num_glyphs: u16,
    },

    /// Code point is not mapped by the font's own cmap
    #[error("Code point U+{0:04X} is not mapped by the font")]
    UnmappedCodePoint(u32),

    /// Persisted coordinate table could not be read
    #[error("Coordinate table {source_name} is corrupt: {reason}")]
    TableCorrupt {
        /// Where the table came from (file path or "remote")
        source_name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Neither the local nor the bundled table could be loaded
    #[error("No usable coordinate table: {0}")]
    NoUsableTable(String),

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Reference font listed in the configuration could not be read
    #[error("Reference font {path}: {source}")]
    ReferenceFont {
        /// Configured path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a `TableCorrupt` error for a table read from `source_name`.
    pub fn table_corrupt(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Error::TableCorrupt {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors caused by the font bytes themselves.
    pub fn is_font_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedFont(_) | Error::UnsupportedFormat(_) | Error::GlyphOutOfRange { .. }
        )
    }
}
