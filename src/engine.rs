//! Identification engine.
//!
//! [`Engine`] owns the coordinate table store, the parse cache and the indexed
//! reference fonts. It is `Send + Sync`; callers share one instance across
//! worker threads.
//!
//! # Example
//!
//! ```no_run
//! use glyph_match::{Engine, EngineConfig};
//!
//! # fn main() -> glyph_match::Result<()> {
//! let engine = Engine::open(
//!     EngineConfig::new()
//!         .with_table_path("instance/coor_table.json")
//!         .with_reference_font("assets/SourceHanSansSC-Normal.otf"),
//! )?;
//!
//! let font = std::fs::read("jjwxcfont_00ab1.woff.ttf")?;
//! let result = engine.identify(&font, 12)?;
//! println!("{}", result);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::cache::{fingerprint, FileCacheStore, MemoryCacheStore, ParseCache};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::fonts::outline::GlyphOutline;
use crate::matcher::{
    search_all, GuessRange, MatchResult, Provenance, ReferenceFontIndex, SearchLimits, SlowMatch,
    UnresolvedReason,
};
use crate::signature::{NormalizedShape, ShapeSignature};
use crate::table::{CoordinateStore, CoordinateTable, ReconcileReport, RecordOutcome, StartupOutcome};

/// Whether whole-font identification may fall back to the slow path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlowMode {
    /// Fast path only
    Disabled,
    /// Slow path against the configured reference fonts, limited to a guess range
    Enabled(GuessRange),
}

/// Result for one code point of an obfuscation font.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharMatch {
    /// Code point the obfuscation font declares
    pub code_point: u32,
    /// Glyph it maps to
    pub glyph_id: u16,
    /// Identification outcome
    pub result: MatchResult,
}

/// Identification of every mapped glyph of a font.
#[derive(Debug, Clone, PartialEq)]
pub struct FontReport {
    /// Content fingerprint of the font
    pub fingerprint: String,
    /// One entry per cmap code point, in code point order
    pub results: Vec<CharMatch>,
    /// Cumulative time spent in the slow path
    pub slow_path_time: Duration,
    /// Number of slow searches run
    pub slow_searches: usize,
}

impl FontReport {
    /// Number of resolved code points.
    pub fn resolved_count(&self) -> usize {
        self.results.iter().filter(|r| r.result.is_resolved()).count()
    }

    /// Obfuscated → real character pairs that were resolved.
    pub fn mapping(&self) -> Vec<(char, char)> {
        self.results
            .iter()
            .filter_map(|r| Some((char::from_u32(r.code_point)?, r.result.character()?)))
            .collect()
    }
}

/// Normalised outline and its signature.
struct Prepared {
    shape: NormalizedShape,
    signature: ShapeSignature,
}

/// Glyph identification engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: CoordinateStore,
    cache: ParseCache,
    references: Mutex<HashMap<String, Arc<ReferenceFontIndex>>>,
    startup: StartupOutcome,
}

impl Engine {
    /// Open the coordinate table and set up the parse cache.
    ///
    /// # Errors
    /// `Config` for invalid settings, `NoUsableTable` when neither the local nor
    /// the bundled table can be loaded.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let (store, startup) = CoordinateStore::open(&config.table_path, &config.bundled_table_path)?;
        log::info!(
            "Coordinate table ready: {} entries ({:?})",
            store.snapshot().len(),
            startup
        );

        let cache = match &config.cache_dir {
            Some(dir) => ParseCache::new(
                Box::new(FileCacheStore::new(dir).with_threshold(config.cache_threshold)),
                config.cache_ttl,
            ),
            None => ParseCache::new(
                Box::new(MemoryCacheStore::new().with_threshold(config.cache_threshold)),
                config.cache_ttl,
            ),
        };

        Ok(Self {
            config,
            store,
            cache,
            references: Mutex::new(HashMap::new()),
            startup,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// How the table was obtained at startup.
    pub fn startup_outcome(&self) -> &StartupOutcome {
        &self.startup
    }

    /// Current coordinate table snapshot.
    pub fn table(&self) -> Arc<CoordinateTable> {
        self.store.snapshot()
    }

    /// Identify a glyph by exact signature lookup only.
    ///
    /// # Errors
    /// Font errors from parsing, `GlyphOutOfRange` for an unknown glyph id.
    pub fn identify(&self, font_bytes: &[u8], glyph_id: u16) -> Result<MatchResult> {
        let font = self.cache.get_or_parse(font_bytes)?;
        let outline = font.require_glyph(glyph_id)?;
        Ok(self.fast_path(outline).0)
    }

    /// Identify the glyph the font maps `code_point` to, fast path only.
    pub fn identify_char(&self, font_bytes: &[u8], code_point: u32) -> Result<MatchResult> {
        let font = self.cache.get_or_parse(font_bytes)?;
        let glyph_id = font
            .glyph_for_char(code_point)
            .ok_or(Error::UnmappedCodePoint(code_point))?;
        let outline = font.require_glyph(glyph_id)?;
        Ok(self.fast_path(outline).0)
    }

    /// Identify a glyph, searching `reference_font` on a fast-path miss.
    ///
    /// A confident geometric match is recorded in the coordinate table, so the
    /// next call for the same outline resolves exactly.
    pub fn identify_slow(
        &self,
        font_bytes: &[u8],
        glyph_id: u16,
        reference_font: &[u8],
    ) -> Result<SlowMatch> {
        self.identify_slow_within(font_bytes, glyph_id, reference_font, &GuessRange::all())
    }

    /// [`identify_slow`](Self::identify_slow) restricted to a guess range.
    pub fn identify_slow_within(
        &self,
        font_bytes: &[u8],
        glyph_id: u16,
        reference_font: &[u8],
        range: &GuessRange,
    ) -> Result<SlowMatch> {
        let started = Instant::now();
        let font = self.cache.get_or_parse(font_bytes)?;
        let outline = font.require_glyph(glyph_id)?;

        let (fast, prepared) = self.fast_path(outline);
        let Some(prepared) = prepared else {
            return Ok(SlowMatch {
                result: fast,
                elapsed: started.elapsed(),
                candidates_examined: 0,
            });
        };
        let index = self.reference_from_bytes(reference_font)?;
        Ok(self.slow_path(&prepared, &[index], range, started))
    }

    /// Identify a glyph against the configured reference fonts, in priority order.
    ///
    /// # Errors
    /// `Config` when no reference font is configured, `ReferenceFont` when one
    /// cannot be read.
    pub fn identify_slow_configured(
        &self,
        font_bytes: &[u8],
        glyph_id: u16,
        range: &GuessRange,
    ) -> Result<SlowMatch> {
        let started = Instant::now();
        let font = self.cache.get_or_parse(font_bytes)?;
        let outline = font.require_glyph(glyph_id)?;

        let (fast, prepared) = self.fast_path(outline);
        let Some(prepared) = prepared else {
            return Ok(SlowMatch {
                result: fast,
                elapsed: started.elapsed(),
                candidates_examined: 0,
            });
        };
        let references = self.configured_references()?;
        Ok(self.slow_path(&prepared, &references, range, started))
    }

    /// Identify every code point the font maps.
    ///
    /// With [`SlowMode::Enabled`] each fast-path miss is searched in the
    /// configured reference fonts; the report carries the cumulative slow-path
    /// time so callers can tell when the table lacks coverage.
    pub fn identify_font(&self, font_bytes: &[u8], mode: SlowMode) -> Result<FontReport> {
        let font = self.cache.get_or_parse(font_bytes)?;
        let references = match &mode {
            SlowMode::Enabled(_) => self.configured_references()?,
            SlowMode::Disabled => Vec::new(),
        };

        let mut report = FontReport {
            fingerprint: font.fingerprint.clone(),
            results: Vec::with_capacity(font.cmap.len()),
            slow_path_time: Duration::ZERO,
            slow_searches: 0,
        };

        for &(code_point, glyph_id) in &font.cmap {
            let Some(outline) = font.glyph(glyph_id) else {
                log::warn!(
                    "U+{:04X} maps to glyph {} but the font has {} glyphs",
                    code_point,
                    glyph_id,
                    font.num_glyphs
                );
                report.results.push(CharMatch {
                    code_point,
                    glyph_id,
                    result: MatchResult::Unresolved(UnresolvedReason::MissingGlyph),
                });
                continue;
            };
            let (fast, prepared) = self.fast_path(outline);
            let result = match (&mode, prepared) {
                (SlowMode::Enabled(range), Some(prepared)) => {
                    let slow = self.slow_path(&prepared, &references, range, Instant::now());
                    report.slow_path_time += slow.elapsed;
                    report.slow_searches += 1;
                    slow.result
                },
                _ => fast,
            };
            report.results.push(CharMatch {
                code_point,
                glyph_id,
                result,
            });
        }

        if report.slow_searches > 0 {
            log::info!(
                "Font {}: {} slow searches took {:?}",
                report.fingerprint,
                report.slow_searches,
                report.slow_path_time
            );
        }
        Ok(report)
    }

    /// Merge a remote table into the local one.
    ///
    /// Local mappings win conflicts. A remote table that cannot be parsed is
    /// reported and ignored.
    pub fn reconcile_table(&self, remote_table: &[u8]) -> ReconcileReport {
        self.store.reconcile(remote_table)
    }

    /// Fast-path result, plus the prepared outline when the slow path may still run.
    fn fast_path(&self, outline: &GlyphOutline) -> (MatchResult, Option<Prepared>) {
        if outline.is_empty() {
            return (MatchResult::Unresolved(UnresolvedReason::EmptyOutline), None);
        }
        let shape = NormalizedShape::from_outline(outline);
        let signature = shape.signature();
        match self.store.lookup(&signature) {
            Some(character) => {
                log::debug!("Glyph {} found in table: '{}'", outline.glyph_id, character);
                (
                    MatchResult::Resolved {
                        character,
                        provenance: Provenance::Exact,
                    },
                    None,
                )
            },
            None => (
                MatchResult::Unresolved(UnresolvedReason::NotInTable),
                Some(Prepared { shape, signature }),
            ),
        }
    }

    fn slow_path(
        &self,
        prepared: &Prepared,
        references: &[Arc<ReferenceFontIndex>],
        range: &GuessRange,
        started: Instant,
    ) -> SlowMatch {
        let limits = SearchLimits::from_config(&self.config, started);
        let found = search_all(
            &prepared.shape,
            &prepared.signature,
            references.iter().map(|r| r.as_ref()),
            range,
            &limits,
        );

        if let MatchResult::Resolved { character, .. } = found.result {
            if let RecordOutcome::Conflict { existing } =
                self.store.record(prepared.signature.clone(), character)
            {
                log::warn!(
                    "Slow match '{}' disagrees with table entry '{}'",
                    character,
                    existing
                );
            }
        }

        SlowMatch {
            elapsed: started.elapsed(),
            ..found
        }
    }

    /// Index for reference font bytes, built once per distinct content.
    fn reference_from_bytes(&self, data: &[u8]) -> Result<Arc<ReferenceFontIndex>> {
        let key = fingerprint(data);
        if let Some(index) = self.cached_reference(&key) {
            return Ok(index);
        }
        let parsed = self.cache.get_or_parse(data)?;
        let index = ReferenceFontIndex::from_parsed(&key[..12], &parsed, self.config.sample_step);
        Ok(self.insert_reference(key, index))
    }

    /// Index for a configured reference font file.
    ///
    /// The parsed font goes through the parse cache, so with a cache directory
    /// a restarted engine skips decoding the reference face again.
    fn reference_from_path(&self, path: &Path) -> Result<Arc<ReferenceFontIndex>> {
        let key = format!("path:{}", path.display());
        if let Some(index) = self.cached_reference(&key) {
            return Ok(index);
        }
        let data = std::fs::read(path).map_err(|source| Error::ReferenceFont {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = self.cache.get_or_parse(&data)?;
        let index = ReferenceFontIndex::from_parsed(
            path.display().to_string(),
            &parsed,
            self.config.sample_step,
        );
        Ok(self.insert_reference(key, index))
    }

    fn configured_references(&self) -> Result<Vec<Arc<ReferenceFontIndex>>> {
        if self.config.reference_fonts.is_empty() {
            return Err(Error::Config("no reference fonts configured".to_string()));
        }
        self.config
            .reference_fonts
            .iter()
            .map(|p| self.reference_from_path(p))
            .collect()
    }

    fn cached_reference(&self, key: &str) -> Option<Arc<ReferenceFontIndex>> {
        self.references
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn insert_reference(&self, key: String, index: ReferenceFontIndex) -> Arc<ReferenceFontIndex> {
        // Another thread may have indexed the same font meanwhile; keep the first.
        Arc::clone(
            self.references
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key)
                .or_insert_with(|| Arc::new(index)),
        )
    }
}
