//! Configuration for the identification engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default acceptance threshold for geometric matches (fraction of the normalised extent).
pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 0.02;

/// Default spacing between outline samples, in normalised units.
pub const DEFAULT_SAMPLE_STEP: f64 = 20.0;

/// Default retention window for parse cache entries (one day).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(86_400);

/// Default cap on parse cache entries (Flask-Caching's file cache default).
pub const DEFAULT_CACHE_THRESHOLD: usize = 500;

/// Default upper bound on one slow-path call.
pub const DEFAULT_SLOW_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine configuration.
///
/// Passed explicitly to [`Engine::open`](crate::engine::Engine::open); nothing in
/// the engine reads ambient configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum geometric score accepted by the slow path.
    ///
    /// Scores are Hausdorff distances expressed as a fraction of the glyph's
    /// larger bounding-box side, so 0.02 tolerates 2% digitisation noise.
    pub accept_threshold: f64,

    /// Local (read-write) coordinate table.
    pub table_path: PathBuf,

    /// Bundled baseline table shipped with the deployment (read-only).
    pub bundled_table_path: PathBuf,

    /// Reference fonts for the slow path, searched in this order.
    pub reference_fonts: Vec<PathBuf>,

    /// Directory for the file-system parse cache. `None` keeps the cache in memory.
    pub cache_dir: Option<PathBuf>,

    /// Retention window for parse cache entries.
    pub cache_ttl: Duration,

    /// Maximum number of parse cache entries kept (0 = unlimited).
    pub cache_threshold: usize,

    /// Deadline for one slow-path call.
    pub slow_timeout: Duration,

    /// Maximum number of reference glyphs fully compared per search (0 = unlimited).
    pub max_candidates: usize,

    /// Distance between outline samples in normalised units (extent = 1000).
    pub sample_step: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
            table_path: PathBuf::from("instance/coor_table.json"),
            bundled_table_path: PathBuf::from("assets/coor_table.json"),
            reference_fonts: Vec::new(),
            cache_dir: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_threshold: DEFAULT_CACHE_THRESHOLD,
            slow_timeout: DEFAULT_SLOW_TIMEOUT,
            max_candidates: 0,
            sample_step: DEFAULT_SAMPLE_STEP,
        }
    }

    /// Set the slow-path acceptance threshold.
    pub fn with_accept_threshold(mut self, threshold: f64) -> Self {
        self.accept_threshold = threshold;
        self
    }

    /// Set the local table path.
    pub fn with_table_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.table_path = path.into();
        self
    }

    /// Set the bundled baseline table path.
    pub fn with_bundled_table_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundled_table_path = path.into();
        self
    }

    /// Append a reference font (lower priority than those already configured).
    pub fn with_reference_font(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference_fonts.push(path.into());
        self
    }

    /// Persist the parse cache under `dir`.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set the parse cache retention window.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Cap the number of parse cache entries.
    pub fn with_cache_threshold(mut self, threshold: usize) -> Self {
        self.cache_threshold = threshold;
        self
    }

    /// Set the slow-path deadline.
    pub fn with_slow_timeout(mut self, timeout: Duration) -> Self {
        self.slow_timeout = timeout;
        self
    }

    /// Cap the number of candidates compared per slow search.
    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    /// Set the outline sampling step.
    pub fn with_sample_step(mut self, step: f64) -> Self {
        self.sample_step = step;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !self.accept_threshold.is_finite() || self.accept_threshold < 0.0 {
            return Err(Error::Config(format!(
                "accept_threshold must be a non-negative number, got {}",
                self.accept_threshold
            )));
        }
        if !self.sample_step.is_finite() || self.sample_step <= 0.0 {
            return Err(Error::Config(format!(
                "sample_step must be positive, got {}",
                self.sample_step
            )));
        }
        Ok(())
    }

    /// Load configuration from a JSON file.
    ///
    /// Missing keys keep their defaults. Durations are given as
    /// `cache_ttl_secs` and `slow_timeout_ms`; relative paths are resolved
    /// against the directory containing the file.
    ///
    /// ```text
    /// {
    ///   "accept_threshold": 0.015,
    ///   "table_path": "instance/coor_table.json",
    ///   "reference_fonts": ["assets/SourceHanSansSC-Normal.otf"],
    ///   "cache_ttl_secs": 3600
    /// }
    /// ```
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let raw: RawConfig = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let config = raw.into_config(base);
        config.validate()?;
        Ok(config)
    }
}

/// On-disk shape of [`EngineConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    accept_threshold: Option<f64>,
    table_path: Option<PathBuf>,
    bundled_table_path: Option<PathBuf>,
    reference_fonts: Option<Vec<PathBuf>>,
    cache_dir: Option<PathBuf>,
    cache_ttl_secs: Option<u64>,
    cache_threshold: Option<usize>,
    slow_timeout_ms: Option<u64>,
    max_candidates: Option<usize>,
    sample_step: Option<f64>,
}

impl RawConfig {
    fn into_config(self, base: &Path) -> EngineConfig {
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        let defaults = EngineConfig::new();
        EngineConfig {
            accept_threshold: self.accept_threshold.unwrap_or(defaults.accept_threshold),
            table_path: resolve(self.table_path.unwrap_or(defaults.table_path)),
            bundled_table_path: resolve(
                self.bundled_table_path
                    .unwrap_or(defaults.bundled_table_path),
            ),
            reference_fonts: self
                .reference_fonts
                .unwrap_or_default()
                .into_iter()
                .map(resolve)
                .collect(),
            cache_dir: self.cache_dir.map(resolve),
            cache_ttl: self
                .cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_threshold: self.cache_threshold.unwrap_or(defaults.cache_threshold),
            slow_timeout: self
                .slow_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.slow_timeout),
            max_candidates: self.max_candidates.unwrap_or(defaults.max_candidates),
            sample_step: self.sample_step.unwrap_or(defaults.sample_step),
        }
    }
}
