//! Parse cache.
//!
//! Parsed fonts are memoised by a content fingerprint of the font bytes. The
//! cache is never required for correctness: a miss, an expired entry or an
//! entry that no longer decodes falls back to parsing the bytes again.
//!
//! Storage is pluggable through [`CacheStore`]. Two stores are provided:
//! [`MemoryCacheStore`] for a single process and [`FileCacheStore`], which keeps
//! one file per key so several worker processes can share entries.
//!
//! Obfuscation fonts are generated per page, so most keys are written once and
//! never read again. Both stores therefore drop expired entries on their own
//! and hold at most `threshold` entries; when full, the entries closest to
//! expiry are evicted first.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::config::DEFAULT_CACHE_THRESHOLD;
use crate::error::Result;
use crate::fonts::truetype_parser::{parse_font, ParsedFont};
use crate::persist::write_atomic;

/// First token of every file cache entry.
const FILE_MAGIC: &str = "glyph-match-cache";

/// File cache entry layout version.
const FILE_VERSION: &str = "v1";

/// Longest retention an entry can carry (about ten years).
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 86_400);

/// Lowercase hex SHA-256 of `data`.
pub fn fingerprint(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Key/blob store with expiry.
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store an entry that expires after `ttl`.
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Drop an entry if present.
    fn remove(&self, key: &str);
}

/// Process-local store.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (Instant, Vec<u8>)>>,
    threshold: usize,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheStore {
    /// Create an empty store holding up to [`DEFAULT_CACHE_THRESHOLD`] entries.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            threshold: DEFAULT_CACHE_THRESHOLD,
        }
    }

    /// Limit the number of entries held (0 = unlimited).
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((expires, value)) if Instant::now() < *expires => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            },
            None => None,
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (expires, _)| now < *expires);

        if self.threshold > 0 && !entries.contains_key(key) {
            while entries.len() >= self.threshold {
                let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, (expires, _))| *expires)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                entries.remove(&oldest);
            }
        }

        entries.insert(key.to_string(), (now + ttl.min(MAX_TTL), value.to_vec()));
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// One file per key under a directory.
///
/// Each file starts with a header line `glyph-match-cache v1 <expiry>` where the
/// expiry is an RFC 3339 UTC timestamp, followed by the raw value bytes. Files
/// are replaced atomically, so concurrent readers see whole entries only.
///
/// Writing into a directory that already holds `threshold` entries first
/// prunes it: expired and unreadable files go, then the files closest to
/// expiry until there is room for the new one.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
    threshold: usize,
}

impl FileCacheStore {
    /// Store entries under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            threshold: DEFAULT_CACHE_THRESHOLD,
        }
    }

    /// Limit the number of entry files (0 = unlimited).
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of entry files, expired ones included.
    pub fn len(&self) -> usize {
        self.entry_files().len()
    }

    /// True if the directory holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired and unreadable entries, then evict the entries closest
    /// to expiry until fewer than `threshold` remain. Returns the number of
    /// files removed.
    pub fn prune(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        let mut live = Vec::new();

        for path in self.entry_files() {
            match read_expiry(&path) {
                Some(expires) if now < expires => live.push((expires, path)),
                _ => {
                    if remove_entry_file(&path) {
                        removed += 1;
                    }
                },
            }
        }

        if self.threshold > 0 && live.len() >= self.threshold {
            live.sort();
            let excess = live.len() + 1 - self.threshold;
            for (_, path) in live.iter().take(excess) {
                if remove_entry_file(path) {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            log::debug!("Pruned {} parse cache entries from {}", removed, self.dir.display());
        }
        removed
    }

    fn entry_files(&self) -> Vec<PathBuf> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("Cannot list cache directory {}: {}", self.dir.display(), e);
                return Vec::new();
            },
        };
        read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "cache"))
            .collect()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.cache", name))
    }
}

/// Split a file entry into expiry and value.
fn decode_file_entry(bytes: &[u8]) -> Option<(DateTime<Utc>, &[u8])> {
    let newline = bytes.iter().position(|&b| b == b'\n')?;
    let header = std::str::from_utf8(&bytes[..newline]).ok()?;
    let mut parts = header.split(' ');
    if parts.next()? != FILE_MAGIC || parts.next()? != FILE_VERSION {
        return None;
    }
    let expires = DateTime::parse_from_rfc3339(parts.next()?).ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((expires.with_timezone(&Utc), &bytes[newline + 1..]))
}

/// Expiry from the header line of an entry file, without reading the value.
fn read_expiry(path: &Path) -> Option<DateTime<Utc>> {
    let file = File::open(path).ok()?;
    let mut header = Vec::new();
    BufReader::new(file.take(256))
        .read_until(b'\n', &mut header)
        .ok()?;
    decode_file_entry(&header).map(|(expires, _)| expires)
}

fn remove_entry_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!("Cannot remove cache entry {}: {}", path.display(), e);
            false
        },
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Cannot read cache entry {}: {}", path.display(), e);
                return None;
            },
        };

        match decode_file_entry(&bytes) {
            Some((expires, value)) if Utc::now() < expires => Some(value.to_vec()),
            Some(_) => {
                log::debug!("Cache entry {} expired", key);
                self.remove(key);
                None
            },
            None => {
                log::warn!("Discarding unreadable cache entry {}", path.display());
                self.remove(key);
                None
            },
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl.min(MAX_TTL))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let expires = Utc::now() + ttl;
        let mut bytes = format!("{} {} {}\n", FILE_MAGIC, FILE_VERSION, expires.to_rfc3339())
            .into_bytes();
        bytes.extend_from_slice(value);

        let path = self.entry_path(key);
        if self.threshold > 0 && !path.exists() && self.len() >= self.threshold {
            self.prune();
        }
        write_atomic(&path, &bytes)
    }

    fn remove(&self, key: &str) {
        remove_entry_file(&self.entry_path(key));
    }
}

/// Memoising front of [`parse_font`].
pub struct ParseCache {
    store: Option<Box<dyn CacheStore>>,
    ttl: Duration,
}

impl std::fmt::Debug for ParseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseCache")
            .field("enabled", &self.store.is_some())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ParseCache {
    /// Cache parsed fonts in `store` for `ttl`.
    pub fn new(store: Box<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store: Some(store),
            ttl,
        }
    }

    /// A cache that always parses.
    pub fn disabled() -> Self {
        Self {
            store: None,
            ttl: Duration::ZERO,
        }
    }

    /// Parsed font for `data`, from the cache when possible.
    ///
    /// Parse errors are returned and never cached.
    pub fn get_or_parse(&self, data: &[u8]) -> Result<Arc<ParsedFont>> {
        let Some(store) = &self.store else {
            return parse_font(data).map(Arc::new);
        };

        let fp = fingerprint(data);
        let key = format!("font:{}", fp);

        if let Some(bytes) = store.get(&key) {
            match serde_json::from_slice::<ParsedFont>(&bytes) {
                Ok(parsed) if parsed.fingerprint == fp => {
                    log::debug!("Parse cache hit for {}", fp);
                    return Ok(Arc::new(parsed));
                },
                Ok(_) => {
                    log::warn!("Parse cache entry {} belongs to another font, re-parsing", key);
                    store.remove(&key);
                },
                Err(e) => {
                    log::warn!("Parse cache entry {} unreadable ({}), re-parsing", key, e);
                    store.remove(&key);
                },
            }
        }

        let parsed = parse_font(data)?;
        match serde_json::to_vec(&parsed) {
            Ok(bytes) => {
                if let Err(e) = store.set(&key, &bytes, self.ttl) {
                    log::warn!("Failed to store parse cache entry {}: {}", key, e);
                }
            },
            Err(e) => log::warn!("Failed to encode parse cache entry {}: {}", key, e),
        }
        Ok(Arc::new(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fonts::synth::SyntheticFont;

    fn font_bytes() -> Vec<u8> {
        let mut font = SyntheticFont::new(1000);
        let g = font.add_glyph(&[vec![(0, 0, true), (0, 500, true), (500, 0, true)]]);
        font.map_char('\u{E010}', g);
        font.build()
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_memory_store_expiry() {
        let store = MemoryCacheStore::new();
        store.set("a", b"1", Duration::from_secs(60)).unwrap();
        store.set("b", b"2", Duration::ZERO).unwrap();
        assert_eq!(store.get("a"), Some(b"1".to_vec()));
        assert_eq!(store.get("b"), None);
        store.remove("a");
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_round_trip_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache"));
        store.set("font:abc", b"payload\nwith newline", Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("font:abc"), Some(b"payload\nwith newline".to_vec()));

        store.set("font:old", b"x", Duration::ZERO).unwrap();
        assert_eq!(store.get("font:old"), None);
        assert!(!store.entry_path("font:old").exists());
    }

    #[test]
    fn test_memory_store_drops_expired_entries_on_write() {
        let store = MemoryCacheStore::new().with_threshold(0);
        for i in 0..1000 {
            store.set(&format!("font:{}", i), b"x", Duration::ZERO).unwrap();
        }
        store.set("font:live", b"y", Duration::from_secs(60)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("font:live"), Some(b"y".to_vec()));
    }

    #[test]
    fn test_memory_store_threshold_evicts_closest_to_expiry() {
        let store = MemoryCacheStore::new().with_threshold(2);
        store.set("a", b"1", Duration::from_secs(10)).unwrap();
        store.set("b", b"2", Duration::from_secs(100)).unwrap();
        store.set("c", b"3", Duration::from_secs(50)).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a"), None);
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());

        // Overwriting a held key evicts nothing.
        store.set("b", b"4", Duration::from_secs(100)).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_file_store_prunes_expired_entries_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path()).with_threshold(3);
        for key in ["a", "b", "c"] {
            store.set(key, b"old", Duration::ZERO).unwrap();
        }
        assert_eq!(store.len(), 3);

        store.set("d", b"new", Duration::from_secs(60)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("d"), Some(b"new".to_vec()));
    }

    #[test]
    fn test_file_store_threshold_evicts_closest_to_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path()).with_threshold(2);
        store.set("a", b"1", Duration::from_secs(10)).unwrap();
        store.set("b", b"2", Duration::from_secs(100)).unwrap();
        store.set("c", b"3", Duration::from_secs(50)).unwrap();

        assert_eq!(store.len(), 2);
        assert!(!store.entry_path("a").exists());
        assert_eq!(store.get("b"), Some(b"2".to_vec()));
        assert_eq!(store.get("c"), Some(b"3".to_vec()));
    }

    #[test]
    fn test_file_store_prune_removes_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        store.set("live", b"1", Duration::from_secs(60)).unwrap();
        store.set("old", b"2", Duration::ZERO).unwrap();
        fs::write(store.entry_path("junk"), b"no header").unwrap();
        fs::write(dir.path().join("unrelated.txt"), b"kept").unwrap();

        assert_eq!(store.prune(), 2);
        assert_eq!(store.len(), 1);
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_file_store_discards_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        fs::write(store.entry_path("k"), b"not a cache entry").unwrap();
        assert_eq!(store.get("k"), None);
        assert!(!store.entry_path("k").exists());
    }

    #[test]
    fn test_parse_cache_hit_returns_same_font() {
        let data = font_bytes();
        let cache = ParseCache::new(Box::new(MemoryCacheStore::new()), Duration::from_secs(60));
        let first = cache.get_or_parse(&data).unwrap();
        let second = cache.get_or_parse(&data).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_cache_recovers_from_corrupt_entry() {
        let data = font_bytes();
        let store = MemoryCacheStore::new();
        store
            .set(&format!("font:{}", fingerprint(&data)), b"{broken", Duration::from_secs(60))
            .unwrap();
        let cache = ParseCache::new(Box::new(store), Duration::from_secs(60));

        let parsed = cache.get_or_parse(&data).unwrap();
        assert_eq!(parsed.fingerprint, fingerprint(&data));
    }

    #[test]
    fn test_parse_cache_does_not_hide_errors() {
        let cache = ParseCache::new(Box::new(MemoryCacheStore::new()), Duration::from_secs(60));
        let err = cache.get_or_parse(b"\x00\x01\x00\x00trunc").unwrap_err();
        assert!(matches!(err, Error::MalformedFont(_)));

        let disabled = ParseCache::disabled();
        assert!(disabled.get_or_parse(&font_bytes()).is_ok());
    }
}
