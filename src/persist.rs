//! Atomic file replacement and advisory file locks.
//!
//! Readers of the coordinate table and of cache entries must see either the old
//! or the complete new file. Data is written to a uniquely named temporary file
//! in the target directory, flushed to disk, then renamed over the target.
//!
//! Atomic replacement alone does not stop two writers from losing each other's
//! changes. Writers that read, modify and replace a shared file hold a
//! [`LockFile`] for the whole cycle.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Pause between attempts to take a held lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Replace `path` with `bytes` atomically, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Advisory lock on a file, held by creating `<file>.lock` exclusively.
///
/// Only cooperating writers are excluded; readers never look at the lock.
/// A lock file older than the stale limit is taken to belong to a crashed
/// writer and is removed. The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Lock `target`, waiting up to `timeout` for another holder.
    ///
    /// # Arguments
    /// * `target` - File being protected (the lock lives next to it)
    /// * `timeout` - How long to wait before giving up with `TimedOut`
    /// * `stale_after` - Age after which an existing lock is broken
    pub fn acquire(target: &Path, timeout: Duration, stale_after: Duration) -> Result<Self> {
        let path = lock_path(target);
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    // Owner pid, for whoever finds a leftover lock.
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                },
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path, stale_after) {
                        log::warn!("Breaking stale lock {}", path.display());
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            ErrorKind::TimedOut,
                            format!("lock {} is held by another writer", path.display()),
                        )
                        .into());
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                log::warn!("Cannot release lock {}: {}", self.path.display(), e);
            }
        }
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "data".into());
    name.push(".lock");
    target.with_file_name(name)
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > stale_after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("table.json");

        write_atomic(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // No temporary files left behind.
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_atomic_fails_when_target_is_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("occupied");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"x").unwrap();

        assert!(write_atomic(&target, b"data").is_err());
        assert!(target.join("keep").exists());
    }

    #[test]
    fn test_lock_file_excludes_second_holder_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("table.json");

        let first = LockFile::acquire(&target, Duration::ZERO, Duration::from_secs(60)).unwrap();
        assert_eq!(first.path(), dir.path().join("table.json.lock"));
        assert!(first.path().exists());

        let err = LockFile::acquire(&target, Duration::from_millis(30), Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Io(ref e) if e.kind() == ErrorKind::TimedOut));

        drop(first);
        assert!(!dir.path().join("table.json.lock").exists());
        assert!(LockFile::acquire(&target, Duration::ZERO, Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_lock_file_breaks_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("table.json");
        fs::write(dir.path().join("table.json.lock"), b"12345\n").unwrap();
        thread::sleep(Duration::from_millis(20));

        let lock = LockFile::acquire(&target, Duration::ZERO, Duration::from_millis(1)).unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn test_lock_file_serialises_threads() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("counter");
        fs::write(&target, b"0").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let target = target.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        let _lock =
                            LockFile::acquire(&target, Duration::from_secs(10), Duration::from_secs(60))
                                .unwrap();
                        let n: u32 = fs::read_to_string(&target).unwrap().parse().unwrap();
                        write_atomic(&target, (n + 1).to_string().as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(fs::read_to_string(&target).unwrap(), "40");
    }
}
