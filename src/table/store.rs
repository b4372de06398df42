//! Persistent coordinate table store.
//!
//! The store owns the local table file and publishes the in-memory table as an
//! immutable snapshot (`Arc<CoordinateTable>`). Lookups read the current
//! snapshot; writers build a new table, persist it atomically and then swap the
//! snapshot, so readers never observe a half-applied change and never block on
//! file IO.
//!
//! The table file may be shared by several stores, in one process or many.
//! Every write takes the table's [`LockFile`], re-reads the file and folds
//! its entries into the snapshot before applying the change, so one writer
//! never erases what another recorded.
//!
//! # Startup
//!
//! Opening the store runs an explicit recovery state machine:
//!
//! ```text
//! Inspect ─► Missing ──────────► CopyBaseline ──► Ready
//!   │
//!   ├────► Present ───────────► Reconcile ─────► Ready
//!   │
//!   ├────► Corrupt ───────────► ResetToBaseline ► Ready
//!   │
//!   └────► Unreadable ────────► UseBaseline ────► Ready
//! ```
//!
//! `Corrupt` means the file was read but is not a table; only then is it
//! overwritten. `Unreadable` covers every other read failure (permissions, a
//! directory in the way, IO errors): the baseline is served from memory and
//! the file is left alone. The bundled baseline is required for `Missing`,
//! `Corrupt` and `Unreadable`; when it is also unusable the store cannot start
//! and returns `NoUsableTable`. Failing to write the recovered table back to
//! disk is logged and does not stop startup.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use super::{merge, CoorTableEntry, CoordinateTable, MappingConflict, Reconciled};
use crate::error::{Error, Result};
use crate::persist::{write_atomic, LockFile};
use crate::signature::ShapeSignature;

/// How long a writer waits for another process holding the table lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Age after which a table lock is assumed abandoned.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// How the local table was obtained at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// No local table existed; the bundled baseline was copied.
    CopiedBaseline {
        /// Entries in the baseline
        entries: usize,
    },
    /// The local table was loaded and the baseline merged into it.
    Reconciled {
        /// Entries added from the baseline
        added: usize,
        /// Conflicts found in the local file or while merging
        conflicts: Vec<MappingConflict>,
    },
    /// The local table was corrupt and replaced by the baseline.
    ResetToBaseline {
        /// Why the local table was rejected
        reason: String,
    },
    /// The local table could not be read; the baseline is used in memory
    /// and the file is left untouched.
    LocalUnreadable {
        /// Read error
        reason: String,
    },
}

/// Result of [`CoordinateStore::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New mapping added.
    Inserted {
        /// Whether the table file was rewritten
        persisted: bool,
    },
    /// The same mapping was already present.
    AlreadyPresent,
    /// The signature is already mapped to another character, which is kept.
    Conflict {
        /// Character already in the table
        existing: char,
    },
}

/// Result of [`CoordinateStore::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries added from the remote table
    pub added: usize,
    /// Conflicts resolved in favour of the local table
    pub conflicts: Vec<MappingConflict>,
    /// Whether the table file was rewritten
    pub persisted: bool,
    /// The remote table could not be parsed and was ignored
    pub remote_corrupt: bool,
}

enum StartupState {
    Inspect,
    Missing,
    Present(Reconciled),
    Corrupt(String),
    Unreadable(String),
    Ready(CoordinateTable, StartupOutcome),
}

/// Table file contents as seen by a writer holding the lock.
enum OnDisk {
    Table(CoordinateTable),
    /// Missing or corrupt; may be overwritten.
    Replaceable,
    /// Present but unreadable; must not be overwritten.
    Unreadable(String),
}

impl OnDisk {
    fn read(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match CoordinateTable::from_json(&bytes, &path.display().to_string()) {
                Ok(disk) => OnDisk::Table(disk.table),
                Err(e) => {
                    log::warn!("{}; it will be replaced", e);
                    OnDisk::Replaceable
                },
            },
            Err(e) if e.kind() == ErrorKind::NotFound => OnDisk::Replaceable,
            Err(e) => OnDisk::Unreadable(e.to_string()),
        }
    }
}

/// Starting point of one write: the table file's entries folded into the
/// caller's table, with the lock held until this is dropped.
struct WriteBase {
    _lock: Option<LockFile>,
    table: CoordinateTable,
    disk: Option<CoordinateTable>,
    writable: bool,
}

impl WriteBase {
    fn acquire(path: &Path, current: &CoordinateTable) -> Self {
        let lock = match LockFile::acquire(path, LOCK_TIMEOUT, LOCK_STALE_AFTER) {
            Ok(lock) => lock,
            Err(e) => {
                log::warn!(
                    "Cannot lock coordinate table {}: {}; keeping changes in memory",
                    path.display(),
                    e
                );
                return Self {
                    _lock: None,
                    table: current.clone(),
                    disk: None,
                    writable: false,
                };
            },
        };

        match OnDisk::read(path) {
            OnDisk::Table(disk) => {
                let table = if disk == *current {
                    disk.clone()
                } else {
                    merge(disk.entries(), current.entries()).table
                };
                Self {
                    _lock: Some(lock),
                    table,
                    disk: Some(disk),
                    writable: true,
                }
            },
            OnDisk::Replaceable => Self {
                _lock: Some(lock),
                table: current.clone(),
                disk: None,
                writable: true,
            },
            OnDisk::Unreadable(reason) => {
                log::warn!(
                    "Cannot read coordinate table {} ({}); keeping changes in memory",
                    path.display(),
                    reason
                );
                Self {
                    _lock: Some(lock),
                    table: current.clone(),
                    disk: None,
                    writable: false,
                }
            },
        }
    }

    /// Write `table` unless the file already holds it. Returns whether the
    /// file now holds `table`.
    fn persist(&self, path: &Path, table: &CoordinateTable) -> bool {
        if !self.writable {
            return false;
        }
        if self.disk.as_ref() == Some(table) {
            return true;
        }
        persist_logged(path, table)
    }
}

/// Durable signature → character table shared by all requests.
#[derive(Debug)]
pub struct CoordinateStore {
    path: PathBuf,
    snapshot: RwLock<Arc<CoordinateTable>>,
    writer: Mutex<()>,
}

impl CoordinateStore {
    /// Open the local table, recovering from a missing or corrupt file.
    ///
    /// # Arguments
    /// * `path` - Local, read-write table file
    /// * `bundled_path` - Shipped baseline table
    pub fn open(path: impl Into<PathBuf>, bundled_path: &Path) -> Result<(Self, StartupOutcome)> {
        let path = path.into();
        let name = path.display().to_string();
        let mut state = StartupState::Inspect;

        loop {
            state = match state {
                StartupState::Inspect => match fs::read(&path) {
                    Ok(bytes) => match CoordinateTable::from_json(&bytes, &name) {
                        Ok(local) => StartupState::Present(local),
                        Err(e) => StartupState::Corrupt(e.to_string()),
                    },
                    Err(e) if e.kind() == ErrorKind::NotFound => StartupState::Missing,
                    Err(e) => StartupState::Unreadable(e.to_string()),
                },
                StartupState::Missing => {
                    let baseline = load_baseline(bundled_path)?;
                    log::info!(
                        "Creating coordinate table {} from baseline ({} entries)",
                        name,
                        baseline.len()
                    );
                    let entries = baseline.len();
                    let table = persist_shared(&path, baseline);
                    StartupState::Ready(table, StartupOutcome::CopiedBaseline { entries })
                },
                StartupState::Present(local) => match load_baseline(bundled_path) {
                    Ok(baseline) => {
                        let merged = merge(baseline.entries(), local.table.entries());
                        let added = merged.table.len() - local.table.len();
                        let table = if merged.table != local.table {
                            log::info!("Merged {} baseline entries into {}", added, name);
                            persist_shared(&path, merged.table)
                        } else {
                            merged.table
                        };
                        let mut conflicts = local.conflicts;
                        conflicts.extend(merged.conflicts);
                        StartupState::Ready(table, StartupOutcome::Reconciled { added, conflicts })
                    },
                    Err(e) => {
                        log::warn!("{}; continuing with local table only", e);
                        StartupState::Ready(
                            local.table,
                            StartupOutcome::Reconciled {
                                added: 0,
                                conflicts: local.conflicts,
                            },
                        )
                    },
                },
                StartupState::Corrupt(reason) => {
                    log::warn!("Coordinate table {} unusable ({}), resetting to baseline", name, reason);
                    let baseline = load_baseline(bundled_path)?;
                    let table = persist_shared(&path, baseline);
                    StartupState::Ready(table, StartupOutcome::ResetToBaseline { reason })
                },
                StartupState::Unreadable(reason) => {
                    log::warn!(
                        "Coordinate table {} cannot be read ({}), using baseline without saving",
                        name,
                        reason
                    );
                    let baseline = load_baseline(bundled_path)?;
                    StartupState::Ready(baseline, StartupOutcome::LocalUnreadable { reason })
                },
                StartupState::Ready(table, outcome) => {
                    let store = Self {
                        path,
                        snapshot: RwLock::new(Arc::new(table)),
                        writer: Mutex::new(()),
                    };
                    return Ok((store, outcome));
                },
            };
        }
    }

    /// Path of the local table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current table snapshot.
    pub fn snapshot(&self) -> Arc<CoordinateTable> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Fast-path lookup.
    pub fn lookup(&self, signature: &ShapeSignature) -> Option<char> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(signature)
    }

    /// Add a confirmed mapping and persist the table.
    ///
    /// Idempotent for an existing identical mapping. An existing mapping to a
    /// different character is kept and reported as a conflict. Entries other
    /// writers saved to the table file are picked up on the way.
    pub fn record(&self, signature: ShapeSignature, character: char) -> RecordOutcome {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let base = WriteBase::acquire(&self.path, &current);

        match base.table.with_entry(CoorTableEntry::new(signature.clone(), character)) {
            Ok(next) => {
                let persisted = base.persist(&self.path, &next);
                self.publish(next);
                log::info!("Recorded '{}' in coordinate table", character);
                RecordOutcome::Inserted { persisted }
            },
            Err(existing) => {
                if base.table != *current {
                    self.publish(base.table.clone());
                }
                if existing == character {
                    return RecordOutcome::AlreadyPresent;
                }
                log::warn!(
                    "Not recording '{}' for signature {}: already mapped to '{}'",
                    character,
                    signature,
                    existing
                );
                RecordOutcome::Conflict { existing }
            },
        }
    }

    /// Merge a remote table into the local one.
    ///
    /// A remote table that cannot be parsed is ignored; the local table is never
    /// replaced by remote data.
    pub fn reconcile(&self, remote_bytes: &[u8]) -> ReconcileReport {
        let remote = match CoordinateTable::from_json(remote_bytes, "remote") {
            Ok(remote) => remote,
            Err(e) => {
                log::warn!("Ignoring remote coordinate table: {}", e);
                return ReconcileReport {
                    remote_corrupt: true,
                    ..ReconcileReport::default()
                };
            },
        };

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let base = WriteBase::acquire(&self.path, &current);
        let merged = merge(remote.table.entries(), base.table.entries());
        let added = merged.table.len() - base.table.len();
        let mut conflicts = remote.conflicts;
        conflicts.extend(merged.conflicts);

        let persisted = if base.disk.as_ref() == Some(&merged.table) {
            false
        } else {
            base.persist(&self.path, &merged.table)
        };
        if merged.table != *current {
            self.publish(merged.table);
        }
        if added > 0 {
            log::info!("Reconciled coordinate table: {} entries added", added);
        }
        ReconcileReport {
            added,
            conflicts,
            persisted,
            remote_corrupt: false,
        }
    }

    fn publish(&self, table: CoordinateTable) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }
}

fn load_baseline(path: &Path) -> Result<CoordinateTable> {
    let bytes = fs::read(path).map_err(|e| {
        Error::NoUsableTable(format!("bundled table {}: {}", path.display(), e))
    })?;
    let baseline = CoordinateTable::from_json(&bytes, &path.display().to_string())
        .map_err(|e| Error::NoUsableTable(e.to_string()))?;
    Ok(baseline.table)
}

/// Write a startup table under the lock, keeping whatever another writer
/// saved since the file was first read. Returns the table now current.
fn persist_shared(path: &Path, table: CoordinateTable) -> CoordinateTable {
    let base = WriteBase::acquire(path, &table);
    base.persist(path, &base.table);
    base.table
}

fn persist_logged(path: &Path, table: &CoordinateTable) -> bool {
    let written = table.to_json().and_then(|json| write_atomic(path, json.as_bytes()));
    match written {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to persist coordinate table {}: {}", path.display(), e);
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::deduplicate;

    fn sig(s: &str) -> ShapeSignature {
        ShapeSignature::from_encoded(s)
    }

    fn write_table(path: &Path, pairs: &[(&str, char)]) {
        let table = deduplicate(
            pairs
                .iter()
                .map(|&(s, c)| CoorTableEntry::new(sig(s), c)),
        )
        .table;
        fs::write(path, table.to_json().unwrap()).unwrap();
    }

    #[test]
    fn test_open_copies_baseline_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.json");
        write_table(&bundled, &[("sigA", '人')]);
        let local = dir.path().join("instance").join("coor.json");

        let (store, outcome) = CoordinateStore::open(&local, &bundled).unwrap();
        assert_eq!(outcome, StartupOutcome::CopiedBaseline { entries: 1 });
        assert_eq!(store.lookup(&sig("sigA")), Some('人'));
        assert!(local.exists());
    }

    #[test]
    fn test_open_resets_corrupt_table() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.json");
        write_table(&bundled, &[("sigA", '人')]);
        let local = dir.path().join("coor.json");
        fs::write(&local, b"[[\"sigZ\", \"z\"").unwrap();

        let (store, outcome) = CoordinateStore::open(&local, &bundled).unwrap();
        assert!(matches!(outcome, StartupOutcome::ResetToBaseline { .. }));
        assert_eq!(store.lookup(&sig("sigA")), Some('人'));
        let on_disk = CoordinateTable::from_json(&fs::read(&local).unwrap(), "t").unwrap();
        assert_eq!(on_disk.table.len(), 1);
    }

    #[test]
    fn test_open_leaves_unreadable_table_alone() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.json");
        write_table(&bundled, &[("sigA", '人')]);
        // A directory where the table file should be cannot be read, but it is
        // not a corrupt table either.
        let local = dir.path().join("coor.json");
        fs::create_dir(&local).unwrap();
        fs::write(local.join("learned"), b"keep").unwrap();

        let (store, outcome) = CoordinateStore::open(&local, &bundled).unwrap();
        assert!(matches!(outcome, StartupOutcome::LocalUnreadable { .. }));
        assert_eq!(store.lookup(&sig("sigA")), Some('人'));
        assert!(local.is_dir());
        assert_eq!(fs::read(local.join("learned")).unwrap(), b"keep");

        // Later writes stay in memory too.
        assert_eq!(
            store.record(sig("sigB"), '山'),
            RecordOutcome::Inserted { persisted: false }
        );
        assert_eq!(store.lookup(&sig("sigB")), Some('山'));
        assert!(local.join("learned").exists());
    }

    #[test]
    fn test_open_unreadable_table_without_baseline_fails() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("coor.json");
        fs::create_dir(&local).unwrap();

        let err = CoordinateStore::open(&local, &dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::NoUsableTable(_)));
        assert!(local.is_dir());
    }

    #[test]
    fn test_open_fails_without_any_table() {
        let dir = tempfile::tempdir().unwrap();
        let err = CoordinateStore::open(dir.path().join("a.json"), &dir.path().join("b.json"))
            .unwrap_err();
        assert!(matches!(err, Error::NoUsableTable(_)));
    }

    #[test]
    fn test_open_keeps_local_when_baseline_missing() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("coor.json");
        write_table(&local, &[("sigA", '火')]);

        let (store, outcome) =
            CoordinateStore::open(&local, &dir.path().join("missing.json")).unwrap();
        assert!(matches!(outcome, StartupOutcome::Reconciled { added: 0, .. }));
        assert_eq!(store.lookup(&sig("sigA")), Some('火'));
    }

    #[test]
    fn test_record_is_visible_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.json");
        write_table(&bundled, &[]);
        let local = dir.path().join("coor.json");
        let (store, _) = CoordinateStore::open(&local, &bundled).unwrap();

        assert_eq!(
            store.record(sig("sigB"), '山'),
            RecordOutcome::Inserted { persisted: true }
        );
        assert_eq!(store.lookup(&sig("sigB")), Some('山'));
        assert_eq!(store.record(sig("sigB"), '山'), RecordOutcome::AlreadyPresent);
        assert_eq!(
            store.record(sig("sigB"), '川'),
            RecordOutcome::Conflict { existing: '山' }
        );

        let on_disk = CoordinateTable::from_json(&fs::read(&local).unwrap(), "t").unwrap();
        assert_eq!(on_disk.table.lookup(&sig("sigB")), Some('山'));
    }

    #[test]
    fn test_snapshot_is_not_mutated_by_writers() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.json");
        write_table(&bundled, &[("sigA", '人')]);
        let (store, _) = CoordinateStore::open(dir.path().join("coor.json"), &bundled).unwrap();

        let before = store.snapshot();
        store.record(sig("sigC"), '日');
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn test_stores_sharing_a_file_keep_each_others_records() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.json");
        write_table(&bundled, &[]);
        let local = dir.path().join("coor.json");
        let (a, _) = CoordinateStore::open(&local, &bundled).unwrap();
        let (b, _) = CoordinateStore::open(&local, &bundled).unwrap();

        assert_eq!(a.record(sig("sigA"), '人'), RecordOutcome::Inserted { persisted: true });
        assert_eq!(b.record(sig("sigB"), '山'), RecordOutcome::Inserted { persisted: true });

        // b picked up a's entry while writing.
        assert_eq!(b.lookup(&sig("sigA")), Some('人'));
        let (reopened, _) = CoordinateStore::open(&local, &bundled).unwrap();
        assert_eq!(reopened.lookup(&sig("sigA")), Some('人'));
        assert_eq!(reopened.lookup(&sig("sigB")), Some('山'));
        assert!(!dir.path().join("coor.json.lock").exists());
    }

    #[test]
    fn test_record_reports_conflict_with_entry_from_other_store() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.json");
        write_table(&bundled, &[]);
        let local = dir.path().join("coor.json");
        let (a, _) = CoordinateStore::open(&local, &bundled).unwrap();
        let (b, _) = CoordinateStore::open(&local, &bundled).unwrap();

        a.record(sig("sigA"), '人');
        assert_eq!(b.record(sig("sigA"), '入'), RecordOutcome::Conflict { existing: '人' });
        assert_eq!(b.lookup(&sig("sigA")), Some('人'));
        assert_eq!(b.record(sig("sigA"), '人'), RecordOutcome::AlreadyPresent);
    }

    #[test]
    fn test_reconcile_keeps_entries_from_other_store() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.json");
        write_table(&bundled, &[]);
        let local = dir.path().join("coor.json");
        let (a, _) = CoordinateStore::open(&local, &bundled).unwrap();
        let (b, _) = CoordinateStore::open(&local, &bundled).unwrap();

        a.record(sig("sigA"), '人');
        let remote = deduplicate([CoorTableEntry::new(sig("sigR"), '川')])
            .table
            .to_json()
            .unwrap();
        let report = b.reconcile(remote.as_bytes());
        assert_eq!(report.added, 1);
        assert!(report.persisted);

        let on_disk = CoordinateTable::from_json(&fs::read(&local).unwrap(), "t").unwrap();
        assert_eq!(on_disk.table.lookup(&sig("sigA")), Some('人'));
        assert_eq!(on_disk.table.lookup(&sig("sigR")), Some('川'));
    }

    #[test]
    fn test_record_rewrites_table_corrupted_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.json");
        write_table(&bundled, &[("sigA", '人')]);
        let local = dir.path().join("coor.json");
        let (store, _) = CoordinateStore::open(&local, &bundled).unwrap();
        fs::write(&local, b"{ truncated").unwrap();

        assert_eq!(
            store.record(sig("sigB"), '山'),
            RecordOutcome::Inserted { persisted: true }
        );
        let on_disk = CoordinateTable::from_json(&fs::read(&local).unwrap(), "t").unwrap();
        assert_eq!(on_disk.table.len(), 2);
    }

    #[test]
    fn test_reconcile_ignores_corrupt_remote() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.json");
        write_table(&bundled, &[("sigA", '人')]);
        let (store, _) = CoordinateStore::open(dir.path().join("coor.json"), &bundled).unwrap();

        let report = store.reconcile(b"not json");
        assert!(report.remote_corrupt);
        assert_eq!(store.snapshot().len(), 1);
    }
}
