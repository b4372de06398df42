//! Coordinate table merge, deduplication and store tests.
//!
//! Covers the algebra of `deduplicate`/`merge` with proptest and the durable
//! store behaviour (recording, concurrent writers, reconciliation) on real
//! files in temporary directories.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use glyph_match::signature::ShapeSignature;
use glyph_match::table::{
    deduplicate, merge, CoorTableEntry, CoordinateStore, CoordinateTable, RecordOutcome,
    StartupOutcome,
};
use proptest::prelude::*;

fn e(sig: &str, ch: char) -> CoorTableEntry {
    CoorTableEntry::new(ShapeSignature::from_encoded(sig), ch)
}

fn entries_strategy() -> impl Strategy<Value = Vec<CoorTableEntry>> {
    prop::collection::vec(
        (0u8..12, prop::sample::select(vec!['人', '山', '火', '文', '口'])),
        0..30,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .map(|(s, c)| e(&format!("sig{}", s), c))
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_deduplicate_is_idempotent(entries in entries_strategy()) {
        let once = deduplicate(entries).table;
        let twice = deduplicate(once.entries().to_vec()).table;
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_merge_with_self_is_deduplicate(entries in entries_strategy()) {
        let merged = merge(&entries, &entries).table;
        prop_assert_eq!(merged, deduplicate(entries).table);
    }

    #[test]
    fn prop_table_is_sorted_and_unique(entries in entries_strategy()) {
        let table = deduplicate(entries).table;
        prop_assert!(table
            .entries()
            .windows(2)
            .all(|w| w[0].signature < w[1].signature));
    }

    #[test]
    fn prop_merge_commutes_without_conflicts(
        mapping in prop::collection::btree_map(0u8..40, prop::char::range('一', '龥'), 0..25),
        sides in prop::collection::vec(0u8..3, 25),
    ) {
        // Each mapping goes to the left table, the right table, or both.
        let mut left = Vec::new();
        let mut right = Vec::new();
        for ((s, c), side) in mapping.iter().zip(sides.iter()) {
            let entry = e(&format!("sig{}", s), *c);
            if *side != 1 {
                left.push(entry.clone());
            }
            if *side != 0 {
                right.push(entry);
            }
        }

        let ab = merge(&left, &right);
        let ba = merge(&right, &left);
        prop_assert!(ab.conflicts.is_empty());
        prop_assert_eq!(&ab.table, &ba.table);

        let expected: BTreeMap<String, char> = mapping
            .iter()
            .map(|(s, c)| (format!("sig{}", s), *c))
            .collect();
        prop_assert_eq!(ab.table.len(), expected.len());
        for entry in ab.table.entries() {
            prop_assert_eq!(expected.get(entry.signature.as_str()), Some(&entry.character));
        }
    }

    #[test]
    fn prop_merge_output_ignores_input_order(entries in entries_strategy()) {
        let table = deduplicate(entries).table;
        let mut shuffled = table.entries().to_vec();
        shuffled.reverse();
        let local = [e("sigLocal", '口')];
        prop_assert_eq!(merge(table.entries(), &local).table, merge(&shuffled, &local).table);
    }
}

#[test]
fn test_reconcile_adds_remote_entries() {
    let local = [e("sigA", '人')];
    let remote = [e("sigA", '人'), e("sigB", '山')];
    let merged = merge(&remote, &local);
    assert_eq!(merged.table.entries(), &[e("sigA", '人'), e("sigB", '山')]);
    assert!(merged.conflicts.is_empty());
}

#[test]
fn test_reconcile_keeps_local_on_conflict() {
    let local = [e("sigA", '火')];
    let remote = [e("sigA", '人')];
    let merged = merge(&remote, &local);
    assert_eq!(merged.table.entries(), &[e("sigA", '火')]);
    assert_eq!(merged.conflicts.len(), 1);
    assert_eq!(merged.conflicts[0].kept, '火');
    assert_eq!(merged.conflicts[0].discarded, '人');
}

fn write_table(path: &Path, entries: Vec<CoorTableEntry>) {
    let table = deduplicate(entries).table;
    fs::write(path, table.to_json().unwrap()).unwrap();
}

fn open_store(dir: &Path, bundled: Vec<CoorTableEntry>) -> CoordinateStore {
    let bundled_path = dir.join("bundled.json");
    write_table(&bundled_path, bundled);
    CoordinateStore::open(dir.join("instance").join("coor.json"), &bundled_path)
        .unwrap()
        .0
}

#[test]
fn test_lookup_after_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), vec![]);
    let sig = ShapeSignature::from_encoded("0,0 500,1000 1000,0");

    assert_eq!(store.lookup(&sig), None);
    assert!(matches!(store.record(sig.clone(), '人'), RecordOutcome::Inserted { .. }));
    assert_eq!(store.lookup(&sig), Some('人'));
}

#[test]
fn test_concurrent_records_are_all_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(dir.path(), vec![e("base", '口')]));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    let sig = ShapeSignature::from_encoded(format!("t{}-{}", t, i));
                    let ch = char::from_u32(0x4E00 + t * 10 + i).unwrap();
                    store.record(sig, ch);
                    // Readers never block on the writer's file IO.
                    assert_eq!(store.lookup(&ShapeSignature::from_encoded("base")), Some('口'));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.snapshot().len(), 81);
    let on_disk = CoordinateTable::from_json(&fs::read(store.path()).unwrap(), "disk").unwrap();
    assert_eq!(on_disk.table, *store.snapshot());
}

#[test]
fn test_stores_on_one_file_lose_no_records() {
    let dir = tempfile::tempdir().unwrap();
    let bundled = dir.path().join("bundled.json");
    write_table(&bundled, vec![e("base", '口')]);
    let local = dir.path().join("instance").join("coor.json");

    // Each worker opens its own store, as separate processes would.
    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let local = local.clone();
            let bundled = bundled.clone();
            thread::spawn(move || {
                let (store, _) = CoordinateStore::open(&local, &bundled).unwrap();
                for i in 0..10 {
                    let sig = ShapeSignature::from_encoded(format!("w{}-{}", t, i));
                    let ch = char::from_u32(0x5000 + t * 10 + i).unwrap();
                    assert_eq!(
                        store.record(sig, ch),
                        RecordOutcome::Inserted { persisted: true }
                    );
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let on_disk = CoordinateTable::from_json(&fs::read(&local).unwrap(), "disk").unwrap();
    assert_eq!(on_disk.table.len(), 41);
    assert_eq!(
        on_disk.table.lookup(&ShapeSignature::from_encoded("w3-9")),
        char::from_u32(0x5000 + 39)
    );
}

#[test]
fn test_reconcile_persists_merged_table() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), vec![e("sigA", '火')]);

    let remote = deduplicate(vec![e("sigA", '人'), e("sigB", '山')])
        .table
        .to_json()
        .unwrap();
    let report = store.reconcile(remote.as_bytes());
    assert_eq!(report.added, 1);
    assert_eq!(report.conflicts.len(), 1);
    assert!(report.persisted);
    assert!(!report.remote_corrupt);

    let on_disk = CoordinateTable::from_json(&fs::read(store.path()).unwrap(), "disk").unwrap();
    assert_eq!(on_disk.table.entries(), &[e("sigA", '火'), e("sigB", '山')]);

    // Reconciling again changes nothing.
    let again = store.reconcile(remote.as_bytes());
    assert_eq!(again.added, 0);
    assert!(!again.persisted);
}

#[test]
fn test_startup_merges_new_baseline_entries() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("coor.json");
    let bundled = dir.path().join("bundled.json");
    write_table(&local, vec![e("sigA", '火')]);
    write_table(&bundled, vec![e("sigA", '人'), e("sigB", '山')]);

    let (store, outcome) = CoordinateStore::open(&local, &bundled).unwrap();
    match outcome {
        StartupOutcome::Reconciled { added, conflicts } => {
            assert_eq!(added, 1);
            assert_eq!(conflicts.len(), 1);
        },
        other => panic!("unexpected startup outcome {:?}", other),
    }
    assert_eq!(store.lookup(&ShapeSignature::from_encoded("sigA")), Some('火'));
    assert_eq!(store.lookup(&ShapeSignature::from_encoded("sigB")), Some('山'));
}

#[test]
fn test_table_file_is_human_readable() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), vec![e("b", '山'), e("a", '人')]);
    let text = fs::read_to_string(store.path()).unwrap();
    assert_eq!(text, "[\n  [\"a\",\"人\"],\n  [\"b\",\"山\"]\n]\n");
}
