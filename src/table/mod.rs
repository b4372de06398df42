//! Coordinate table: the learned signature → character mapping.
//!
//! A [`CoordinateTable`] is always canonical: sorted by signature, at most one
//! entry per signature. Raw entry lists (a freshly read file, a concatenation of
//! two tables) become canonical through [`deduplicate`], which resolves
//! conflicting characters deterministically and reports them as
//! [`MappingConflict`] diagnostics instead of failing.
//!
//! # File format
//!
//! A JSON array of `[signature, character]` pairs, one pair per line, sorted by
//! signature:
//!
//! ```text
//! [
//!   ["0,0 0,1000 1000,1000 1000,0","口"],
//!   ["0,0 500,1000 1000,0","人"]
//! ]
//! ```

pub mod store;

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::signature::ShapeSignature;

pub use store::{CoordinateStore, RecordOutcome, ReconcileReport, StartupOutcome};

/// One learned mapping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoorTableEntry {
    /// Normalised outline
    pub signature: ShapeSignature,
    /// Character the outline represents
    pub character: char,
}

impl CoorTableEntry {
    /// Create an entry.
    pub fn new(signature: ShapeSignature, character: char) -> Self {
        Self {
            signature,
            character,
        }
    }
}

/// Same signature claimed by two different characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingConflict {
    /// Contested signature
    pub signature: ShapeSignature,
    /// Character kept in the table
    pub kept: char,
    /// Character dropped
    pub discarded: char,
}

/// Canonical table plus the conflicts found while building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Sorted, conflict-free table
    pub table: CoordinateTable,
    /// Conflicts resolved on the way
    pub conflicts: Vec<MappingConflict>,
}

/// Sorted, deduplicated signature → character table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinateTable {
    entries: Vec<CoorTableEntry>,
}

impl CoordinateTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in signature order.
    pub fn entries(&self) -> &[CoorTableEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary search for a signature.
    pub fn lookup(&self, signature: &ShapeSignature) -> Option<char> {
        self.entries
            .binary_search_by(|e| e.signature.cmp(signature))
            .ok()
            .map(|i| self.entries[i].character)
    }

    /// Copy of the table with one more entry, if the signature is new.
    ///
    /// Returns `Err(existing)` when the signature is already mapped.
    pub fn with_entry(&self, entry: CoorTableEntry) -> std::result::Result<Self, char> {
        match self
            .entries
            .binary_search_by(|e| e.signature.cmp(&entry.signature))
        {
            Ok(i) => Err(self.entries[i].character),
            Err(i) => {
                let mut entries = Vec::with_capacity(self.entries.len() + 1);
                entries.extend_from_slice(&self.entries[..i]);
                entries.push(entry);
                entries.extend_from_slice(&self.entries[i..]);
                Ok(Self { entries })
            },
        }
    }

    /// Parse a table file. The result is deduplicated.
    pub fn from_json(bytes: &[u8], source_name: &str) -> Result<Reconciled> {
        let pairs: Vec<(String, char)> =
            serde_json::from_slice(bytes).map_err(|e| Error::table_corrupt(source_name, e))?;
        Ok(deduplicate(pairs.into_iter().map(|(sig, ch)| {
            CoorTableEntry::new(ShapeSignature::from_encoded(sig), ch)
        })))
    }

    /// Serialize to the one-pair-per-line JSON layout.
    pub fn to_json(&self) -> Result<String> {
        let mut out = String::from("[\n");
        for (i, entry) in self.entries.iter().enumerate() {
            let pair = serde_json::to_string(&(entry.signature.as_str(), entry.character))?;
            let sep = if i + 1 < self.entries.len() { "," } else { "" };
            let _ = writeln!(out, "  {}{}", pair, sep);
        }
        out.push_str("]\n");
        Ok(out)
    }
}

/// Collapse repeated entries into a canonical table.
///
/// Entries are stably sorted by signature, so for each signature the first
/// occurrence in the input wins. Identical repeats are dropped silently; a
/// repeat with a different character is dropped and reported.
pub fn deduplicate(entries: impl IntoIterator<Item = CoorTableEntry>) -> Reconciled {
    let mut entries: Vec<CoorTableEntry> = entries.into_iter().collect();
    entries.sort_by(|a, b| a.signature.cmp(&b.signature));

    let mut kept: Vec<CoorTableEntry> = Vec::with_capacity(entries.len());
    let mut conflicts = Vec::new();
    for entry in entries {
        match kept.last() {
            Some(last) if last.signature == entry.signature => {
                if last.character != entry.character
                    && !conflicts.iter().any(|c: &MappingConflict| {
                        c.signature == entry.signature && c.discarded == entry.character
                    })
                {
                    conflicts.push(MappingConflict {
                        signature: entry.signature,
                        kept: last.character,
                        discarded: entry.character,
                    });
                }
            },
            _ => kept.push(entry),
        }
    }

    for c in &conflicts {
        log::warn!(
            "Conflicting mapping for signature {}: keeping '{}', dropping '{}'",
            c.signature,
            c.kept,
            c.discarded
        );
    }

    Reconciled {
        table: CoordinateTable { entries: kept },
        conflicts,
    }
}

/// Union of two tables keyed by signature.
///
/// When both map a signature to different characters the local entry wins:
/// local entries may come from confirmed slow matches, the remote table is a
/// shipped baseline. Output order depends only on content.
pub fn merge(remote: &[CoorTableEntry], local: &[CoorTableEntry]) -> Reconciled {
    deduplicate(local.iter().chain(remote.iter()).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(sig: &str, ch: char) -> CoorTableEntry {
        CoorTableEntry::new(ShapeSignature::from_encoded(sig), ch)
    }

    #[test]
    fn test_deduplicate_sorts_and_drops_repeats() {
        let r = deduplicate(vec![e("b", '山'), e("a", '人'), e("b", '山')]);
        assert_eq!(r.table.entries(), &[e("a", '人'), e("b", '山')]);
        assert!(r.conflicts.is_empty());
    }

    #[test]
    fn test_deduplicate_first_occurrence_wins() {
        let r = deduplicate(vec![e("a", '火'), e("a", '人')]);
        assert_eq!(r.table.entries(), &[e("a", '火')]);
        assert_eq!(
            r.conflicts,
            vec![MappingConflict {
                signature: ShapeSignature::from_encoded("a"),
                kept: '火',
                discarded: '人',
            }]
        );
    }

    #[test]
    fn test_merge_prefers_local() {
        let local = deduplicate(vec![e("sigA", '火')]).table;
        let remote = deduplicate(vec![e("sigA", '人')]).table;
        let merged = merge(remote.entries(), local.entries());
        assert_eq!(merged.table.entries(), &[e("sigA", '火')]);
        assert_eq!(merged.conflicts.len(), 1);
    }

    #[test]
    fn test_merge_adds_remote_entries() {
        let local = deduplicate(vec![e("sigA", '人')]).table;
        let remote = deduplicate(vec![e("sigA", '人'), e("sigB", '山')]).table;
        let merged = merge(remote.entries(), local.entries());
        assert_eq!(merged.table.entries(), &[e("sigA", '人'), e("sigB", '山')]);
        assert!(merged.conflicts.is_empty());
    }

    #[test]
    fn test_lookup_and_with_entry() {
        let table = deduplicate(vec![e("m", 'M'), e("c", 'C')]).table;
        assert_eq!(table.lookup(&ShapeSignature::from_encoded("c")), Some('C'));
        assert_eq!(table.lookup(&ShapeSignature::from_encoded("x")), None);

        let grown = table.with_entry(e("f", 'F')).unwrap();
        assert_eq!(grown.len(), 3);
        assert_eq!(grown.entries()[1], e("f", 'F'));
        assert_eq!(table.len(), 2);

        assert_eq!(grown.with_entry(e("f", 'X')), Err('F'));
    }

    #[test]
    fn test_json_layout() {
        let table = deduplicate(vec![e("0,0 5,5", '人'), e("0,0 1,1", '口')]).table;
        let json = table.to_json().unwrap();
        assert_eq!(json, "[\n  [\"0,0 1,1\",\"口\"],\n  [\"0,0 5,5\",\"人\"]\n]\n");

        let back = CoordinateTable::from_json(json.as_bytes(), "test").unwrap();
        assert_eq!(back.table, table);
    }

    #[test]
    fn test_empty_table_json() {
        let json = CoordinateTable::new().to_json().unwrap();
        assert_eq!(json, "[\n]\n");
        let back = CoordinateTable::from_json(json.as_bytes(), "test").unwrap();
        assert!(back.table.is_empty());
    }

    #[test]
    fn test_corrupt_json_is_table_corrupt() {
        let err = CoordinateTable::from_json(b"[[\"a\", \"x\"", "local").unwrap_err();
        assert!(matches!(err, Error::TableCorrupt { .. }));
        // Multi-character strings are not a single character.
        let err = CoordinateTable::from_json(br#"[["a", "xy"]]"#, "local").unwrap_err();
        assert!(matches!(err, Error::TableCorrupt { .. }));
    }
}
