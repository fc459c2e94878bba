//! In-memory symbol index: canonical name -> entry

use crate::paths::ScanConfig;
use crate::symbol::canonical_name;
use crate::ClassdexError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Whether a symbol was located or is known to be absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolStatus {
    Found,
    Missing,
}

/// One index record. `location` is `Some` exactly when `status` is `Found`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Name as declared or requested, e.g. `App\Foo`
    pub name: String,
    pub location: Option<PathBuf>,
    pub namespace: Option<String>,
    pub status: SymbolStatus,
    /// Unix seconds of the most recent scan touching this entry
    pub last_check_time: u64,
    pub last_check_count: u32,
}

impl IndexEntry {
    pub fn is_found(&self) -> bool {
        self.status == SymbolStatus::Found
    }
}

/// Current wall-clock time as Unix seconds
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Index of known symbols, keyed by canonical name.
///
/// The first file to claim a name keeps it; later claims are rejected.
#[derive(Debug, Default)]
pub struct IndexStore {
    entries: BTreeMap<String, IndexEntry>,
    ignore: BTreeMap<String, BTreeSet<PathBuf>>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store honoring the ignore overrides of `scan`
    pub fn with_ignores(scan: &ScanConfig) -> Self {
        Self {
            entries: BTreeMap::new(),
            ignore: scan.ignore.clone(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&IndexEntry> {
        self.entries.get(&canonical_name(name))
    }

    /// Record that `name` is declared in `location`.
    ///
    /// Returns `DuplicateSymbol` if another file already holds the name.
    /// A declaration listed in the ignore overrides is skipped without error.
    /// A `Missing` entry is upgraded in place, keeping its check count.
    pub fn record_found(
        &mut self,
        name: &str,
        namespace: Option<&str>,
        location: &Path,
    ) -> crate::Result<()> {
        self.record_found_at(name, namespace, location, now_secs())
    }

    pub(crate) fn record_found_at(
        &mut self,
        name: &str,
        namespace: Option<&str>,
        location: &Path,
        now: u64,
    ) -> crate::Result<()> {
        let key = canonical_name(name);

        if self
            .ignore
            .get(&key)
            .is_some_and(|files| files.contains(location))
        {
            debug!(symbol = %key, file = %location.display(), "ignoring declaration");
            return Ok(());
        }

        if let Some(existing) = self.entries.get_mut(&key) {
            match &existing.location {
                Some(held) if held.as_path() != location => {
                    return Err(ClassdexError::DuplicateSymbol {
                        name: key,
                        existing: held.clone(),
                        rejected: location.to_path_buf(),
                    });
                }
                _ => {
                    existing.name = name.to_string();
                    existing.location = Some(location.to_path_buf());
                    existing.namespace = namespace.map(str::to_string);
                    existing.status = SymbolStatus::Found;
                    existing.last_check_time = now;
                    existing.last_check_count = existing.last_check_count.saturating_add(1);
                    return Ok(());
                }
            }
        }

        self.entries.insert(
            key,
            IndexEntry {
                name: name.to_string(),
                location: Some(location.to_path_buf()),
                namespace: namespace.map(str::to_string),
                status: SymbolStatus::Found,
                last_check_time: now,
                last_check_count: 1,
            },
        );
        Ok(())
    }

    /// Insert or refresh a `Missing` entry for `name`
    pub fn record_missing(&mut self, name: &str) {
        self.record_missing_at(name, now_secs())
    }

    pub(crate) fn record_missing_at(&mut self, name: &str, now: u64) {
        let entry = self
            .entries
            .entry(canonical_name(name))
            .or_insert_with(|| IndexEntry {
                name: name.to_string(),
                location: None,
                namespace: None,
                status: SymbolStatus::Missing,
                last_check_time: now,
                last_check_count: 0,
            });

        entry.location = None;
        entry.namespace = None;
        entry.status = SymbolStatus::Missing;
        entry.last_check_time = now;
        entry.last_check_count = entry.last_check_count.saturating_add(1);
    }

    /// Every entry, ordered by canonical key
    pub fn all_entries(&self) -> &BTreeMap<String, IndexEntry> {
        &self.entries
    }

    /// Replace the contents with entries loaded from a cache
    pub fn replace_entries(&mut self, entries: BTreeMap<String, IndexEntry>) {
        self.entries = entries;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn found_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_found()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut store = IndexStore::new();
        store
            .record_found("App\\Foo", Some("App"), Path::new("/src/Foo.php"))
            .unwrap();

        let entry = store.lookup("\\APP\\foo").unwrap();
        assert_eq!(entry.location.as_deref(), Some(Path::new("/src/Foo.php")));
        assert_eq!(entry.namespace.as_deref(), Some("App"));
        assert!(entry.is_found());
    }

    #[test]
    fn test_first_claim_wins() {
        let mut store = IndexStore::new();
        store
            .record_found("App\\Foo", Some("App"), Path::new("/a/Foo.php"))
            .unwrap();

        let err = store
            .record_found("App\\Foo", Some("Other"), Path::new("/b/Foo.php"))
            .unwrap_err();
        assert!(matches!(err, ClassdexError::DuplicateSymbol { .. }));

        let entry = store.lookup("App\\Foo").unwrap();
        assert_eq!(entry.location.as_deref(), Some(Path::new("/a/Foo.php")));
        assert_eq!(entry.namespace.as_deref(), Some("App"));
    }

    #[test]
    fn test_same_location_reclaim_is_not_duplicate() {
        let mut store = IndexStore::new();
        let loc = Path::new("/a/Foo.php");
        store.record_found_at("Foo", None, loc, 10).unwrap();
        store.record_found_at("Foo", None, loc, 20).unwrap();

        let entry = store.lookup("Foo").unwrap();
        assert_eq!(entry.last_check_time, 20);
        assert_eq!(entry.last_check_count, 2);
    }

    #[test]
    fn test_ignored_declaration_records_nothing() {
        let scan = ScanConfig {
            ignore: [(
                "\\app\\foo".to_string(),
                [PathBuf::from("/old/Foo.php")].into_iter().collect(),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let mut store = IndexStore::with_ignores(&scan);

        store
            .record_found("App\\Foo", Some("App"), Path::new("/old/Foo.php"))
            .unwrap();
        assert!(store.lookup("App\\Foo").is_none());

        store
            .record_found("App\\Foo", Some("App"), Path::new("/new/Foo.php"))
            .unwrap();
        assert_eq!(
            store.lookup("App\\Foo").unwrap().location.as_deref(),
            Some(Path::new("/new/Foo.php"))
        );
    }

    #[test]
    fn test_record_missing_counts_checks() {
        let mut store = IndexStore::new();
        store.record_missing_at("Missing\\Thing", 100);

        let entry = store.lookup("missing\\thing").unwrap();
        assert_eq!(entry.status, SymbolStatus::Missing);
        assert_eq!(entry.location, None);
        assert_eq!(entry.last_check_count, 1);

        store.record_missing_at("Missing\\Thing", 200);
        let entry = store.lookup("Missing\\Thing").unwrap();
        assert_eq!(entry.last_check_time, 200);
        assert_eq!(entry.last_check_count, 2);
    }

    #[test]
    fn test_missing_entry_upgrades_to_found() {
        let mut store = IndexStore::new();
        store.record_missing_at("Late", 1);
        store
            .record_found_at("Late", None, Path::new("/x/Late.php"), 2)
            .unwrap();

        let entry = store.lookup("Late").unwrap();
        assert!(entry.is_found());
        assert_eq!(entry.last_check_count, 2);
    }

    #[test]
    fn test_all_entries_ordered_by_key() {
        let mut store = IndexStore::new();
        store.record_found("Zed", None, Path::new("/z.php")).unwrap();
        store.record_found("alpha", None, Path::new("/a.php")).unwrap();
        store.record_missing("Mid");

        let keys: Vec<&String> = store.all_entries().keys().collect();
        assert_eq!(keys, vec!["\\alpha", "\\mid", "\\zed"]);
        assert_eq!(store.found_count(), 2);
    }
}
