//! Cache persistence: one JSON file per scan configuration.
//!
//! The file name embeds a SHA-256 of the resolved include, exclude and
//! ignore settings, so processes configured differently never share a
//! cache. Writes go through a temp file and a rename; readers never see a
//! partial file.

use crate::error::CacheError;
use crate::paths::ScanConfig;
use crate::store::{now_secs, IndexEntry, IndexStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Format version written into every cache file
pub const CACHE_VERSION: &str = env!("CARGO_PKG_VERSION");

const CACHE_PREFIX: &str = "classdex";
const CACHE_EXTENSION: &str = "json";

/// Serialized cache file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: String,
    pub identity: String,
    pub written_at: u64,
    pub entries: BTreeMap<String, IndexEntry>,
}

/// Just enough of a cache file to check its version before trusting the rest
#[derive(Deserialize)]
struct VersionProbe {
    version: String,
}

/// Stable identity for a scan configuration.
///
/// Hashes include paths in order, then the sorted exclude set, then the
/// sorted ignore map. Extensions do not participate.
pub fn cache_identity(scan: &ScanConfig) -> String {
    let mut hasher = Sha256::new();

    hasher.update(b"in\0");
    for path in &scan.include {
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update(b"\0");
    }

    hasher.update(b"ex\0");
    for path in &scan.exclude {
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update(b"\0");
    }

    hasher.update(b"ign\0");
    for (symbol, files) in &scan.ignore {
        hasher.update(symbol.as_bytes());
        hasher.update(b"=");
        for file in files {
            hasher.update(file.as_os_str().as_encoded_bytes());
            hasher.update(b"\0");
        }
        hasher.update(b"\n");
    }

    hex::encode(hasher.finalize())
}

/// Cache file location and policy for one identity
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    identity: String,
    max_age: Option<Duration>,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, scan: &ScanConfig) -> Self {
        Self {
            dir: dir.into(),
            identity: cache_identity(scan),
            max_age: None,
        }
    }

    /// Discard caches older than `max_age` on read
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{}",
            CACHE_PREFIX, self.identity, CACHE_EXTENSION
        ))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{}.lock",
            CACHE_PREFIX, self.identity, CACHE_EXTENSION
        ))
    }

    pub fn exists(&self) -> bool {
        self.cache_path().exists()
    }

    /// Load the persisted index.
    ///
    /// A file with the wrong version, past its max age, or that fails to
    /// parse is deleted before the error is returned.
    pub fn read(&self) -> Result<BTreeMap<String, IndexEntry>, CacheError> {
        let path = self.cache_path();

        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::NotFound(path));
            }
            Err(e) => {
                return Err(CacheError::Corrupt {
                    path,
                    message: e.to_string(),
                });
            }
        };

        if let Some(max_age) = self.max_age {
            if let Some(age) = file_age(&path) {
                if age > max_age {
                    self.discard(&path, "expired");
                    return Err(CacheError::Expired {
                        age_secs: age.as_secs(),
                        max_age_secs: max_age.as_secs(),
                    });
                }
            }
        }

        let probe: VersionProbe = match serde_json::from_str(&content) {
            Ok(p) => p,
            Err(e) => {
                self.discard(&path, "unparseable");
                return Err(CacheError::Corrupt {
                    path,
                    message: e.to_string(),
                });
            }
        };

        if probe.version != CACHE_VERSION {
            self.discard(&path, "version mismatch");
            return Err(CacheError::VersionMismatch {
                found: probe.version,
                expected: CACHE_VERSION.to_string(),
            });
        }

        let file: CacheFile = match serde_json::from_str(&content) {
            Ok(f) => f,
            Err(e) => {
                self.discard(&path, "unparseable");
                return Err(CacheError::Corrupt {
                    path,
                    message: e.to_string(),
                });
            }
        };

        debug!(path = %path.display(), entries = file.entries.len(), "read cache");
        Ok(file.entries)
    }

    /// Persist the full index, replacing any previous cache atomically
    pub fn write(&self, store: &IndexStore) -> crate::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let file = CacheFile {
            version: CACHE_VERSION.to_string(),
            identity: self.identity.clone(),
            written_at: now_secs(),
            entries: store.all_entries().clone(),
        };
        let json = serde_json::to_vec(&file)?;

        let path = self.cache_path();
        let temp = self.dir.join(format!(
            "{}.{}.{}.tmp.{}",
            CACHE_PREFIX,
            self.identity,
            CACHE_EXTENSION,
            std::process::id()
        ));

        if let Err(e) = fs::write(&temp, json) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        set_world_readable(&temp)?;
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        debug!(path = %path.display(), entries = store.len(), "wrote cache");
        Ok(())
    }

    /// Delete the cache file; returns whether one existed
    pub fn delete(&self) -> crate::Result<bool> {
        match fs::remove_file(self.cache_path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn discard(&self, path: &Path, reason: &str) {
        debug!(path = %path.display(), reason, "deleting stale cache");
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "could not delete stale cache");
            }
        }
    }
}

/// Time since `path` was last modified
pub(crate) fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

#[cfg(unix)]
fn set_world_readable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_world_readable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SymbolStatus;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn scan_config(include: &[&str], exclude: &[&str]) -> ScanConfig {
        ScanConfig {
            include: include.iter().map(PathBuf::from).collect(),
            exclude: exclude.iter().map(PathBuf::from).collect(),
            ignore: BTreeMap::new(),
            extensions: vec!["php".to_string()],
        }
    }

    fn sample_store() -> IndexStore {
        let mut store = IndexStore::new();
        store
            .record_found("App\\Foo", Some("App"), Path::new("/src/a/Foo.php"))
            .unwrap();
        store
            .record_found("Bar", None, Path::new("/src/Bar.php"))
            .unwrap();
        store.record_missing("Missing\\Thing");
        store
    }

    #[test]
    fn test_identity_is_deterministic() {
        let a = scan_config(&["/src", "/lib"], &["/src/vendor"]);
        let b = scan_config(&["/src", "/lib"], &["/src/vendor"]);
        assert_eq!(cache_identity(&a), cache_identity(&b));
        assert_eq!(cache_identity(&a).len(), 64);
    }

    #[test]
    fn test_identity_differs_on_any_change() {
        let base = scan_config(&["/src", "/lib"], &["/src/vendor"]);
        let reordered = scan_config(&["/lib", "/src"], &["/src/vendor"]);
        let other_exclude = scan_config(&["/src", "/lib"], &["/src/tests"]);
        let moved = scan_config(&["/src"], &["/lib", "/src/vendor"]);
        let mut ignored = base.clone();
        ignored.ignore.insert(
            "\\app\\foo".to_string(),
            [PathBuf::from("/src/Foo.php")].into_iter().collect::<BTreeSet<_>>(),
        );

        let ids: BTreeSet<String> = [&base, &reordered, &other_exclude, &moved, &ignored]
            .iter()
            .map(|c| cache_identity(c))
            .collect();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_identity_ignores_extensions() {
        let a = scan_config(&["/src"], &[]);
        let mut b = a.clone();
        b.extensions = vec!["inc".to_string()];
        assert_eq!(cache_identity(&a), cache_identity(&b));
    }

    #[test]
    fn test_write_then_read_restores_entries() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), &scan_config(&["/src"], &[]));
        let store = sample_store();

        cache.write(&store).unwrap();
        let entries = cache.read().unwrap();

        assert_eq!(&entries, store.all_entries());
        assert_eq!(entries["\\missing\\thing"].status, SymbolStatus::Missing);
    }

    #[cfg(unix)]
    #[test]
    fn test_written_cache_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), &scan_config(&["/src"], &[]));
        cache.write(&sample_store()).unwrap();

        let mode = fs::metadata(cache.cache_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o004, 0o004);
    }

    #[test]
    fn test_read_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), &scan_config(&["/src"], &[]));
        let err = cache.read().unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
        assert!(!err.is_stale());
    }

    #[test]
    fn test_version_mismatch_deletes_file() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), &scan_config(&["/src"], &[]));
        fs::write(
            cache.cache_path(),
            r#"{"version":"0.0.0-old","entries":"whatever"}"#,
        )
        .unwrap();

        let err = cache.read().unwrap_err();
        assert!(matches!(err, CacheError::VersionMismatch { .. }));
        assert!(!cache.exists());
    }

    #[test]
    fn test_corrupt_file_is_deleted() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), &scan_config(&["/src"], &[]));
        fs::write(cache.cache_path(), "not json").unwrap();

        assert!(matches!(
            cache.read().unwrap_err(),
            CacheError::Corrupt { .. }
        ));
        assert!(!cache.exists());
    }

    #[test]
    fn test_expired_cache_is_deleted() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), &scan_config(&["/src"], &[]))
            .with_max_age(Some(Duration::from_millis(1)));
        cache.write(&sample_store()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert!(matches!(
            cache.read().unwrap_err(),
            CacheError::Expired { .. }
        ));
        assert!(!cache.exists());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();
        // The cache directory path is a regular file, so nothing can be created under it.
        let cache = CacheStore::new(blocker.join("sub"), &scan_config(&["/src"], &[]));

        assert!(cache.write(&sample_store()).is_err());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path(), &scan_config(&["/src"], &[]));
        cache.write(&sample_store()).unwrap();

        assert!(cache.delete().unwrap());
        assert!(!cache.delete().unwrap());
    }

    #[test]
    fn test_lock_path_sits_beside_cache() {
        let cache = CacheStore::new("/tmp", &scan_config(&["/src"], &[]));
        let lock = cache.lock_path();
        assert_eq!(
            lock.to_string_lossy(),
            format!("{}.lock", cache.cache_path().to_string_lossy())
        );
    }
}
