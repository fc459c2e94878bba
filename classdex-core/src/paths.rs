//! Path normalization and the resolved scan configuration

use crate::config::Config;
use crate::symbol::canonical_name;
use crate::ClassdexError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Resolve a configured path to its canonical absolute form
pub fn resolve(path: &str) -> crate::Result<PathBuf> {
    Path::new(path)
        .canonicalize()
        .map_err(|_| ClassdexError::PathNotFound(PathBuf::from(path)))
}

/// Canonicalize each path, dropping (with a warning) those that do not exist.
///
/// Order is preserved and repeated entries are kept once.
pub fn normalize(paths: &[String]) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(paths.len());

    for path in paths {
        match resolve(path) {
            Ok(resolved) => {
                if seen.insert(resolved.clone()) {
                    out.push(resolved);
                }
            }
            Err(e) => warn!(path = %path, error = %e, "skipping configured path"),
        }
    }

    out
}

/// Scan configuration with every path resolved.
///
/// Immutable for a run. The sorted collections keep the cache identity
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanConfig {
    /// Roots scanned in order
    pub include: Vec<PathBuf>,
    /// Directories pruned from every walk, compared literally
    pub exclude: BTreeSet<PathBuf>,
    /// Canonical symbol key -> files whose declaration of it is ignored
    pub ignore: BTreeMap<String, BTreeSet<PathBuf>>,
    /// Recognized source file extensions
    pub extensions: Vec<String>,
}

impl ScanConfig {
    pub fn from_config(config: &Config) -> Self {
        let include = normalize(&config.paths.include);
        let exclude = normalize(&config.paths.exclude).into_iter().collect();

        let mut ignore: BTreeMap<String, BTreeSet<PathBuf>> = BTreeMap::new();
        for (symbol, targets) in &config.ignore {
            let files: Vec<String> = targets.paths().into_iter().map(str::to_string).collect();
            let resolved = normalize(&files);
            if resolved.is_empty() {
                continue;
            }
            ignore
                .entry(canonical_name(symbol))
                .or_default()
                .extend(resolved);
        }

        Self {
            include,
            exclude,
            ignore,
            extensions: config.scan.extensions.clone(),
        }
    }

    /// Whether `path` carries one of the recognized extensions
    pub fn has_source_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x == e))
            .unwrap_or(false)
    }
}
