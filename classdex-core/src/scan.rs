//! Directory walking and line-oriented declaration extraction.
//!
//! Extraction is deliberately shallow: each line is matched on its own
//! against a namespace pattern and a declaration pattern. There is no
//! awareness of blocks, comments or string literals, so a line inside a
//! docblock or heredoc that reads like a declaration is reported as one,
//! and a second `namespace` statement re-labels every declaration after it.

use crate::symbol::qualified_name;
use ignore::WalkBuilder;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

static NAMESPACE_RE: OnceLock<Regex> = OnceLock::new();
static DECLARATION_RE: OnceLock<Regex> = OnceLock::new();

fn namespace_re() -> &'static Regex {
    NAMESPACE_RE.get_or_init(|| {
        Regex::new(r"^\s*namespace\s+(.*);$").expect("namespace pattern compiles")
    })
}

fn declaration_re() -> &'static Regex {
    DECLARATION_RE.get_or_init(|| {
        Regex::new(r"^\s*(?:abstract|final)*\s*(?:class|interface|trait)\s+(\w*)")
            .expect("declaration pattern compiles")
    })
}

/// A declaration found in a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSymbol {
    /// Namespace in effect on the declaring line, if any
    pub namespace: Option<String>,
    /// Unqualified identifier
    pub name: String,
}

impl DeclaredSymbol {
    /// Namespace-qualified name, e.g. `App\Foo`
    pub fn qualified(&self) -> String {
        qualified_name(self.namespace.as_deref(), &self.name)
    }
}

/// Recursively list every file under `root`, never descending into a
/// directory whose path is in `excluded`.
///
/// Hidden entries are skipped. Symbolic links are followed, so linked files
/// and linked directories are listed under the link's path; link cycles are
/// skipped. The result is sorted so repeated scans of the same tree agree.
pub fn scan(root: &Path, excluded: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
    if excluded.contains(root) {
        debug!(root = %root.display(), "include path is itself excluded");
        return Vec::new();
    }

    let pruned = excluded.clone();
    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false);
    builder.hidden(true);
    builder.follow_links(true);
    builder.sort_by_file_name(|a, b| a.cmp(b));
    builder.filter_entry(move |entry| {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && pruned.contains(entry.path()) {
            debug!(dir = %entry.path().display(), "excluding directory");
            return false;
        }
        true
    });

    let mut files = Vec::new();

    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };

        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    files
}

/// Extract `(namespace, identifier)` pairs from a source file.
///
/// Unreadable files yield nothing. Bytes that are not valid UTF-8 are
/// replaced rather than failing the file.
pub fn extract_symbols(path: &Path) -> Vec<DeclaredSymbol> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping unreadable file");
            return Vec::new();
        }
    };

    extract_from_source(&String::from_utf8_lossy(&bytes))
}

/// Line-by-line extraction over already-loaded source text
pub fn extract_from_source(source: &str) -> Vec<DeclaredSymbol> {
    let mut namespace: Option<String> = None;
    let mut found = Vec::new();

    for line in source.lines() {
        if let Some(caps) = namespace_re().captures(line) {
            namespace = Some(caps[1].trim().to_string());
        }

        if let Some(caps) = declaration_re().captures(line) {
            let name = &caps[1];
            if name.is_empty() {
                continue;
            }
            found.push(DeclaredSymbol {
                namespace: namespace.clone(),
                name: name.to_string(),
            });
        }
    }

    found
}
