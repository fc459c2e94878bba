//! Configuration for classdex

use crate::ClassdexError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Classdex Configuration

[paths]
# Directories scanned recursively for declarations
include = []
# Directories pruned from every scan (literal paths, not globs)
exclude = []

[scan]
# File extensions considered source files
extensions = ["php", "inc"]
# How long a symbol recorded as missing is trusted before rescanning
missing_refresh = "60s"

[cache]
enabled = true
# Directory holding cache and lock files (defaults to the system temp dir)
# dir = "/tmp"
# Discard caches older than this ("0s" keeps them forever)
max_age = "0s"
# A lock file older than this is presumed abandoned and removed
max_lock_age = "60s"
# Give up waiting for another process's rebuild after this long
max_wait = "60s"
# Interval between checks while waiting
poll_interval = "1s"

[ignore]
# Declarations of a symbol to skip in specific files
# "App\\Legacy\\Foo" = "vendor/old/Foo.php"
"#;

/// Classdex configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ignore: BTreeMap<String, IgnoreTargets>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_missing_refresh")]
    pub missing_refresh: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    #[serde(default = "default_max_age")]
    pub max_age: String,
    #[serde(default = "default_max_lock_age")]
    pub max_lock_age: String,
    #[serde(default = "default_max_wait")]
    pub max_wait: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

/// Files in which a symbol's declaration is ignored: one path or many
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IgnoreTargets {
    One(String),
    Many(Vec<String>),
}

impl IgnoreTargets {
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::One(p) => vec![p.as_str()],
            Self::Many(ps) => ps.iter().map(String::as_str).collect(),
        }
    }
}

// Default value functions
fn default_extensions() -> Vec<String> {
    vec!["php".to_string(), "inc".to_string()]
}
fn default_missing_refresh() -> String {
    "60s".to_string()
}
fn default_enabled() -> bool {
    true
}
fn default_cache_dir() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}
fn default_max_age() -> String {
    "0s".to_string()
}
fn default_max_lock_age() -> String {
    "60s".to_string()
}
fn default_max_wait() -> String {
    "60s".to_string()
}
fn default_poll_interval() -> String {
    "1s".to_string()
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            missing_refresh: default_missing_refresh(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            dir: default_cache_dir(),
            max_age: default_max_age(),
            max_lock_age: default_max_lock_age(),
            max_wait: default_max_wait(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| ClassdexError::ConfigParse(e.to_string()))
    }

    /// Add a directory to scan
    pub fn include_path(mut self, path: impl AsRef<Path>) -> Self {
        self.paths
            .include
            .push(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add a directory to prune from scans
    pub fn exclude_path(mut self, path: impl AsRef<Path>) -> Self {
        self.paths
            .exclude
            .push(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Ignore declarations of `symbol` found in `path`
    pub fn ignore_symbol(mut self, symbol: &str, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        let targets = match self.ignore.remove(symbol) {
            None => IgnoreTargets::One(path),
            Some(IgnoreTargets::One(existing)) => IgnoreTargets::Many(vec![existing, path]),
            Some(IgnoreTargets::Many(mut existing)) => {
                existing.push(path);
                IgnoreTargets::Many(existing)
            }
        };
        self.ignore.insert(symbol.to_string(), targets);
        self
    }

    /// Set the directory holding cache and lock files
    pub fn cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache.dir = dir.as_ref().to_string_lossy().into_owned();
        self
    }

    /// Check every option, so a bad config fails at construction rather than mid-scan
    pub fn validate(&self) -> crate::Result<()> {
        if self.scan.extensions.is_empty() {
            return Err(ClassdexError::InvalidConfig(
                "scan.extensions must list at least one extension".to_string(),
            ));
        }
        for ext in &self.scan.extensions {
            if ext.is_empty() || ext.contains(['.', '/', '\\']) {
                return Err(ClassdexError::InvalidConfig(format!(
                    "invalid extension {:?}: expected a bare extension like \"php\"",
                    ext
                )));
            }
        }
        if self.cache.enabled && self.cache.dir.trim().is_empty() {
            return Err(ClassdexError::InvalidConfig(
                "cache.dir must be set when the cache is enabled".to_string(),
            ));
        }

        self.missing_refresh()?;
        self.max_age()?;
        self.max_lock_age()?;
        self.max_wait()?;
        self.poll_interval()?;
        Ok(())
    }

    pub fn cache_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.cache.dir)
    }

    /// Cooldown during which a missing symbol is not rescanned
    pub fn missing_refresh(&self) -> crate::Result<Duration> {
        duration_option("scan.missing_refresh", &self.scan.missing_refresh)
    }

    /// Maximum cache age; `None` when caches never expire
    pub fn max_age(&self) -> crate::Result<Option<Duration>> {
        let age = duration_option("cache.max_age", &self.cache.max_age)?;
        Ok((!age.is_zero()).then_some(age))
    }

    pub fn max_lock_age(&self) -> crate::Result<Duration> {
        duration_option("cache.max_lock_age", &self.cache.max_lock_age)
    }

    pub fn max_wait(&self) -> crate::Result<Duration> {
        duration_option("cache.max_wait", &self.cache.max_wait)
    }

    pub fn poll_interval(&self) -> crate::Result<Duration> {
        duration_option("cache.poll_interval", &self.cache.poll_interval)
    }
}

fn duration_option(key: &str, value: &str) -> crate::Result<Duration> {
    parse_duration(value).ok_or_else(|| {
        ClassdexError::InvalidConfig(format!(
            "{} = {:?} is not a duration (e.g. \"30s\", \"5m\", \"1h\")",
            key, value
        ))
    })
}

/// Parse duration string (e.g., "500ms", "1h", "30m", "1d")
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }

    let (idx, unit) = s.char_indices().last()?;
    let num: u64 = s[..idx].parse().ok()?;

    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return None,
    };
    num.checked_mul(scale).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.scan.extensions, vec!["php", "inc"]);
        assert!(config.cache.enabled);
        assert!(config.paths.include.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.missing_refresh().unwrap(), Duration::from_secs(60));
        assert_eq!(config.max_lock_age().unwrap(), Duration::from_secs(60));
        assert_eq!(config.max_wait().unwrap(), Duration::from_secs(60));
        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(1));
        assert_eq!(config.max_age().unwrap(), None);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172800)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("5é"), None);
        assert_eq!(parse_duration("é"), None);
        assert_eq!(parse_duration("999999999999999999d"), None);
        assert_eq!(parse_duration("99999999999999999999s"), None);
    }

    #[test]
    fn test_validate_rejects_unparseable_durations_without_panicking() {
        let mut config = Config::default();
        config.scan.missing_refresh = "5é".to_string();
        assert!(matches!(
            config.validate(),
            Err(ClassdexError::InvalidConfig(_))
        ));

        let mut config = Config::default();
        config.cache.max_wait = "999999999999999999d".to_string();
        assert!(matches!(
            config.validate(),
            Err(ClassdexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ignore_accepts_one_or_many() {
        let config = Config::from_toml(
            r#"
[ignore]
"App\\Foo" = "/srv/old/Foo.php"
"App\\Bar" = ["/srv/a/Bar.php", "/srv/b/Bar.php"]
"#,
        )
        .unwrap();
        assert_eq!(
            config.ignore["App\\Foo"].paths(),
            vec!["/srv/old/Foo.php"]
        );
        assert_eq!(config.ignore["App\\Bar"].paths().len(), 2);
    }

    #[test]
    fn test_ignore_symbol_builder_accumulates() {
        let config = Config::default()
            .ignore_symbol("App\\Foo", "/a/Foo.php")
            .ignore_symbol("App\\Foo", "/b/Foo.php");
        assert_eq!(
            config.ignore["App\\Foo"],
            IgnoreTargets::Many(vec!["/a/Foo.php".to_string(), "/b/Foo.php".to_string()])
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.scan.missing_refresh = "soon".to_string();
        assert!(matches!(
            config.validate(),
            Err(ClassdexError::InvalidConfig(_))
        ));

        let mut config = Config::default();
        config.scan.extensions = vec![".php".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scan.extensions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_age_nonzero() {
        let mut config = Config::default();
        config.cache.max_age = "10m".to_string();
        assert_eq!(config.max_age().unwrap(), Some(Duration::from_secs(600)));
    }
}
