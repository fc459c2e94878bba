//! Lookup entry point: cache-or-scan initialization and lazy resolution.
//!
//! A `Resolver` is built once by the host process and handed to whatever
//! triggers lookups. Nothing here is fatal to the host: cache, lock and
//! scan failures are logged and the resolver falls back to scanning more
//! and caching less.

use crate::cache::CacheStore;
use crate::config::Config;
use crate::lock::{LockFile, LockGuard, WaitOutcome};
use crate::paths::ScanConfig;
use crate::scan::{extract_symbols, scan};
use crate::store::{now_secs, IndexEntry, IndexStore};
use crate::symbol::short_name;
use crate::ClassdexError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of a resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverState {
    Uninitialized,
    Initializing,
    Ready,
}

/// How `init` reached the ready state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InitOutcome {
    /// Already initialized; nothing was done
    AlreadyReady,
    /// Index loaded from the persisted cache
    CacheLoaded { entries: usize },
    /// Full scan performed; `persisted` tells whether the cache was written
    Scanned { entries: usize, persisted: bool },
    /// Gave up waiting for another process; lookups will scan on demand
    Degraded,
}

/// Result of resolving a name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "location", rename_all = "snake_case")]
pub enum Lookup {
    Found(PathBuf),
    NotFound,
}

impl Lookup {
    pub fn location(&self) -> Option<&Path> {
        match self {
            Self::Found(p) => Some(p),
            Self::NotFound => None,
        }
    }
}

/// Counters describing filesystem work done by a resolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub full_scans: usize,
    pub targeted_scans: usize,
    pub files_parsed: usize,
    pub declarations: usize,
    pub duplicates: usize,
}

pub struct Resolver {
    config: Config,
    scan: ScanConfig,
    store: IndexStore,
    cache: Option<CacheStore>,
    state: ResolverState,
    degraded: bool,
    stats: ScanStats,
    missing_refresh: Duration,
    max_age: Option<Duration>,
    max_lock_age: Duration,
    max_wait: Duration,
    poll_interval: Duration,
}

impl Resolver {
    /// Validate `config` and prepare an uninitialized resolver
    pub fn new(config: Config) -> crate::Result<Self> {
        config.validate()?;

        let mut resolver = Self {
            missing_refresh: config.missing_refresh()?,
            max_age: config.max_age()?,
            max_lock_age: config.max_lock_age()?,
            max_wait: config.max_wait()?,
            poll_interval: config.poll_interval()?,
            config,
            scan: ScanConfig::default(),
            store: IndexStore::new(),
            cache: None,
            state: ResolverState::Uninitialized,
            degraded: false,
            stats: ScanStats::default(),
        };
        resolver.resolve_paths();
        Ok(resolver)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scan_config(&self) -> &ScanConfig {
        &self.scan
    }

    /// Cache location for this configuration, `None` when caching is disabled
    pub fn cache_store(&self) -> Option<&CacheStore> {
        self.cache.as_ref()
    }

    pub fn state(&self) -> ResolverState {
        self.state
    }

    /// Whether init gave up waiting for another process's rebuild
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Every index entry, ordered by canonical name
    pub fn index(&self) -> &BTreeMap<String, IndexEntry> {
        self.store.all_entries()
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Load the index from cache or build it, coordinating with other
    /// processes sharing the same cache identity.
    ///
    /// With `force_reinit` any existing cache is deleted first.
    pub fn init(&mut self, force_reinit: bool) -> InitOutcome {
        if self.state == ResolverState::Ready && !force_reinit {
            return InitOutcome::AlreadyReady;
        }

        self.state = ResolverState::Initializing;
        self.degraded = false;
        self.resolve_paths();
        info!(
            include = self.scan.include.len(),
            exclude = self.scan.exclude.len(),
            force = force_reinit,
            "initializing"
        );

        let Some(cache) = self.cache.clone() else {
            self.full_scan();
            return self.finish(InitOutcome::Scanned {
                entries: self.store.len(),
                persisted: false,
            });
        };

        if force_reinit {
            debug!("deleting cache due to forced init");
            if let Err(e) = cache.delete() {
                warn!(error = %e, "could not delete cache file");
            }
        }

        if let Some(outcome) = self.load_cache(&cache) {
            return self.finish(outcome);
        }

        let lock = LockFile::new(cache.lock_path());
        let guard = match lock.try_acquire() {
            Ok(Some(guard)) => Some(guard),
            Ok(None) => {
                debug!(lock = %lock.path().display(), "cache is being built elsewhere, waiting");
                match lock.wait_or_takeover(
                    &cache.cache_path(),
                    self.max_wait,
                    self.max_lock_age,
                    self.poll_interval,
                ) {
                    Ok(WaitOutcome::CacheReady) => {
                        if let Some(outcome) = self.load_cache(&cache) {
                            return self.finish(outcome);
                        }
                        self.try_lock(&lock)
                    }
                    Ok(WaitOutcome::Acquired(guard)) => Some(guard),
                    Err(ClassdexError::LockTimeout { waited }) => {
                        warn!(
                            waited_secs = waited.as_secs(),
                            "cache still locked, continuing with on-demand scanning"
                        );
                        self.degraded = true;
                        return self.finish(InitOutcome::Degraded);
                    }
                    Err(e) => {
                        warn!(error = %e, "lock wait failed, scanning without cache");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "could not create lock file, scanning without cache");
                None
            }
        };

        // Another process may have finished between our first read and the lock.
        if guard.is_some() {
            if let Some(outcome) = self.load_cache(&cache) {
                return self.finish(outcome);
            }
        }

        self.full_scan();
        let persisted = match guard {
            Some(guard) => {
                let written = self.write_cache(&cache);
                guard.release();
                written
            }
            None => false,
        };

        self.finish(InitOutcome::Scanned {
            entries: self.store.len(),
            persisted,
        })
    }

    /// Resolve `name` to the file declaring it.
    ///
    /// Known symbols are answered from memory. A symbol recorded as missing
    /// is not rescanned until the missing-refresh interval has passed.
    /// Otherwise include paths are searched for a source file whose base
    /// name equals the last segment of `name`, regardless of namespace.
    pub fn lookup(&mut self, name: &str) -> Lookup {
        if self.state == ResolverState::Uninitialized {
            self.init(false);
        }

        if let Some(entry) = self.store.lookup(name) {
            if let Some(location) = entry.location.as_ref().filter(|_| entry.is_found()) {
                return Lookup::Found(location.clone());
            }

            let since = Duration::from_secs(now_secs().saturating_sub(entry.last_check_time));
            if since < self.missing_refresh {
                debug!(
                    symbol = name,
                    missing_for_secs = since.as_secs(),
                    "missing symbol checked recently, not rescanning"
                );
                return Lookup::NotFound;
            }
        }

        self.targeted_scan(name)
    }

    /// Delete the cache file and forget the in-memory index.
    ///
    /// The lock file is removed only when it is stale; a live rebuild in
    /// another process keeps its lock.
    pub fn clear_cache(&mut self) -> crate::Result<bool> {
        self.resolve_paths();
        self.store.clear();
        self.state = ResolverState::Uninitialized;

        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        LockFile::new(cache.lock_path()).break_stale(self.max_lock_age);
        cache.delete()
    }

    fn resolve_paths(&mut self) {
        self.scan = ScanConfig::from_config(&self.config);
        self.store = IndexStore::with_ignores(&self.scan);
        self.cache = self.config.cache.enabled.then(|| {
            CacheStore::new(self.config.cache_dir_path(), &self.scan).with_max_age(self.max_age)
        });
    }

    fn finish(&mut self, outcome: InitOutcome) -> InitOutcome {
        self.state = ResolverState::Ready;
        info!(?outcome, entries = self.store.len(), "ready");
        outcome
    }

    fn load_cache(&mut self, cache: &CacheStore) -> Option<InitOutcome> {
        match cache.read() {
            Ok(entries) => {
                self.store.replace_entries(entries);
                debug!(entries = self.store.len(), "loaded index from cache");
                Some(InitOutcome::CacheLoaded {
                    entries: self.store.len(),
                })
            }
            Err(e) if e.is_stale() => {
                info!(error = %e, "cache unusable, rebuilding");
                None
            }
            Err(e) => {
                debug!(error = %e, "no usable cache");
                None
            }
        }
    }

    fn try_lock(&self, lock: &LockFile) -> Option<LockGuard> {
        match lock.try_acquire() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "could not create lock file");
                None
            }
        }
    }

    fn write_cache(&self, cache: &CacheStore) -> bool {
        match cache.write(&self.store) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    path = %cache.cache_path().display(),
                    error = %e,
                    "could not write cache, continuing without it"
                );
                false
            }
        }
    }

    /// Persist after a lookup changed the index, but only if the lock is free
    fn persist_if_unlocked(&self) {
        let Some(cache) = &self.cache else {
            return;
        };

        let lock = LockFile::new(cache.lock_path());
        match self.try_lock(&lock) {
            Some(guard) => {
                self.write_cache(cache);
                guard.release();
            }
            None => debug!("cache locked by another process, keeping update in memory"),
        }
    }

    fn full_scan(&mut self) {
        self.stats.full_scans += 1;

        for root in self.scan.include.clone() {
            debug!(root = %root.display(), "reading directory");
            for file in scan(&root, &self.scan.exclude) {
                if self.scan.has_source_extension(&file) {
                    self.index_file(&file);
                }
            }
        }
    }

    fn targeted_scan(&mut self, name: &str) -> Lookup {
        self.stats.targeted_scans += 1;
        let wanted = short_name(name);
        debug!(symbol = name, "searching for missing symbol");

        for root in self.scan.include.clone() {
            for file in scan(&root, &self.scan.exclude) {
                let stem_matches = file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|s| s.eq_ignore_ascii_case(wanted));
                if !stem_matches || !self.scan.has_source_extension(&file) {
                    continue;
                }

                self.index_file(&file);

                if let Some(location) = self
                    .store
                    .lookup(name)
                    .filter(|e| e.is_found())
                    .and_then(|e| e.location.clone())
                {
                    self.persist_if_unlocked();
                    return Lookup::Found(location);
                }
            }
        }

        self.store.record_missing(name);
        self.persist_if_unlocked();
        Lookup::NotFound
    }

    fn index_file(&mut self, file: &Path) {
        self.stats.files_parsed += 1;

        for symbol in extract_symbols(file) {
            let qualified = symbol.qualified();
            match self
                .store
                .record_found(&qualified, symbol.namespace.as_deref(), file)
            {
                Ok(()) => self.stats.declarations += 1,
                Err(ClassdexError::DuplicateSymbol { name, existing, .. }) => {
                    self.stats.duplicates += 1;
                    warn!(
                        symbol = %name,
                        file = %file.display(),
                        kept = %existing.display(),
                        "duplicate symbol, keeping first declaration"
                    );
                }
                Err(e) => warn!(symbol = %qualified, error = %e, "could not record symbol"),
            }
        }
    }
}
