//! Classdex Core - Lazy symbol-to-file resolution
//!
//! This library builds and maintains an on-disk index that maps declared
//! symbol names (classes, interfaces, traits) to the file declaring them,
//! so a host runtime can resolve a name to a file on first use instead of
//! loading everything up front.

pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod paths;
pub mod resolver;
pub mod scan;
pub mod store;
pub mod symbol;

pub use cache::{cache_identity, CacheFile, CacheStore, CACHE_VERSION};
pub use config::Config;
pub use error::{CacheError, ClassdexError};
pub use lock::{LockFile, LockGuard, WaitOutcome};
pub use paths::{normalize, ScanConfig};
pub use resolver::{InitOutcome, Lookup, Resolver, ResolverState, ScanStats};
pub use scan::{extract_symbols, scan, DeclaredSymbol};
pub use store::{IndexEntry, IndexStore, SymbolStatus};
pub use symbol::{canonical_name, short_name};

/// Result type alias for classdex operations
pub type Result<T> = std::result::Result<T, ClassdexError>;
