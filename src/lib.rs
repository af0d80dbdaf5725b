//! Simple Cache - A generic in-memory cache
//!
//! Provides a thread-safe keyed cache with time-based expiry driven by a
//! self-managing background sweep, plus per-key named locks used to run a
//! value factory at most once per key.

pub mod cache;
pub mod config;
pub mod error;
pub mod sync;
mod tasks;

pub use cache::{MemoryCache, ObjectCache, PrefixMatch, SyncAddOutcome};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use sync::{NamedLock, NamedLocks};
