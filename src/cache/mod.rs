//! Cache Module
//!
//! Provides in-memory caching with background expiry and single-flight population.

mod entry;
mod object;
mod stats;
mod store;


// Re-export public types
pub use entry::{expiration_threshold, CacheEntry};
pub use object::{ObjectCache, SharedObject};
pub use stats::CacheStats;
pub use store::{ExpirationHandler, MemoryCache, PrefixMatch, SubscriptionId, SyncAddOutcome};
