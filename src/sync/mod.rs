//! Synchronization Module
//!
//! Keyed mutual exclusion shared by every caller using the same key.

mod named_lock;

pub use named_lock::{NamedLock, NamedLocks};
