//! Object Cache Module
//!
//! Type-erased cache holding values of any type, read back with a downcast.

use std::any::Any;
use std::sync::Arc;

use crate::cache::MemoryCache;
use crate::error::Result;

/// Shared, type-erased cached value.
pub type SharedObject = Arc<dyn Any + Send + Sync>;

/// Cache storing values of mixed types.
pub type ObjectCache = MemoryCache<SharedObject>;

impl MemoryCache<SharedObject> {
    /// Stores `value` behind a shared pointer.
    pub fn set_object<U>(&self, key: &str, value: U) -> Result<()>
    where
        U: Any + Send + Sync,
    {
        let object: SharedObject = Arc::new(value);
        self.set(key, object)
    }

    /// Returns the value for `key` if present and of type `U`.
    pub fn get_as<U>(&self, key: &str) -> Option<Arc<U>>
    where
        U: Any + Send + Sync,
    {
        self.get(key)?.downcast::<U>().ok()
    }

    /// Removes the value for `key` and returns it if it is of type `U`.
    ///
    /// The entry is removed even when the type does not match.
    pub fn remove_as<U>(&self, key: &str) -> Option<Arc<U>>
    where
        U: Any + Send + Sync,
    {
        self.remove(key)?.downcast::<U>().ok()
    }
}
