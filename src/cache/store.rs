//! Cache Store Module
//!
//! Main cache engine combining a concurrent map with timestamped entries and a
//! self-starting background sweep.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::entry::expiration_threshold;
use crate::cache::stats::StatsCounters;
use crate::cache::{CacheEntry, CacheStats};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::sync::NamedLocks;
use crate::tasks::Sweeper;

/// Callback invoked with the key and value of every evicted entry.
pub type ExpirationHandler<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;

// == Subscription Id ==
/// Identifies a registered expiration handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// == Prefix Match ==
/// How [`MemoryCache::clear_by_prefix`] compares keys against the prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrefixMatch {
    /// Exact character comparison
    #[default]
    Ordinal,
    /// Character comparison ignoring case
    OrdinalIgnoreCase,
}

impl PrefixMatch {
    /// Returns true if `key` starts with `prefix` under this comparison.
    pub fn matches(self, key: &str, prefix: &str) -> bool {
        match self {
            PrefixMatch::Ordinal => key.starts_with(prefix),
            PrefixMatch::OrdinalIgnoreCase => {
                let mut key_chars = key.chars();
                prefix.chars().all(|p| {
                    key_chars
                        .next()
                        .is_some_and(|k| k == p || k.to_uppercase().eq(p.to_uppercase()))
                })
            }
        }
    }
}

// == Sync Add Outcome ==
/// Result of [`MemoryCache::get_or_sync_add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAddOutcome<T> {
    /// The value was already cached
    Cached(T),
    /// The factory ran and its value was stored
    Created(T),
    /// The per-key lock was not obtained in time; nothing was produced
    TimedOut,
}

impl<T> SyncAddOutcome<T> {
    /// Collapses the outcome to the value, `None` on timeout.
    pub fn into_value(self) -> Option<T> {
        match self {
            SyncAddOutcome::Cached(value) | SyncAddOutcome::Created(value) => Some(value),
            SyncAddOutcome::TimedOut => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            SyncAddOutcome::Cached(value) | SyncAddOutcome::Created(value) => Some(value),
            SyncAddOutcome::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, SyncAddOutcome::TimedOut)
    }
}

// == Shared State ==
struct Shared<T> {
    /// Key-value storage
    entries: DashMap<String, CacheEntry<T>>,
    /// Live configuration, read on every operation that depends on it
    config: RwLock<CacheConfig>,
    /// Expiration subscribers in registration order
    handlers: RwLock<Vec<(SubscriptionId, ExpirationHandler<T>)>>,
    next_subscription: AtomicU64,
    /// Per-key locks used for single-flight population
    locks: NamedLocks,
    /// Running sweep thread; the mutex only serializes start and stop
    sweeper: Mutex<Option<Sweeper>>,
    /// Mirrors `sweeper.is_some()`, written under the sweeper mutex
    running: AtomicBool,
    /// Set while a sweep is executing so overlapping ticks are skipped
    sweeping: AtomicBool,
    stats: StatsCounters,
}

/// Clears the sweeping flag on every exit path, including unwinding.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> Shared<T>
where
    T: Send + Sync + 'static,
{
    fn start_maintenance(self: &Arc<Self>) {
        // Pairs with the fence in run_maintenance: either this load sees the
        // stop, or the sweep's re-check sees the entry just written.
        fence(Ordering::SeqCst);
        if self.running.load(Ordering::SeqCst) {
            return;
        }

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let step = self.config.read().maintenance_step;
        let weak: Weak<Self> = Arc::downgrade(self);
        let spawned = Sweeper::spawn(step, move || match weak.upgrade() {
            Some(shared) => {
                shared.run_maintenance();
                true
            }
            None => false,
        });

        match spawned {
            Ok(handle) => {
                *sweeper = Some(handle);
                self.running.store(true, Ordering::SeqCst);
                debug!(step_ms = step.as_millis() as u64, "Cache maintenance started");
            }
            Err(err) => {
                // The next set retries
                warn!(error = %err, "Failed to start cache maintenance thread");
            }
        }
    }

    fn stop_maintenance(&self) {
        // Taken out first so the join below never runs under the mutex
        let sweeper = {
            let mut slot = self.sweeper.lock();
            self.running.store(false, Ordering::SeqCst);
            slot.take()
        };

        if let Some(sweeper) = sweeper {
            sweeper.stop();
            debug!("Cache maintenance stopped");
        }
    }

    /// One tick of the background sweep. Returns the number of evicted entries.
    fn run_maintenance(self: &Arc<Self>) -> usize {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sweep already in progress, skipping tick");
            return 0;
        }
        let _guard = SweepGuard(&self.sweeping);

        if self.entries.is_empty() {
            self.stop_maintenance();
            fence(Ordering::SeqCst);
            // A set may have slipped in between the check and the stop
            if !self.entries.is_empty() {
                self.start_maintenance();
            }
            return 0;
        }

        self.evict_expired()
    }

    fn evict_expired(&self) -> usize {
        let expiration = self.config.read().expiration;
        let Some(threshold) = expiration_threshold(Utc::now(), expiration) else {
            self.stats.record_sweep(0);
            return 0;
        };

        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_older_than(threshold))
            .map(|entry| entry.key().clone())
            .collect();

        let handlers: Vec<ExpirationHandler<T>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let mut evicted = 0;
        for key in expired {
            // Re-check under the shard lock so a concurrent set or renew survives
            let removed = self
                .entries
                .remove_if(key.as_str(), |_, entry| entry.is_older_than(threshold));

            if let Some((key, entry)) = removed {
                evicted += 1;
                notify_expired(&handlers, &key, &entry.value);
            }
        }

        self.stats.record_sweep(evicted);
        if evicted > 0 {
            info!("Cache sweep: removed {} expired entries", evicted);
        } else {
            debug!("Cache sweep: no expired entries found");
        }
        evicted
    }
}

fn notify_expired<T>(handlers: &[ExpirationHandler<T>], key: &str, value: &T) {
    for handler in handlers {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(key, value)));
        if outcome.is_err() {
            warn!(key, "Expiration handler panicked");
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.stop();
        }
    }
}

// == Memory Cache ==
/// Thread-safe keyed cache with time-based expiry.
///
/// Entries older than the configured expiration are evicted by a background
/// thread that wakes every maintenance step. The thread starts on the first
/// `set`, stops itself once the cache is empty, and restarts on the next
/// `set`.
///
/// Cloning is cheap: clones share the same storage, so build one instance
/// per value type and hand clones to every consumer. Stored values are
/// handed out by clone, so wrap them in `Arc` if cloning is expensive.
pub struct MemoryCache<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for MemoryCache<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for MemoryCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.shared.entries.len())
            .field("config", &*self.shared.config.read())
            .finish()
    }
}

impl<T> Default for MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache with the default configuration.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Creates a cache with the given configuration and its own lock registry.
    pub fn with_config(config: CacheConfig) -> Self {
        Self::with_locks(config, NamedLocks::new())
    }

    /// Creates a cache that takes its per-key locks from `locks`.
    ///
    /// Caches sharing a registry serialize `get_or_sync_add` calls on equal
    /// keys across all of them.
    pub fn with_locks(config: CacheConfig, locks: NamedLocks) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: DashMap::new(),
                config: RwLock::new(config),
                handlers: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
                locks,
                sweeper: Mutex::new(None),
                running: AtomicBool::new(false),
                sweeping: AtomicBool::new(false),
                stats: StatsCounters::default(),
            }),
        }
    }

    // == Configuration ==
    /// Returns a snapshot of the current configuration.
    pub fn config(&self) -> CacheConfig {
        self.shared.config.read().clone()
    }

    /// Sets the maximum age of entries. Applies from the next sweep on.
    pub fn set_expiration(&self, expiration: Duration) {
        self.shared.config.write().expiration = expiration;
    }

    /// Sets the interval between sweeps, restarting a running sweep thread.
    pub fn set_maintenance_step(&self, step: Duration) {
        let changed = {
            let mut config = self.shared.config.write();
            let changed = config.maintenance_step != step;
            config.maintenance_step = step;
            changed
        };

        if changed {
            self.shared.stop_maintenance();
            if !self.shared.entries.is_empty() {
                self.shared.start_maintenance();
            }
        }
    }

    /// Sets whether storing an absent value removes the key instead of failing.
    pub fn set_ignore_null_values(&self, ignore: bool) {
        self.shared.config.write().ignore_null_values = ignore;
    }

    /// Returns the registry used for single-flight population.
    pub fn locks(&self) -> &NamedLocks {
        &self.shared.locks
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.shared.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.entries.contains_key(key)
    }

    // == Get ==
    /// Retrieves a value by key, `None` on a miss.
    ///
    /// Never blocks on other cache operations and never evicts.
    pub fn get(&self, key: &str) -> Option<T> {
        let value = self.peek(key);
        self.shared.stats.record_lookup(value.is_some());
        value
    }

    /// Retrieves a value by key, `T::default()` on a miss.
    pub fn get_or_default(&self, key: &str) -> T
    where
        T: Default,
    {
        self.get(key).unwrap_or_default()
    }

    /// Returns a snapshot of the stored entry, including its timestamp.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<T>> {
        self.shared.entries.get(key).map(|entry| entry.value().clone())
    }

    fn peek(&self, key: &str) -> Option<T> {
        self.shared
            .entries
            .get(key)
            .map(|entry| entry.value().value.clone())
    }

    // == Set ==
    /// Stores or overwrites a value and stamps it with the current time.
    ///
    /// # Arguments
    /// * `key` - Entry key; an empty key is skipped or rejected
    /// * `value` - Value to store, or `None` to drop the key
    ///
    /// # Returns
    /// `Ok(())` when the value was stored, removed or skipped. While null
    /// values are ignored (the default) an empty key is a silent no-op and
    /// `None` removes the key. Otherwise both fail with
    /// [`CacheError::InvalidKey`] and nothing changes.
    pub fn set(&self, key: &str, value: impl Into<Option<T>>) -> Result<()> {
        let ignore_null_values = self.shared.config.read().ignore_null_values;

        if key.is_empty() {
            return if ignore_null_values {
                Ok(())
            } else {
                Err(empty_key())
            };
        }

        match value.into() {
            Some(value) => {
                self.insert(key, value);
                Ok(())
            }
            None if ignore_null_values => {
                self.remove(key);
                Ok(())
            }
            None => Err(CacheError::InvalidKey(format!("no value for {key}"))),
        }
    }

    fn insert(&self, key: &str, value: T) {
        self.shared
            .entries
            .insert(key.to_string(), CacheEntry::new(value));
        self.shared.start_maintenance();
    }

    // == Renew ==
    /// Refreshes the timestamp of an existing entry, leaving its value alone.
    ///
    /// Returns false if the key is absent.
    pub fn renew(&self, key: &str) -> bool {
        match self.shared.entries.get_mut(key) {
            Some(mut entry) => {
                entry.touch();
                true
            }
            None => false,
        }
    }

    // == Remove ==
    /// Atomically removes and returns the value stored for `key`.
    pub fn remove(&self, key: &str) -> Option<T> {
        self.shared.entries.remove(key).map(|(_, entry)| entry.value)
    }

    // == Clear By Prefix ==
    /// Removes every entry whose key starts with `prefix`.
    ///
    /// Keys are removed one by one from a snapshot, so matching keys inserted
    /// while this runs may survive. Returns the number of removed entries.
    pub fn clear_by_prefix(&self, prefix: &str, mode: PrefixMatch) -> usize {
        let matching: Vec<String> = self
            .shared
            .entries
            .iter()
            .filter(|entry| mode.matches(entry.key(), prefix))
            .map(|entry| entry.key().clone())
            .collect();

        matching
            .iter()
            .filter(|key| self.shared.entries.remove(key.as_str()).is_some())
            .count()
    }

    // == Clear ==
    /// Removes all entries.
    pub fn clear(&self) {
        self.shared.entries.clear();
    }

    // == Get Or Add ==
    /// Returns the cached value or stores the one produced by `factory`.
    ///
    /// Concurrent callers missing on the same key may all run `factory`;
    /// the last one to store wins. Use [`MemoryCache::get_or_sync_add`] when
    /// the factory must run at most once.
    pub fn get_or_add<F>(&self, key: &str, factory: F) -> Result<T>
    where
        F: FnOnce(&str) -> T,
    {
        self.try_get_or_add(key, |key| Ok::<_, CacheError>(factory(key)))
    }

    /// Fallible variant of [`MemoryCache::get_or_add`].
    ///
    /// A factory error is returned unchanged and nothing is stored.
    pub fn try_get_or_add<F, E>(&self, key: &str, factory: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&str) -> std::result::Result<T, E>,
        E: From<CacheError>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        if key.is_empty() {
            return Err(empty_key().into());
        }

        let value = factory(key)?;
        self.insert(key, value.clone());
        Ok(value)
    }

    // == Get Or Sync Add ==
    /// Returns the cached value or runs `factory` at most once per key.
    ///
    /// On a miss the per-key named lock is entered, waiting up to `timeout`.
    /// Callers that waited re-check the cache and observe the value the
    /// winner stored.
    ///
    /// # Arguments
    /// * `key` - Entry key; must not be empty
    /// * `factory` - Produces the value on a miss, called at most once per key
    /// * `timeout` - Maximum wait for the key lock
    ///
    /// # Returns
    /// [`SyncAddOutcome::Cached`] or [`SyncAddOutcome::Created`] with the
    /// value, or [`SyncAddOutcome::TimedOut`] if the lock was not obtained
    /// in time, in which case `factory` is not called. An empty key fails
    /// with [`CacheError::InvalidKey`].
    ///
    /// The key lock is not reentrant: a `factory` calling back into this
    /// method for the same key waits on itself until `timeout`.
    pub fn get_or_sync_add<F>(
        &self,
        key: &str,
        factory: F,
        timeout: Duration,
    ) -> Result<SyncAddOutcome<T>>
    where
        F: FnOnce(&str) -> T,
    {
        self.try_get_or_sync_add(key, |key| Ok::<_, CacheError>(factory(key)), timeout)
    }

    /// Fallible variant of [`MemoryCache::get_or_sync_add`].
    ///
    /// A factory error is returned unchanged, nothing is stored, and the
    /// next waiter gets its own chance to run its factory.
    pub fn try_get_or_sync_add<F, E>(
        &self,
        key: &str,
        factory: F,
        timeout: Duration,
    ) -> std::result::Result<SyncAddOutcome<T>, E>
    where
        F: FnOnce(&str) -> std::result::Result<T, E>,
        E: From<CacheError>,
    {
        if let Some(value) = self.get(key) {
            return Ok(SyncAddOutcome::Cached(value));
        }
        if key.is_empty() {
            return Err(empty_key().into());
        }

        let mut lock = self.shared.locks.acquire(key);
        if !lock.enter_timeout(timeout) {
            debug!(key, timeout_ms = timeout.as_millis() as u64, "Timed out waiting for key lock");
            return Ok(SyncAddOutcome::TimedOut);
        }

        // Another caller may have stored the value while we waited
        if let Some(value) = self.peek(key) {
            return Ok(SyncAddOutcome::Cached(value));
        }

        let value = factory(key)?;
        self.insert(key, value.clone());
        lock.release();
        Ok(SyncAddOutcome::Created(value))
    }

    // == Expiration Handlers ==
    /// Registers a callback run for every entry the sweep evicts.
    ///
    /// Handlers run synchronously on the sweep thread, in registration
    /// order. A panicking handler is logged and does not affect the others.
    pub fn on_expiration<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        let handler: ExpirationHandler<T> = Arc::new(handler);
        self.shared.handlers.write().push((id, handler));
        id
    }

    /// Unregisters a handler. Returns false if it was not registered.
    pub fn remove_expiration_handler(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.shared.handlers.write();
        let before = handlers.len();
        handlers.retain(|(registered, _)| *registered != id);
        handlers.len() != before
    }

    // == Maintenance ==
    /// Runs one sweep now, on the calling thread.
    ///
    /// Returns the number of evicted entries, or 0 if a sweep was already
    /// executing.
    pub fn evict_expired(&self) -> usize {
        if self
            .shared
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }
        let _guard = SweepGuard(&self.shared.sweeping);
        self.shared.evict_expired()
    }

    /// Returns true while the background sweep thread is running.
    pub fn is_maintenance_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stops the background sweep thread.
    ///
    /// Entries are kept; the next `set` starts the thread again. Dropping
    /// the last clone of the cache stops it as well.
    pub fn shutdown(&self) {
        self.shared.stop_maintenance();
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.shared.stats.snapshot(self.shared.entries.len())
    }
}

fn empty_key() -> CacheError {
    CacheError::InvalidKey("key must not be empty".to_string())
}
