//! Named Lock Module
//!
//! Reference-counted registry of mutexes addressed by string keys.
//!
//! A mutex is created the first time a key is acquired, shared by every
//! handle registered for that key, and dropped from the registry when the
//! last handle is released.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

// == Lock Slot ==
/// Registry entry: the shared mutex plus the number of live handles.
struct LockSlot {
    mutex: Arc<Mutex<()>>,
    refs: usize,
}

// == Named Locks ==
/// Registry of named mutexes.
///
/// Cloning is cheap and yields a handle to the same registry, so one
/// instance can be built at startup and handed to every consumer.
#[derive(Clone, Default)]
pub struct NamedLocks {
    registry: Arc<DashMap<String, LockSlot>>,
}

impl NamedLocks {
    // == Constructor ==
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // == Acquire ==
    /// Registers interest in the mutex for `key` and returns a handle.
    ///
    /// # Arguments
    /// * `key` - Name of the mutex; any string, including empty
    ///
    /// # Returns
    /// A handle that does not hold the mutex yet. Never blocks on the mutex
    /// itself; use [`NamedLock::enter`] or [`NamedLock::enter_timeout`] to
    /// obtain exclusive access.
    pub fn acquire(&self, key: impl Into<String>) -> NamedLock {
        let key = key.into();
        let mutex = {
            // The shard lock held by the entry makes insert-or-increment atomic.
            let mut slot = self
                .registry
                .entry(key.clone())
                .or_insert_with(|| LockSlot {
                    mutex: Arc::new(Mutex::new(())),
                    refs: 0,
                });
            slot.refs += 1;
            Arc::clone(&slot.mutex)
        };

        NamedLock {
            registry: Arc::clone(&self.registry),
            key,
            mutex,
            guard: None,
        }
    }

    /// Acquires a handle for `key` and blocks until its mutex is held.
    pub fn acquire_and_enter(&self, key: impl Into<String>) -> NamedLock {
        let mut lock = self.acquire(key);
        lock.enter();
        lock
    }

    /// Acquires a handle for `key` and waits up to `timeout` for its mutex.
    ///
    /// Check [`NamedLock::is_locked`] on the returned handle before relying
    /// on exclusive access.
    pub fn acquire_and_enter_timeout(&self, key: impl Into<String>, timeout: Duration) -> NamedLock {
        let mut lock = self.acquire(key);
        lock.enter_timeout(timeout);
        lock
    }

    // == Length ==
    /// Returns the number of keys with at least one live handle.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Returns the number of live handles registered for `key`.
    pub fn ref_count(&self, key: &str) -> usize {
        self.registry.get(key).map_or(0, |slot| slot.refs)
    }
}

impl fmt::Debug for NamedLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedLocks")
            .field("keys", &self.registry.len())
            .finish()
    }
}

// == Named Lock ==
/// Handle on the mutex of one key.
///
/// Dropping the handle (or calling [`NamedLock::release`]) exits the mutex if
/// held and unregisters the handle, whether or not it ever entered.
///
/// The mutex is not reentrant: two handles for the same key on one thread
/// wait on each other, so a second `enter` deadlocks and a second
/// `enter_timeout` fails once its window elapses. Handles are `Send`, held
/// or not, and may be released on another thread than the one that
/// entered.
pub struct NamedLock {
    registry: Arc<DashMap<String, LockSlot>>,
    key: String,
    mutex: Arc<Mutex<()>>,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl NamedLock {
    /// Key this handle is registered for.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true while this handle holds the mutex.
    pub fn is_locked(&self) -> bool {
        self.guard.is_some()
    }

    // == Enter ==
    /// Blocks until the mutex is held. Always returns true.
    pub fn enter(&mut self) -> bool {
        if self.guard.is_none() {
            self.guard = Some(self.mutex.lock_arc());
        }
        true
    }

    /// Waits up to `timeout` for the mutex.
    ///
    /// Returns false if the window elapsed; the attempt is not retried.
    /// A zero timeout only tries once.
    pub fn enter_timeout(&mut self, timeout: Duration) -> bool {
        if self.guard.is_none() {
            self.guard = self.mutex.try_lock_arc_for(timeout);
        }
        self.guard.is_some()
    }

    // == Exit ==
    /// Releases the mutex but keeps the handle registered.
    ///
    /// Returns true if the mutex was held.
    pub fn exit(&mut self) -> bool {
        self.guard.take().is_some()
    }

    // == Release ==
    /// Exits the mutex if held and unregisters the handle.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        self.guard = None;
        // Decrement and removal happen under one shard lock, so a concurrent
        // acquire either sees the old slot before removal or creates a new one.
        self.registry.remove_if_mut(self.key.as_str(), |_, slot| {
            slot.refs = slot.refs.saturating_sub(1);
            slot.refs == 0
        });
    }
}

impl fmt::Debug for NamedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedLock")
            .field("key", &self.key)
            .field("locked", &self.is_locked())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_acquire_registers_key() {
        let locks = NamedLocks::new();

        let first = locks.acquire("k1");
        let second = locks.acquire("k1");

        assert_eq!(locks.len(), 1);
        assert_eq!(locks.ref_count("k1"), 2);
        assert!(!first.is_locked());
        assert!(!second.is_locked());
    }

    #[test]
    fn test_release_removes_key_at_zero() {
        let locks = NamedLocks::new();

        let first = locks.acquire("k1");
        let second = locks.acquire("k1");

        first.release();
        assert_eq!(locks.ref_count("k1"), 1);

        drop(second);
        assert_eq!(locks.ref_count("k1"), 0);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_release_without_enter_cleans_up() {
        let locks = NamedLocks::new();

        let lock = locks.acquire("never_entered");
        assert_eq!(locks.len(), 1);
        lock.release();

        assert!(locks.is_empty());
    }

    #[test]
    fn test_enter_and_exit() {
        let locks = NamedLocks::new();
        let mut lock = locks.acquire("k1");

        assert!(lock.enter());
        assert!(lock.is_locked());
        // Entering again through the same handle is a no-op
        assert!(lock.enter());

        assert!(lock.exit());
        assert!(!lock.is_locked());
        assert!(!lock.exit());

        // Still registered after exit
        assert_eq!(locks.ref_count("k1"), 1);
    }

    #[test]
    fn test_zero_timeout_on_held_key_fails_fast() {
        let locks = NamedLocks::new();
        let holder = locks.acquire_and_enter("busy");
        assert!(holder.is_locked());

        let contender_locks = locks.clone();
        let handle = thread::spawn(move || {
            let mut contender = contender_locks.acquire("busy");
            let started = Instant::now();
            let entered = contender.enter_timeout(Duration::ZERO);
            (entered, started.elapsed())
        });

        let (entered, elapsed) = handle.join().unwrap();
        assert!(!entered);
        assert!(elapsed < Duration::from_millis(500));

        drop(holder);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_timeout_then_success_after_release() {
        let locks = NamedLocks::new();
        let holder = locks.acquire_and_enter("k1");

        let contender_locks = locks.clone();
        let waiter = thread::spawn(move || {
            let lock = contender_locks.acquire_and_enter_timeout("k1", Duration::from_millis(20));
            lock.is_locked()
        });
        assert!(!waiter.join().unwrap());

        holder.release();

        let lock = locks.acquire_and_enter_timeout("k1", Duration::from_millis(20));
        assert!(lock.is_locked());
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let locks = NamedLocks::new();
        let _a = locks.acquire_and_enter("a");

        let other = locks.clone();
        let entered = thread::spawn(move || {
            other
                .acquire_and_enter_timeout("b", Duration::ZERO)
                .is_locked()
        })
        .join()
        .unwrap();

        assert!(entered);
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let locks = NamedLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let locks = locks.clone();
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        let lock = locks.acquire_and_enter("shared");
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.release();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty(), "Registry should be empty once all handles are released");
    }

    #[test]
    fn test_held_handle_released_on_another_thread() {
        let locks = NamedLocks::new();
        let lock = locks.acquire_and_enter("moved");
        assert!(lock.is_locked());

        thread::spawn(move || lock.release()).join().unwrap();

        assert!(locks.is_empty());
        let mut again = locks.acquire("moved");
        assert!(again.enter_timeout(Duration::ZERO));
    }

    #[test]
    fn test_same_thread_second_handle_does_not_reenter() {
        let locks = NamedLocks::new();
        let outer = locks.acquire_and_enter("k");

        let mut inner = locks.acquire("k");
        assert!(!inner.enter_timeout(Duration::from_millis(10)));
        assert_eq!(locks.ref_count("k"), 2);

        drop(inner);
        outer.release();
        assert!(locks.is_empty());
    }
}
