//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with their update timestamp.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// The stored value
    pub value: T,
    /// Last time the entry was stored or renewed (UTC)
    pub last_updated: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    // == Constructor ==
    /// Creates a new cache entry stamped with the current time.
    pub fn new(value: T) -> Self {
        Self {
            value,
            last_updated: Utc::now(),
        }
    }

    // == Touch ==
    /// Refreshes the timestamp, leaving the value untouched.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    // == Is Older Than ==
    /// Checks if the entry was last updated strictly before `threshold`.
    pub fn is_older_than(&self, threshold: DateTime<Utc>) -> bool {
        self.last_updated < threshold
    }

    // == Age ==
    /// Time elapsed since the last update, zero if the clock went backwards.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.last_updated)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

// == Utility Functions ==
/// Returns the instant before which entries are considered expired.
///
/// `None` means the expiration is too large to represent, so nothing expires.
pub fn expiration_threshold(now: DateTime<Utc>, expiration: Duration) -> Option<DateTime<Utc>> {
    let expiration = TimeDelta::from_std(expiration).ok()?;
    now.checked_sub_signed(expiration)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_entry_creation() {
        let before = Utc::now();
        let entry = CacheEntry::new("test_value".to_string());

        assert_eq!(entry.value, "test_value");
        assert!(entry.last_updated >= before);
        assert!(entry.last_updated <= Utc::now());
    }

    #[test]
    fn test_entry_touch_keeps_value() {
        let mut entry = CacheEntry::new(42);
        let first = entry.last_updated;

        sleep(Duration::from_millis(5));
        entry.touch();

        assert_eq!(entry.value, 42);
        assert!(entry.last_updated > first);
    }

    #[test]
    fn test_entry_is_older_than() {
        let entry = CacheEntry::new("v");

        assert!(!entry.is_older_than(entry.last_updated));
        assert!(entry.is_older_than(entry.last_updated + TimeDelta::milliseconds(1)));
        assert!(!entry.is_older_than(entry.last_updated - TimeDelta::milliseconds(1)));
    }

    #[test]
    fn test_entry_age() {
        let entry = CacheEntry::new("v");
        sleep(Duration::from_millis(20));

        assert!(entry.age() >= Duration::from_millis(20));
    }

    #[test]
    fn test_expiration_threshold() {
        let now = Utc::now();
        let threshold = expiration_threshold(now, Duration::from_secs(60)).unwrap();
        assert_eq!(now - threshold, TimeDelta::seconds(60));

        assert!(expiration_threshold(now, Duration::MAX).is_none());
    }

    #[test]
    fn test_expiration_boundary_condition() {
        // An entry stamped exactly at the threshold is not yet expired
        let now = Utc::now();
        let entry = CacheEntry {
            value: "test",
            last_updated: now,
        };
        let threshold = expiration_threshold(now, Duration::ZERO).unwrap();

        assert!(!entry.is_older_than(threshold));
    }
}
