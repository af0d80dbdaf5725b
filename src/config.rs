//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

use serde::Serialize;

use crate::error::{CacheError, Result};

/// Default maximum age of an entry before the sweep may evict it.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(5 * 60);

/// Default interval between two sweeps.
pub const DEFAULT_MAINTENANCE_STEP: Duration = Duration::from_secs(5 * 60);

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults,
/// and changed later on a live cache through its setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
    /// Maximum age of an entry before it becomes eligible for eviction
    pub expiration: Duration,
    /// Interval between background sweeps
    pub maintenance_step: Duration,
    /// Whether storing an absent value is a silent remove instead of an error
    pub ignore_null_values: bool,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// Unset variables fall back to their defaults; if any variable is
    /// unparsable the whole default configuration is used.
    ///
    /// # Environment Variables
    /// - `CACHE_EXPIRATION_MS` - Entry expiration in milliseconds (default: 300000)
    /// - `CACHE_MAINTENANCE_STEP_MS` - Sweep interval in milliseconds (default: 300000)
    /// - `CACHE_IGNORE_NULL_VALUES` - `true`/`false` (default: true)
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_default()
    }

    /// Same as [`CacheConfig::from_env`], but reports unparsable values.
    pub fn try_from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            expiration: parse_millis(&lookup, "CACHE_EXPIRATION_MS")?
                .unwrap_or(defaults.expiration),
            maintenance_step: parse_millis(&lookup, "CACHE_MAINTENANCE_STEP_MS")?
                .unwrap_or(defaults.maintenance_step),
            ignore_null_values: match lookup("CACHE_IGNORE_NULL_VALUES") {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| CacheError::Config(format!("CACHE_IGNORE_NULL_VALUES={raw}")))?,
                None => defaults.ignore_null_values,
            },
        })
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<Duration>> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| CacheError::Config(format!("{name}={raw}"))),
        None => Ok(None),
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiration: DEFAULT_EXPIRATION,
            maintenance_step: DEFAULT_MAINTENANCE_STEP,
            ignore_null_values: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.expiration, Duration::from_secs(300));
        assert_eq!(config.maintenance_step, Duration::from_secs(300));
        assert!(config.ignore_null_values);
    }

    #[test]
    fn test_config_lookup_defaults() {
        let config = CacheConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn test_config_lookup_overrides() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("CACHE_EXPIRATION_MS", "1500"),
            ("CACHE_MAINTENANCE_STEP_MS", " 250 "),
            ("CACHE_IGNORE_NULL_VALUES", "false"),
        ]))
        .unwrap();

        assert_eq!(config.expiration, Duration::from_millis(1500));
        assert_eq!(config.maintenance_step, Duration::from_millis(250));
        assert!(!config.ignore_null_values);
    }

    #[test]
    fn test_config_lookup_invalid_value() {
        let result = CacheConfig::from_lookup(lookup_from(&[("CACHE_EXPIRATION_MS", "soon")]));
        assert!(matches!(result, Err(CacheError::Config(msg)) if msg.contains("CACHE_EXPIRATION_MS")));

        let result =
            CacheConfig::from_lookup(lookup_from(&[("CACHE_IGNORE_NULL_VALUES", "maybe")]));
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}
