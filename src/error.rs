//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Empty key, or absent value, rejected while null values are not ignored
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Unparsable configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CacheError::InvalidKey("key must not be empty".to_string()).to_string(),
            "Invalid key: key must not be empty"
        );
        assert_eq!(
            CacheError::InvalidKey("no value for k1".to_string()).to_string(),
            "Invalid key: no value for k1"
        );
        assert_eq!(
            CacheError::Config("CACHE_EXPIRATION_MS=abc".to_string()).to_string(),
            "Invalid configuration: CACHE_EXPIRATION_MS=abc"
        );
    }
}
