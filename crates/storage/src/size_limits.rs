//! Key and value size validation.
//!
//! Backends accept an optional [`SizeLimits`] at construction time and call
//! [`validate_sizes`] on every write path, so oversized items are rejected
//! before they reach the store.
//!
//! # Defaults
//!
//! | Limit | Default |
//! |-------|---------|
//! | `max_key_size` | 3 072 bytes (2 KiB partition + 1 KiB sort key) |
//! | `max_value_size` | 409 600 bytes (400 KiB item) |

use crate::{ConfigError, StorageError};

/// Default maximum encoded key size in bytes.
pub const DEFAULT_MAX_KEY_SIZE: usize = 3 * 1024;

/// Default maximum item size in bytes (400 KiB).
pub const DEFAULT_MAX_VALUE_SIZE: usize = 400 * 1024;

/// Configurable size limits for keys and values.
///
/// Both limits must be at least 1.
///
/// # Example
///
/// ```
/// use pointgate_storage::SizeLimits;
///
/// let limits = SizeLimits::new(256, 64 * 1024).unwrap();
/// assert_eq!(limits.max_value_size(), 65_536);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    max_key_size: usize,
    max_value_size: usize,
}

impl SizeLimits {
    /// Creates size limits with the given bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if either limit is zero.
    pub fn new(max_key_size: usize, max_value_size: usize) -> Result<Self, ConfigError> {
        for (field, value) in [("max_key_size", max_key_size), ("max_value_size", max_value_size)] {
            if value == 0 {
                return Err(ConfigError::BelowMinimum {
                    field,
                    min: "1".into(),
                    value: value.to_string(),
                });
            }
        }
        Ok(Self { max_key_size, max_value_size })
    }

    /// Returns the maximum allowed key size in bytes.
    #[must_use]
    pub fn max_key_size(&self) -> usize {
        self.max_key_size
    }

    /// Returns the maximum allowed value size in bytes.
    #[must_use]
    pub fn max_value_size(&self) -> usize {
        self.max_value_size
    }
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self { max_key_size: DEFAULT_MAX_KEY_SIZE, max_value_size: DEFAULT_MAX_VALUE_SIZE }
    }
}

/// Validates key and value sizes against the given limits.
///
/// # Errors
///
/// Returns [`StorageError::SizeLimitExceeded`] naming the violated limit.
pub fn validate_sizes(key: &[u8], value: &[u8], limits: &SizeLimits) -> Result<(), StorageError> {
    validate_key_size(key, limits)?;
    if value.len() > limits.max_value_size {
        return Err(StorageError::size_limit_exceeded("value", value.len(), limits.max_value_size));
    }
    Ok(())
}

/// Validates key size only, for paths where no value is written.
///
/// # Errors
///
/// Returns [`StorageError::SizeLimitExceeded`] when the key is too large.
pub fn validate_key_size(key: &[u8], limits: &SizeLimits) -> Result<(), StorageError> {
    if key.len() > limits.max_key_size {
        return Err(StorageError::size_limit_exceeded("key", key.len(), limits.max_key_size));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn default_limits_match_item_ceiling() {
        let limits = SizeLimits::default();
        assert_eq!(limits.max_key_size(), 3072);
        assert_eq!(limits.max_value_size(), 409_600);
    }

    #[rstest]
    #[case::zero_key(0, 1024, "max_key_size")]
    #[case::zero_value(1, 0, "max_value_size")]
    fn zero_limits_rejected(#[case] key: usize, #[case] value: usize, #[case] field: &str) {
        let err = SizeLimits::new(key, value).unwrap_err();
        assert!(err.to_string().contains(field), "error should name the field: {err}");
    }

    #[rstest]
    #[case::within_limits(10, 20, 10, 20, true)]
    #[case::key_one_byte_over(5, 10, 6, 10, false)]
    #[case::value_one_byte_over(5, 10, 5, 11, false)]
    fn validate_sizes_parametric(
        #[case] max_key: usize,
        #[case] max_val: usize,
        #[case] key_size: usize,
        #[case] val_size: usize,
        #[case] should_pass: bool,
    ) {
        let limits = SizeLimits::new(max_key, max_val).unwrap();
        let result = validate_sizes(&vec![0u8; key_size], &vec![0u8; val_size], &limits);
        assert_eq!(result.is_ok(), should_pass);
    }

    #[test]
    fn oversized_item_reports_value_kind() {
        let limits = SizeLimits::default();
        let err = validate_sizes(b"DataPoint#x", &vec![b'a'; 409_601], &limits).unwrap_err();
        assert!(matches!(
            err,
            StorageError::SizeLimitExceeded { kind: "value", actual: 409_601, limit: 409_600 }
        ));
    }
}
