//! Enforced limits for cache operations.
//!
//! These limits are checked synchronously at the API boundary, before any
//! store access. An operation that violates a limit fails without leaving a
//! partial entry behind.

use crate::core::CacheKey;
use crate::error::CacheError;

/// The maximum size of a [`CacheKey`], in bytes.
pub const MAX_CACHE_KEY_BYTES: usize = 8135;

/// Checks that a cache key is non-empty and within [`MAX_CACHE_KEY_BYTES`].
pub(crate) fn validate_key(key: &CacheKey) -> Result<(), CacheError> {
    if key.is_empty() || key.len() > MAX_CACHE_KEY_BYTES {
        Err(CacheError::InvalidKey { len: key.len() })
    } else {
        Ok(())
    }
}
