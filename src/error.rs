//! Error-handling utilities.

pub use anyhow::{anyhow, bail, ensure, Context, Error};

use crate::limits::MAX_CACHE_KEY_BYTES;

/// Errors arising from cache operations.
///
/// Misses are not errors: a non-transactional lookup that finds nothing
/// returns `Ok(None)`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The cache key was empty or longer than [`MAX_CACHE_KEY_BYTES`].
    #[error("cache key must be between 1 and {MAX_CACHE_KEY_BYTES} bytes, but was {len} bytes")]
    InvalidKey {
        /// The length of the rejected key, in bytes.
        len: usize,
    },
    /// A second terminal operation (insert, update, or cancel) was invoked
    /// on a transaction that was already resolved.
    #[error("transaction was already resolved by an insert, update, or cancel")]
    AlreadyResolved,
    /// Operation was not valid to be performed given the state of the cached
    /// item, such as an update when no item was found, or an insert on a
    /// transaction that holds no write obligation.
    #[error("invalid cache operation for the current item state")]
    InvalidState,
    /// The body stream backing this operation is no longer available, such as
    /// when reading from an entry whose writer was dropped before finishing.
    #[error("cached item body stream is unavailable")]
    StreamUnavailable,
    /// The total bytes written to a body did not match the length declared
    /// at insertion. The entry is aborted and will not serve lookups.
    #[error("cached item body length mismatch: declared {declared} bytes, wrote {actual}")]
    LengthMismatch {
        /// The length declared at insertion, in bytes.
        declared: u64,
        /// The total bytes the writer provided.
        actual: u64,
    },
}
