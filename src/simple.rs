//! A simple key-value API backed by the core cache.
//!
//! This layer trades away the advanced features of the [core
//! API][crate::CoreCache] for a minimal get/set/purge surface. Items
//! inserted through the core API can be read through this API, and vice
//! versa, but metadata and revalidation are only reachable through the core
//! API.
//!
//! Purging is implemented with surrogate keys derived from the cache key;
//! see [`surrogate_key_for_cache_key()`].

use std::fmt::Write as _;
use std::time::Duration;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::body::Body;
use crate::core::{CacheKey, CoreCache};
use crate::error::CacheError;

/// Errors arising from simple cache operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SimpleCacheError {
    /// An underlying core cache operation found an invalid state.
    ///
    /// This should not arise during use of this API. If encountered, please
    /// report it as a bug.
    #[error("invalid simple cache operation; please report this as a bug")]
    InvalidOperation,
    /// An underlying core cache operation failed.
    #[error("core cache error: {0}")]
    Core(#[from] CacheError),
    /// An error occurred while running the closure argument of
    /// [`get_or_set_with()`].
    ///
    /// This uses [`anyhow::Error`] to provide maximum flexibility in how the
    /// closure reports errors.
    #[error("get_or_set closure error: {0}")]
    GetOrSet(#[source] anyhow::Error),
}

/// Get the entry associated with the given cache key, if it exists.
///
/// ```
/// # use core_cache::{simple, CoreCache};
/// # let cache = CoreCache::new();
/// if let Some(value) = simple::get(&cache, "my_key").unwrap() {
///     let cached_string = value.into_string().unwrap();
///     println!("the cached string was: {cached_string}");
/// }
/// ```
pub fn get(cache: &CoreCache, key: impl Into<CacheKey>) -> Result<Option<Body>, SimpleCacheError> {
    let Some(found) = cache.lookup(key.into()).execute()? else {
        return Ok(None);
    };
    Ok(Some(found.to_stream()))
}

/// Get the entry associated with the given cache key if it exists, or insert
/// and return the specified entry.
///
/// If the value is costly to compute, consider using [`get_or_set_with()`]
/// instead to avoid computation in the case where the value is already
/// present.
///
/// ```
/// # use core_cache::{simple, CoreCache};
/// # use std::time::Duration;
/// # let cache = CoreCache::new();
/// let value = simple::get_or_set(&cache, "my_key", "hello!", Duration::from_secs(60)).unwrap();
/// let cached_string = value.into_string().unwrap();
/// println!("the cached string was: {cached_string}");
/// ```
pub fn get_or_set(
    cache: &CoreCache,
    key: impl Into<CacheKey>,
    value: impl Into<Bytes>,
    ttl: Duration,
) -> Result<Body, SimpleCacheError> {
    get_or_set_with(cache, key, || {
        Ok(CacheEntry {
            value: value.into(),
            ttl,
        })
    })
    .map(|opt| opt.expect("provided closure is infallible"))
}

/// The return type of the closure provided to [`get_or_set_with()`].
#[derive(Debug)]
pub struct CacheEntry {
    /// The value to cache.
    pub value: Bytes,
    /// The time-to-live for the cache entry.
    pub ttl: Duration,
}

/// Get the entry associated with the given cache key if it exists, or insert
/// and return an entry specified by running the given closure.
///
/// The closure is only run when no value is present for the key, and no
/// other client is in the process of setting it. It takes no arguments, and
/// returns either `Ok` with a [`CacheEntry`] describing the entry to set, or
/// `Err` with an [`anyhow::Error`]. The error is not interpreted by the API,
/// and is solely provided as a user convenience. You can return an error for
/// any reason, and no value will be cached.
///
/// ## Example successful insertion
///
/// ```
/// # use core_cache::{simple::{self, CacheEntry}, CoreCache};
/// # use std::time::Duration;
/// # let cache = CoreCache::new();
/// let value = simple::get_or_set_with(&cache, "my_key", || {
///     Ok(CacheEntry {
///         value: "hello!".into(),
///         ttl: Duration::from_secs(60),
///     })
/// })
/// .unwrap()
/// .expect("closure always returns `Ok`, so we have a value");
/// let cached_string = value.into_string().unwrap();
/// println!("the cached string was: {cached_string}");
/// ```
///
/// ## Example unsuccessful insertion
///
/// ```
/// # use core_cache::{simple::{self, SimpleCacheError}, CoreCache};
/// # let cache = CoreCache::new();
/// let mut tried_to_set = false;
/// let result = simple::get_or_set_with(&cache, "my_key", || {
///     tried_to_set = true;
///     anyhow::bail!("I changed my mind!")
/// });
/// if tried_to_set {
///     // if our closure was run, we can observe its error in the result
///     assert!(matches!(result, Err(SimpleCacheError::GetOrSet(_))));
/// }
/// ```
pub fn get_or_set_with<F>(
    cache: &CoreCache,
    key: impl Into<CacheKey>,
    make_entry: F,
) -> Result<Option<Body>, SimpleCacheError>
where
    F: FnOnce() -> Result<CacheEntry, anyhow::Error>,
{
    let key = key.into();
    let lookup_tx = cache.transaction_lookup(key.clone()).execute()?;
    if !lookup_tx.must_insert_or_update() {
        if let Some(found) = lookup_tx.found() {
            // the value is already present, so just return it
            return Ok(Some(found.to_stream()));
        } else {
            // we're not in the insert-or-update case, but there's no found?
            return Err(SimpleCacheError::InvalidOperation);
        }
    }
    // run the user-provided closure to produce the entry, tagging it as a
    // user error if something goes wrong
    let CacheEntry { value, ttl } = make_entry().map_err(SimpleCacheError::GetOrSet)?;
    // perform a standard insert-and-read-back
    let (mut insert_body, found) = lookup_tx
        .insert(ttl)
        .surrogate_keys([surrogate_key_for_cache_key(&key).as_str()])
        .execute_and_stream_back()?;
    insert_body.append(value)?;
    insert_body.finish()?;
    Ok(Some(found.to_stream()))
}

/// Insert an entry at the given cache key with the given time-to-live.
pub fn set(
    cache: &CoreCache,
    key: impl Into<CacheKey>,
    value: impl Into<Bytes>,
    ttl: Duration,
) -> Result<(), SimpleCacheError> {
    let key = key.into();
    let mut insert_body = cache
        .insert(key.clone(), ttl)
        .surrogate_keys([surrogate_key_for_cache_key(&key).as_str()])
        .execute()?;
    insert_body.append(value.into())?;
    Ok(insert_body.finish()?)
}

/// Purge the entry associated with the given cache key.
///
/// Only entries written through this API (or tagged with
/// [`surrogate_key_for_cache_key()`]) are affected; readers already
/// streaming the entry keep reading.
pub fn purge(cache: &CoreCache, key: impl Into<CacheKey>) {
    cache.purge_surrogate_key(&surrogate_key_for_cache_key(&key.into()));
}

/// Create a surrogate key for the given cache key that is compatible with
/// uses of the simple cache API.
///
/// Each cache entry written by this API is tagged with a surrogate key from
/// this function so that [`purge()`] can find it. This function is provided
/// as a convenience for implementors wishing to add such a surrogate key
/// manually via the core API for interoperability with [`purge()`].
pub fn surrogate_key_for_cache_key(key: &CacheKey) -> String {
    let mut sha = Sha256::new();
    sha.update(key);
    let mut sk_str = String::new();
    for b in sha.finalize() {
        write!(&mut sk_str, "{b:02X}").expect("writing to a String is infallible");
    }
    sk_str
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surrogate_key_is_stable_hex() {
        let key = CacheKey::from("hello");
        let sk = surrogate_key_for_cache_key(&key);
        assert_eq!(sk.len(), 64);
        assert_eq!(sk, sk.to_uppercase());
        assert_eq!(sk, surrogate_key_for_cache_key(&CacheKey::from("hello")));
        assert_ne!(sk, surrogate_key_for_cache_key(&CacheKey::from("world")));
    }
}
