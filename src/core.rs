//! The core cache API.
//!
//! This API exposes the primitive operations required to implement
//! high-performance cache applications with advanced features such as
//! request collapsing, streaming miss, and revalidation.
//!
//! While this API contains affordances for some HTTP caching concepts such
//! as `Vary` headers and `stale-while-revalidate`, it is **not** an HTTP
//! cache out-of-the-box: it does not infer freshness lifetimes, evaluate
//! conditional requests, or interpret any other HTTP semantics.
//!
//! Cached items consist of:
//!
//! * **A cache key**: up to 8135 bytes of arbitrary bytes that identify a
//!   cached item. The cache key may not uniquely identify an item; request
//!   **headers** can be used to augment the key when multiple items are
//!   associated with the same key. See [`InsertBuilder::vary_by()`] for more
//!   details.
//!
//! * **General metadata**, such as expiry data (item age, when to expire,
//!   and surrogate keys for purging).
//!
//! * **User-controlled metadata**: arbitrary bytes stored alongside the
//!   cached item contents that can be updated when revalidating the item.
//!
//! * **The object itself**: arbitrary bytes read via [`Body`] and written
//!   via [`StreamingBody`].
//!
//! In the simplest cases, the [`CoreCache::insert()`] and
//! [`CoreCache::lookup()`] methods are used for one-off operations on a
//! cached item, and are appropriate when request collapsing and revalidation
//! capabilities are not required.
//!
//! The API also supports more complex uses via
//! [`Transaction`][crate::Transaction], which can collapse concurrent
//! lookups to the same item, including coordinating revalidation.

pub(crate) mod object;
pub(crate) mod vary;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::HeaderMap;

use self::object::{CacheObject, StoreInner, WriteOptions};
use crate::body::{Body, StreamingBody};
use crate::convert::{ToHeaderName, ToHeaderSource, ToHeaderValue};
use crate::error::CacheError;
use crate::limits::validate_key;
use crate::transaction::TransactionLookupBuilder;

/// A cache key consists of up to 8135 bytes of arbitrary data.
pub type CacheKey = Bytes;

bitflags::bitflags! {
    /// The result of a cache lookup, as a set of independent predicates.
    ///
    /// Existence and freshness are orthogonal conditions, so this is a flag
    /// set rather than a single enum: a found item can simultaneously be
    /// usable, stale, and in need of revalidation by this caller.
    pub struct LookupState: u32 {
        /// A cached item was found.
        const FOUND = 1 << 0;
        /// The found item is servable: fresh, or stale but within its
        /// stale-while-revalidate period.
        const USABLE = 1 << 1;
        /// The found item's age exceeds its max age.
        const STALE = 1 << 2;
        /// This caller holds the obligation to insert or update the item.
        const MUST_INSERT_OR_UPDATE = 1 << 3;
    }
}

impl LookupState {
    /// Whether a cached item was found.
    pub fn found(&self) -> bool {
        self.contains(LookupState::FOUND)
    }

    /// Whether the found item is servable.
    pub fn usable(&self) -> bool {
        self.contains(LookupState::USABLE)
    }

    /// Whether the found item is past its max age.
    pub fn stale(&self) -> bool {
        self.contains(LookupState::STALE)
    }

    /// Whether this caller is expected to insert or update the item.
    pub fn must_insert_or_update(&self) -> bool {
        self.contains(LookupState::MUST_INSERT_OR_UPDATE)
    }
}

/// A handle to a cache store.
///
/// The store itself is the only long-lived shared resource; handles are
/// cheap to clone and all clones observe the same entries. Tests (and
/// embedders that want isolation) construct independent stores with
/// [`CoreCache::new()`] rather than sharing an implicit global.
#[derive(Clone)]
pub struct CoreCache {
    inner: Arc<StoreInner>,
}

impl Default for CoreCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreCache {
    /// Create a new, empty cache store.
    pub fn new() -> Self {
        CoreCache {
            inner: Arc::new(StoreInner::new()),
        }
    }

    /// Returns a [`LookupBuilder`] that will perform a non-transactional
    /// cache lookup.
    ///
    /// ```
    /// # use core_cache::CoreCache;
    /// # let cache = CoreCache::new();
    /// let mut cached_string = String::new();
    /// if let Some(entry) = cache.lookup("my_key").execute().unwrap() {
    ///     cached_string = entry.to_stream().into_string().unwrap();
    /// }
    /// println!("the cached string was: {cached_string}");
    /// ```
    ///
    /// # Relationship with [`CoreCache::transaction_lookup()`]
    ///
    /// In contrast to a transactional lookup, a non-transactional `lookup`
    /// will not attempt to coordinate with any concurrent cache lookups. If
    /// two callers perform a `lookup` at the same time for the same cache
    /// key, and the item is not yet cached, they will both get `Ok(None)`.
    /// Without further coordination, they may both end up performing the
    /// work needed to [`insert()`][CoreCache::insert()] the item and racing
    /// with each other to insert. To resolve such races, use
    /// [`CoreCache::transaction_lookup()`] instead.
    pub fn lookup(&self, key: impl Into<CacheKey>) -> LookupBuilder<'_> {
        LookupBuilder {
            cache: self,
            key: key.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Returns an [`InsertBuilder`] that will perform a non-transactional
    /// cache insertion.
    ///
    /// The required `max_age` argument is the time for which the item will
    /// be considered fresh. All other insertion arguments are optional, and
    /// may be set using the returned builder.
    ///
    /// ```
    /// # use core_cache::CoreCache;
    /// # use std::time::Duration;
    /// # let cache = CoreCache::new();
    /// let contents = b"my cached object";
    /// let mut writer = cache
    ///     .insert("my_key", Duration::from_secs(3600))
    ///     .known_length(contents.len() as u64)
    ///     .execute()
    ///     .unwrap();
    /// writer.append(contents).unwrap();
    /// writer.finish().unwrap();
    /// ```
    ///
    /// Like `lookup`, `insert` may race with concurrent lookups or
    /// insertions, and will unconditionally overwrite existing cached items
    /// rather than allowing for revalidation of an existing object: among
    /// racing inserts, the last writer's entry is the one subsequent lookups
    /// observe.
    pub fn insert(&self, key: impl Into<CacheKey>, max_age: Duration) -> InsertBuilder<'_> {
        InsertBuilder {
            cache: self,
            key: key.into(),
            options: WriteOptions::new(max_age),
        }
    }

    /// Returns a [`TransactionLookupBuilder`] that will perform a
    /// transactional cache lookup.
    ///
    /// See [`Transaction`][crate::Transaction] for details and an example.
    pub fn transaction_lookup(&self, key: impl Into<CacheKey>) -> TransactionLookupBuilder<'_> {
        TransactionLookupBuilder::new(self, key.into())
    }

    /// Drop every cached item tagged with the given surrogate key, across
    /// all cache keys. Returns the number of items purged.
    ///
    /// Readers that already hold a stream over a purged item keep reading;
    /// the item only becomes unreachable for subsequent lookups.
    pub fn purge_surrogate_key(&self, surrogate: &str) -> usize {
        self.inner.purge_surrogate_key(surrogate)
    }

    pub(crate) fn store(&self) -> &StoreInner {
        &self.inner
    }
}

impl std::fmt::Debug for CoreCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<CoreCache store handle>")
    }
}

/// A builder-style API for configuring a non-transactional lookup.
pub struct LookupBuilder<'a> {
    cache: &'a CoreCache,
    key: CacheKey,
    headers: HeaderMap,
}

impl<'a> LookupBuilder<'a> {
    /// Sets a single header for this lookup, appending to any previous
    /// values associated with the header `name`.
    ///
    /// Headers are only consulted for vary matching: a lookup hits iff its
    /// values for every header named by the stored item's vary rule are
    /// equal to the values the item was written with.
    pub fn header(mut self, name: impl ToHeaderName, value: impl ToHeaderValue) -> Self {
        self.headers
            .append(name.into_header_name(), value.into_header_value());
        self
    }

    /// Sets the full set of headers for this lookup from any supported
    /// header representation (pair list, string-keyed mapping, or
    /// [`HeaderMap`]), discarding previously set headers.
    pub fn headers(mut self, source: impl ToHeaderSource) -> Self {
        self.headers = source.into_header_map();
        self
    }

    /// Perform the lookup, returning a [`Found`] object if a usable cached
    /// item was found.
    ///
    /// A cached item is _usable_ if its age is less than the sum of its max
    /// age and its stale-while-revalidate period. Items beyond that age are
    /// unusably stale. Each successful lookup increments the item's hit
    /// counter by one.
    pub fn execute(self) -> Result<Option<Found>, CacheError> {
        validate_key(&self.key)?;
        Ok(self
            .cache
            .store()
            .lookup(&self.key, &self.headers)
            .map(|(object, state)| Found::new(object, state)))
    }
}

/// A builder-style API for configuring a non-transactional insertion.
pub struct InsertBuilder<'a> {
    cache: &'a CoreCache,
    key: CacheKey,
    options: WriteOptions,
}

impl<'a> InsertBuilder<'a> {
    /// Sets a single header for this insertion, appending to any previous
    /// values associated with the header `name`.
    ///
    /// The values of headers named by [`vary_by()`][Self::vary_by()] become
    /// part of the stored item's identity.
    pub fn header(mut self, name: impl ToHeaderName, value: impl ToHeaderValue) -> Self {
        self.options
            .request_headers
            .append(name.into_header_name(), value.into_header_value());
        self
    }

    /// Sets the full set of headers for this insertion from any supported
    /// header representation, discarding previously set headers.
    pub fn headers(mut self, source: impl ToHeaderSource) -> Self {
        self.options.request_headers = source.into_header_map();
        self
    }

    /// Sets the list of headers that must match when looking up this cached
    /// item.
    ///
    /// The rule declared by the most recent write to a key governs all
    /// subsequent lookups for that key.
    pub fn vary_by(mut self, headers: impl IntoIterator<Item = impl ToHeaderName>) -> Self {
        self.options.vary = headers.into_iter().map(ToHeaderName::into_header_name).collect();
        self
    }

    /// Sets the initial age of the cached item, to be used in freshness
    /// calculations.
    ///
    /// The initial age is `Duration::ZERO` by default.
    pub fn initial_age(mut self, age: Duration) -> Self {
        self.options.initial_age = age;
        self
    }

    /// Sets the time for which a cached item can safely be used despite
    /// being considered stale.
    pub fn stale_while_revalidate(mut self, duration: Duration) -> Self {
        self.options.stale_while_revalidate = duration;
        self
    }

    /// Sets the surrogate keys that can be used for purging this cached
    /// item.
    pub fn surrogate_keys<'b>(mut self, keys: impl IntoIterator<Item = &'b str>) -> Self {
        self.options.surrogate_keys = keys.into_iter().map(str::to_owned).collect();
        self
    }

    /// Sets the size of the cached item, in bytes, when known prior to
    /// actually providing the bytes.
    ///
    /// It is an error to provide a length and then write more or less total
    /// bytes than the length provided.
    pub fn known_length(mut self, length: u64) -> Self {
        self.options.length = Some(length);
        self
    }

    /// Sets the user-defined metadata to associate with the cached item.
    pub fn user_metadata(mut self, user_metadata: impl Into<Bytes>) -> Self {
        self.options.user_metadata = user_metadata.into();
        self
    }

    /// Sets whether the cached item holds sensitive data.
    ///
    /// The flag is stored with the item and suppresses logging of key
    /// material; the engine applies no other semantics to it.
    pub fn sensitive_data(mut self, is_sensitive_data: bool) -> Self {
        self.options.sensitive = is_sensitive_data;
        self
    }

    /// Begin the insertion, returning a [`StreamingBody`] for providing the
    /// cached object itself.
    ///
    /// The entry is visible to matching lookups immediately; concurrent
    /// readers stream bytes as this writer appends them.
    pub fn execute(self) -> Result<StreamingBody, CacheError> {
        validate_key(&self.key)?;
        let (body, _object) = self.cache.store().insert(&self.key, self.options);
        Ok(body)
    }
}

/// A cached item returned by a lookup.
///
/// This type can be used to get the cached item as a stream via
/// [`to_stream()`][Found::to_stream()], and to retrieve its metadata, such
/// as [its size][Found::known_length()] or [whether it's
/// stale][Found::is_stale()].
pub struct Found {
    // The `Arc` allows the underlying object to be shared with the
    // transactional path and with other concurrent readers.
    object: Arc<CacheObject>,
    state: LookupState,
}

impl Found {
    pub(crate) fn new(object: Arc<CacheObject>, state: LookupState) -> Self {
        Found { object, state }
    }

    /// The outcome of the lookup that produced this item, as a set of
    /// independent predicates.
    pub fn state(&self) -> LookupState {
        self.state
    }

    /// The time for which the cached item is considered fresh.
    pub fn max_age(&self) -> Duration {
        self.object.max_age()
    }

    /// The current age of the cached item.
    ///
    /// Grows monotonically with wall-clock time from the item's insertion,
    /// starting at its initial age.
    pub fn age(&self) -> Duration {
        self.object.age()
    }

    /// The time for which the cached item can safely be used despite being
    /// considered stale.
    pub fn stale_while_revalidate(&self) -> Duration {
        self.object.stale_while_revalidate()
    }

    /// The size in bytes of the cached item, if known.
    ///
    /// The length of the cached item may be unknown if the item is currently
    /// being streamed into the cache without a declared length.
    pub fn known_length(&self) -> Option<u64> {
        self.object.pipe().known_length()
    }

    /// The user-controlled metadata associated with the cached item.
    ///
    /// Empty if no metadata was set.
    pub fn user_metadata(&self) -> Bytes {
        self.object.user_metadata()
    }

    /// Whether the cached item holds sensitive data.
    pub fn is_sensitive(&self) -> bool {
        self.object.is_sensitive()
    }

    /// Determines whether the cached item is usable.
    ///
    /// A cached item is usable if its age is less than the sum of its max
    /// age and stale-while-revalidate periods.
    pub fn is_usable(&self) -> bool {
        self.state.usable()
    }

    /// Determines whether the cached item is stale.
    ///
    /// A cached item is stale if its age is greater than its max age.
    pub fn is_stale(&self) -> bool {
        self.object.is_stale()
    }

    /// The number of lookups that have returned this cached item.
    ///
    /// Insertion itself does not count as a hit; the first subsequent
    /// successful lookup observes a count of 1.
    pub fn hits(&self) -> u64 {
        self.object.hits()
    }

    /// Retrieves the entire cached item as a [`Body`] that can be read in a
    /// streaming fashion.
    ///
    /// Multiple streams over the same item may be open simultaneously, each
    /// with an independent read position.
    pub fn to_stream(&self) -> Body {
        self.to_stream_from_range(None, None)
    }

    /// Retrieves a range of bytes from the cached item as a [`Body`].
    ///
    /// If `from` is `None`, the stream starts at the beginning of the item;
    /// a `from` beyond the item's length yields an empty stream rather than
    /// an error. `to` is an inclusive end offset, clamped to the item's
    /// length; `None` or `Some(0)` means "to the end of the item" (a zero
    /// end is treated as no bound at all, not as an empty range).
    pub fn to_stream_from_range(&self, from: Option<u64>, to: Option<u64>) -> Body {
        let (start, end) = match to {
            // a zero end bound disables the range entirely
            Some(0) => (0, None),
            Some(to) => (from.unwrap_or(0), Some(to.saturating_add(1))),
            None => (from.unwrap_or(0), None),
        };
        Body::new(self.object.pipe(), start, end)
    }

    /// Release this read handle.
    ///
    /// Consuming the handle makes "read after close" unrepresentable; the
    /// underlying stored data is not deleted, and other handles over the
    /// same item are unaffected.
    pub fn close(self) {}
}

impl std::fmt::Debug for Found {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Found")
            .field("state", &self.state)
            .field("hits", &self.hits())
            .finish()
    }
}
