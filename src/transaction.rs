//! Transactional lookups and writes.
//!
//! A [`Transaction`] coordinates concurrent actions on the same cached item:
//! for any given resolved item identity, at most one transaction at a time
//! holds the obligation to write, and lookups that would otherwise miss
//! block until that writer resolves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::HeaderMap;

use crate::body::StreamingBody;
use crate::convert::{ToHeaderName, ToHeaderSource, ToHeaderValue};
use crate::core::object::{CacheObject, Slot, WriteOptions};
use crate::core::vary::VariantKey;
use crate::core::{CacheKey, CoreCache, Found, LookupState};
use crate::error::CacheError;
use crate::limits::validate_key;

/// A builder-style API for configuring a transactional lookup.
pub struct TransactionLookupBuilder<'a> {
    cache: &'a CoreCache,
    key: CacheKey,
    headers: HeaderMap,
}

impl<'a> TransactionLookupBuilder<'a> {
    pub(crate) fn new(cache: &'a CoreCache, key: CacheKey) -> Self {
        TransactionLookupBuilder {
            cache,
            key,
            headers: HeaderMap::new(),
        }
    }

    /// Sets a single header for this lookup, appending to any previous
    /// values associated with the header `name`.
    pub fn header(mut self, name: impl ToHeaderName, value: impl ToHeaderValue) -> Self {
        self.headers
            .append(name.into_header_name(), value.into_header_value());
        self
    }

    /// Sets the full set of headers for this lookup from any supported
    /// header representation, discarding previously set headers.
    pub fn headers(mut self, source: impl ToHeaderSource) -> Self {
        self.headers = source.into_header_map();
        self
    }

    /// Perform the lookup, entering a transaction.
    ///
    /// If a usable item was found, the returned transaction contains it, and
    /// the item's hit counter is incremented. If no usable item was found,
    /// and no other transaction holds the write obligation, this caller
    /// acquires it. Otherwise, this call **blocks** until the obligated
    /// writer resolves, then re-evaluates.
    pub fn execute(self) -> Result<Transaction, CacheError> {
        validate_key(&self.key)?;
        let lookup = self
            .cache
            .store()
            .transaction_lookup(&self.key, &self.headers);
        Ok(Transaction {
            slot: lookup.slot,
            request_headers: self.headers,
            object: lookup.object,
            state: lookup.state,
            obligation: lookup.obligation,
            resolved: AtomicBool::new(false),
        })
    }
}

/// An ongoing cache transaction.
///
/// A transaction is initiated with
/// [`CoreCache::transaction_lookup()`][crate::CoreCache::transaction_lookup()].
/// What operations are valid next depends on the lookup's outcome:
///
/// * [`found()`][Self::found()] is `Some` if a usable item was found, which
///   can be read immediately.
///
/// * If [`must_insert()`][Self::must_insert()] is true, nothing usable was
///   found and this transaction holds the obligation to
///   [`insert()`][Self::insert()] the item (or [`cancel()`][Self::cancel()]
///   and walk away). Concurrent transactional lookups of the same item block
///   until this transaction resolves.
///
/// * If both hold, a stale-but-servable item was found and this transaction
///   is expected to revalidate it, either by rewriting the object with
///   [`insert()`][Self::insert()] or by freshening its metadata with
///   [`update()`][Self::update()].
///
/// ```no_run
/// # use core_cache::CoreCache;
/// # use std::time::Duration;
/// # fn run() -> Result<(), core_cache::CacheError> {
/// # let cache = CoreCache::new();
/// let tx = cache.transaction_lookup("my_key").execute()?;
/// if let Some(found) = tx.found() {
///     let _contents = found.to_stream();
/// } else if tx.must_insert() {
///     let mut writer = tx.insert(Duration::from_secs(60)).execute()?;
///     writer.append("hello")?;
///     writer.finish()?;
/// }
/// # Ok(())
/// # }
/// ```
///
/// Dropping a transaction that still holds an unresolved write obligation
/// releases the obligation, as if [`cancel()`][Self::cancel()] were called.
pub struct Transaction {
    slot: Arc<Slot>,
    request_headers: HeaderMap,
    object: Option<Arc<CacheObject>>,
    state: LookupState,
    obligation: Option<VariantKey>,
    resolved: AtomicBool,
}

impl Transaction {
    /// The outcome of the lookup that opened this transaction.
    pub fn state(&self) -> LookupState {
        self.state
    }

    /// The usable cached item found by the lookup, if any.
    ///
    /// Each call returns an independent read handle over the same item.
    pub fn found(&self) -> Option<Found> {
        self.object
            .as_ref()
            .map(|object| Found::new(object.clone(), self.state))
    }

    /// Whether nothing usable was found and this transaction is expected to
    /// insert the item.
    pub fn must_insert(&self) -> bool {
        self.state.must_insert_or_update() && !self.state.found()
    }

    /// Whether this transaction is expected to insert or update the item.
    ///
    /// Unlike [`must_insert()`][Self::must_insert()], this is also true when
    /// a stale item was found that this transaction should revalidate.
    pub fn must_insert_or_update(&self) -> bool {
        self.state.must_insert_or_update()
    }

    /// Returns a [`TransactionInsertBuilder`] that will insert the item for
    /// this transaction's lookup, releasing the write obligation on
    /// [`execute()`][TransactionInsertBuilder::execute()].
    ///
    /// The vary identity of the written item is determined by the headers
    /// the lookup was performed with.
    pub fn insert(&self, max_age: Duration) -> TransactionInsertBuilder<'_> {
        let mut options = WriteOptions::new(max_age);
        options.request_headers = self.request_headers.clone();
        TransactionInsertBuilder {
            transaction: self,
            options,
        }
    }

    /// Returns a [`TransactionUpdateBuilder`] that will freshen the stale
    /// item found by this transaction's lookup without rewriting its bytes.
    ///
    /// Update is only valid when the lookup found a stale item and this
    /// transaction holds the write obligation for it; the metadata is
    /// replaced wholesale, so callers must re-specify every option they want
    /// to keep.
    pub fn update(&self, max_age: Duration) -> TransactionUpdateBuilder<'_> {
        let mut options = WriteOptions::new(max_age);
        options.request_headers = self.request_headers.clone();
        TransactionUpdateBuilder {
            transaction: self,
            options,
        }
    }

    /// Abandon the write obligation without writing anything.
    ///
    /// A waiting transaction (if any) is woken and inherits the obligation.
    /// Returns [`CacheError::InvalidState`] if this transaction never held a
    /// write obligation, and [`CacheError::AlreadyResolved`] if it was
    /// already resolved by a prior insert, update, or cancel.
    pub fn cancel(&self) -> Result<(), CacheError> {
        let obligation = self.obligation.as_ref().ok_or(CacheError::InvalidState)?;
        self.take_resolution()?;
        self.slot.release(obligation);
        Ok(())
    }

    /// Flip the resolved flag, failing if some other call got there first.
    fn take_resolution(&self) -> Result<(), CacheError> {
        self.resolved
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CacheError::AlreadyResolved)?;
        Ok(())
    }

    fn obligation(&self) -> Result<&VariantKey, CacheError> {
        self.obligation.as_ref().ok_or(CacheError::InvalidState)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(obligation) = &self.obligation {
            if !self.resolved.load(Ordering::SeqCst) {
                self.slot.release(obligation);
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("obligated", &self.obligation.is_some())
            .finish()
    }
}

/// A builder-style API for configuring a transactional insertion.
pub struct TransactionInsertBuilder<'a> {
    transaction: &'a Transaction,
    options: WriteOptions,
}

impl<'a> TransactionInsertBuilder<'a> {
    /// Sets the list of headers that must match when looking up this cached
    /// item.
    pub fn vary_by(mut self, headers: impl IntoIterator<Item = impl ToHeaderName>) -> Self {
        self.options.vary = headers.into_iter().map(ToHeaderName::into_header_name).collect();
        self
    }

    /// Sets the initial age of the cached item.
    pub fn initial_age(mut self, age: Duration) -> Self {
        self.options.initial_age = age;
        self
    }

    /// Sets the time for which the cached item can safely be used despite
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
    pub fn sensitive_data(mut self, is_sensitive_data: bool) -> Self {
        self.options.sensitive = is_sensitive_data;
        self
    }

    /// Begin the insertion, resolving the transaction and waking any blocked
    /// lookups of the same item.
    ///
    /// Returns a [`StreamingBody`] for providing the cached object itself.
    /// Fails with [`CacheError::InvalidState`] if the transaction holds no
    /// write obligation, or [`CacheError::AlreadyResolved`] if it was
    /// already resolved.
    pub fn execute(self) -> Result<StreamingBody, CacheError> {
        let (body, _found) = self.execute_inner()?;
        Ok(body)
    }

    /// Begin the insertion, additionally returning a read handle over the
    /// item being inserted.
    ///
    /// The returned [`Found`] streams the bytes as this writer appends them,
    /// which allows a cache miss to be streamed back to the requester
    /// concurrently with the insertion. Reading the handle does not count as
    /// a lookup hit.
    pub fn execute_and_stream_back(self) -> Result<(StreamingBody, Found), CacheError> {
        self.execute_inner()
    }

    fn execute_inner(self) -> Result<(StreamingBody, Found), CacheError> {
        let tx = self.transaction;
        let obligation = tx.obligation()?;
        tx.take_resolution()?;
        let (body, object) = tx.slot.resolve_insert(self.options, obligation);
        let found = Found::new(object, LookupState::FOUND | LookupState::USABLE);
        Ok((body, found))
    }
}

/// A builder-style API for configuring a transactional revalidation.
///
/// Update operations only modify a cached item's metadata; the object's
/// bytes are untouched.
pub struct TransactionUpdateBuilder<'a> {
    transaction: &'a Transaction,
    options: WriteOptions,
}

impl<'a> TransactionUpdateBuilder<'a> {
    /// Sets the list of headers that must match when looking up this cached
    /// item.
    pub fn vary_by(mut self, headers: impl IntoIterator<Item = impl ToHeaderName>) -> Self {
        self.options.vary = headers.into_iter().map(ToHeaderName::into_header_name).collect();
        self
    }

    /// Sets the initial age of the cached item.
    pub fn initial_age(mut self, age: Duration) -> Self {
        self.options.initial_age = age;
        self
    }

    /// Sets the time for which the cached item can safely be used despite
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

    /// Sets the user-defined metadata to associate with the cached item.
    pub fn user_metadata(mut self, user_metadata: impl Into<Bytes>) -> Self {
        self.options.user_metadata = user_metadata.into();
        self
    }

    /// Sets whether the cached item holds sensitive data.
    pub fn sensitive_data(mut self, is_sensitive_data: bool) -> Self {
        self.options.sensitive = is_sensitive_data;
        self
    }

    /// Apply the update, resolving the transaction and waking any blocked
    /// lookups of the same item.
    ///
    /// Fails with [`CacheError::InvalidState`] if the lookup did not find an
    /// item or the transaction holds no write obligation, and
    /// [`CacheError::AlreadyResolved`] if it was already resolved.
    pub fn execute(self) -> Result<(), CacheError> {
        let tx = self.transaction;
        let object = tx.object.as_ref().ok_or(CacheError::InvalidState)?;
        let obligation = tx.obligation()?;
        tx.take_resolution()?;
        tx.slot.resolve_update(object, self.options, obligation);
        Ok(())
    }
}
