//! Entry store internals.
//!
//! The store maps cache keys to slots; each slot holds the variants produced
//! under its current vary rule, plus the set of resolved identities with an
//! outstanding transactional write obligation. All cross-request coordination
//! happens on the slot's mutex and condvar.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace};

use super::vary::{VariantKey, VaryRule};
use super::{CacheKey, LookupState};
use crate::body::{Pipe, StreamingBody};

/// Owned write options shared by insert and update operations.
///
/// Builders fill these in; durations and lengths are typed, so negative or
/// non-finite values are unrepresentable.
pub(crate) struct WriteOptions {
    pub(crate) max_age: Duration,
    pub(crate) initial_age: Duration,
    pub(crate) stale_while_revalidate: Duration,
    pub(crate) vary: Vec<HeaderName>,
    pub(crate) request_headers: HeaderMap,
    pub(crate) surrogate_keys: Vec<String>,
    pub(crate) length: Option<u64>,
    pub(crate) user_metadata: Bytes,
    pub(crate) sensitive: bool,
}

impl WriteOptions {
    pub(crate) fn new(max_age: Duration) -> Self {
        WriteOptions {
            max_age,
            initial_age: Duration::ZERO,
            stale_while_revalidate: Duration::ZERO,
            vary: Vec::new(),
            request_headers: HeaderMap::new(),
            surrogate_keys: Vec::new(),
            length: None,
            user_metadata: Bytes::new(),
            sensitive: false,
        }
    }
}

/// Metadata fields that an update may replace wholesale.
struct ObjectMeta {
    max_age: Duration,
    initial_age: Duration,
    stale_while_revalidate: Duration,
    inserted_at: Instant,
    user_metadata: Bytes,
    surrogate_keys: Vec<String>,
    sensitive: bool,
}

impl ObjectMeta {
    fn from_options(opts: &WriteOptions) -> Self {
        ObjectMeta {
            max_age: opts.max_age,
            initial_age: opts.initial_age,
            stale_while_revalidate: opts.stale_while_revalidate,
            inserted_at: Instant::now(),
            user_metadata: opts.user_metadata.clone(),
            surrogate_keys: opts.surrogate_keys.clone(),
            sensitive: opts.sensitive,
        }
    }
}

/// One stored variant: body pipe, freshness metadata, and a hit counter.
pub(crate) struct CacheObject {
    pipe: Arc<Pipe>,
    hits: AtomicU64,
    meta: RwLock<ObjectMeta>,
}

impl CacheObject {
    fn new(opts: &WriteOptions) -> Arc<Self> {
        Arc::new(CacheObject {
            pipe: Pipe::new(opts.length),
            hits: AtomicU64::new(0),
            meta: RwLock::new(ObjectMeta::from_options(opts)),
        })
    }

    pub(crate) fn pipe(&self) -> Arc<Pipe> {
        self.pipe.clone()
    }

    /// Current age: the initial age plus wall-clock time since insertion.
    pub(crate) fn age(&self) -> Duration {
        let meta = self.meta.read();
        meta.initial_age + meta.inserted_at.elapsed()
    }

    pub(crate) fn max_age(&self) -> Duration {
        self.meta.read().max_age
    }

    pub(crate) fn stale_while_revalidate(&self) -> Duration {
        self.meta.read().stale_while_revalidate
    }

    pub(crate) fn user_metadata(&self) -> Bytes {
        self.meta.read().user_metadata.clone()
    }

    pub(crate) fn is_sensitive(&self) -> bool {
        self.meta.read().sensitive
    }

    pub(crate) fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Usable means servable: fresh, or stale but within the
    /// stale-while-revalidate grace period.
    fn is_usable(&self) -> bool {
        let meta = self.meta.read();
        meta.initial_age + meta.inserted_at.elapsed() <= meta.max_age + meta.stale_while_revalidate
    }

    pub(crate) fn is_stale(&self) -> bool {
        let meta = self.meta.read();
        meta.initial_age + meta.inserted_at.elapsed() > meta.max_age
    }

    fn record_hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the metadata without touching the body. Any field the caller
    /// did not set reverts to its default.
    fn freshen(&self, opts: &WriteOptions) {
        *self.meta.write() = ObjectMeta::from_options(opts);
    }

    fn has_surrogate_key(&self, surrogate: &str) -> bool {
        self.meta.read().surrogate_keys.iter().any(|k| k == surrogate)
    }
}

#[derive(Default)]
struct SlotState {
    /// The rule defined by the most recent write to this key.
    vary: VaryRule,
    variants: HashMap<VariantKey, Arc<CacheObject>>,
    /// Resolved identities with an open transactional write obligation.
    pending: HashSet<VariantKey>,
}

/// Per-key coordination point.
pub(crate) struct Slot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl Slot {
    fn new() -> Arc<Self> {
        Arc::new(Slot {
            state: Mutex::new(SlotState::default()),
            cond: Condvar::new(),
        })
    }

    /// Insert a variant on behalf of a resolved transaction, then release the
    /// obligation and wake waiters.
    pub(crate) fn resolve_insert(
        &self,
        opts: WriteOptions,
        obligation: &VariantKey,
    ) -> (StreamingBody, Arc<CacheObject>) {
        let mut st = self.state.lock();
        let object = insert_variant(&mut st, opts);
        st.pending.remove(obligation);
        drop(st);
        self.cond.notify_all();
        (StreamingBody::new(object.pipe()), object)
    }

    /// Freshen a found object's metadata without rewriting its body, re-home
    /// it under the updated vary rule, then release the obligation.
    pub(crate) fn resolve_update(
        &self,
        object: &Arc<CacheObject>,
        opts: WriteOptions,
        obligation: &VariantKey,
    ) {
        let mut st = self.state.lock();
        st.variants.retain(|_, o| !Arc::ptr_eq(o, object));
        st.vary = VaryRule::new(opts.vary.iter().cloned());
        let vkey = st.vary.variant_key(&opts.request_headers);
        object.freshen(&opts);
        st.variants.insert(vkey, object.clone());
        st.pending.remove(obligation);
        drop(st);
        self.cond.notify_all();
    }

    /// Release an obligation without writing; a blocked waiter (if any)
    /// proceeds as if the original lookup had missed.
    pub(crate) fn release(&self, obligation: &VariantKey) {
        let mut st = self.state.lock();
        st.pending.remove(obligation);
        drop(st);
        self.cond.notify_all();
    }
}

/// Replace the slot's vary rule with the write's rule and store the new
/// object under the write's projection.
fn insert_variant(st: &mut SlotState, opts: WriteOptions) -> Arc<CacheObject> {
    st.vary = VaryRule::new(opts.vary.iter().cloned());
    let vkey = st.vary.variant_key(&opts.request_headers);
    let object = CacheObject::new(&opts);
    st.variants.insert(vkey, object.clone());
    object
}

/// Drop the variant for `vkey` if it can no longer serve lookups.
fn usable_variant(st: &mut SlotState, vkey: &VariantKey) -> Option<Arc<CacheObject>> {
    match st.variants.get(vkey) {
        Some(object) if object.pipe.is_aborted() || !object.is_usable() => {
            st.variants.remove(vkey);
            None
        }
        Some(object) => Some(object.clone()),
        None => None,
    }
}

/// Outcome of a transactional lookup, consumed by [`crate::Transaction`].
pub(crate) struct TxLookup {
    pub(crate) slot: Arc<Slot>,
    pub(crate) object: Option<Arc<CacheObject>>,
    pub(crate) state: LookupState,
    pub(crate) obligation: Option<VariantKey>,
}

/// The process-wide associative store behind a [`crate::CoreCache`] handle.
pub(crate) struct StoreInner {
    slots: Mutex<HashMap<Bytes, Arc<Slot>>>,
}

impl StoreInner {
    pub(crate) fn new() -> Self {
        StoreInner {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &CacheKey) -> Option<Arc<Slot>> {
        self.slots.lock().get(key).cloned()
    }

    fn slot_or_create(&self, key: &CacheKey) -> Arc<Slot> {
        self.slots.lock().entry(key.clone()).or_insert_with(Slot::new).clone()
    }

    /// Non-blocking lookup. A hit increments the object's hit counter.
    pub(crate) fn lookup(
        &self,
        key: &CacheKey,
        headers: &HeaderMap,
    ) -> Option<(Arc<CacheObject>, LookupState)> {
        let slot = self.slot(key)?;
        let mut st = slot.state.lock();
        let vkey = st.vary.variant_key(headers);
        let object = usable_variant(&mut st, &vkey)?;
        let hits = object.record_hit();
        let mut state = LookupState::FOUND | LookupState::USABLE;
        if object.is_stale() {
            state |= LookupState::STALE;
        }
        trace!(key_len = key.len(), hits, "lookup hit");
        Some((object, state))
    }

    /// Non-transactional insert: no coordination with concurrent writers;
    /// the new entry is immediately visible to matching lookups.
    pub(crate) fn insert(
        &self,
        key: &CacheKey,
        opts: WriteOptions,
    ) -> (StreamingBody, Arc<CacheObject>) {
        let slot = self.slot_or_create(key);
        let mut st = slot.state.lock();
        let object = insert_variant(&mut st, opts);
        drop(st);
        // waiters blocked on a transactional obligation can serve this entry
        slot.cond.notify_all();
        trace!(key_len = key.len(), "insert");
        (StreamingBody::new(object.pipe()), object)
    }

    /// Transactional lookup: blocks while another transaction holds the write
    /// obligation for the same resolved identity, then either returns the
    /// newly written entry or inherits the obligation.
    pub(crate) fn transaction_lookup(&self, key: &CacheKey, headers: &HeaderMap) -> TxLookup {
        let slot = self.slot_or_create(key);
        let mut st = slot.state.lock();
        loop {
            // the vary rule may have changed while we were blocked, so the
            // projection is recomputed on every pass
            let vkey = st.vary.variant_key(headers);
            if let Some(object) = usable_variant(&mut st, &vkey) {
                object.record_hit();
                let mut state = LookupState::FOUND | LookupState::USABLE;
                let mut obligation = None;
                if object.is_stale() {
                    state |= LookupState::STALE;
                    if !st.pending.contains(&vkey) {
                        st.pending.insert(vkey.clone());
                        state |= LookupState::MUST_INSERT_OR_UPDATE;
                        obligation = Some(vkey);
                        debug!(key_len = key.len(), "stale hit; revalidation obligation granted");
                    }
                }
                return TxLookup {
                    slot: slot.clone(),
                    object: Some(object),
                    state,
                    obligation,
                };
            }
            if st.pending.contains(&vkey) {
                trace!(key_len = key.len(), "blocking on concurrent writer");
                slot.cond.wait(&mut st);
                continue;
            }
            st.pending.insert(vkey.clone());
            debug!(key_len = key.len(), "transaction miss; insert obligation granted");
            return TxLookup {
                slot: slot.clone(),
                object: None,
                state: LookupState::MUST_INSERT_OR_UPDATE,
                obligation: Some(vkey),
            };
        }
    }

    /// Drop every variant tagged with the given surrogate key. Open readers
    /// of a purged entry keep streaming; the data only becomes unreachable.
    pub(crate) fn purge_surrogate_key(&self, surrogate: &str) -> usize {
        let slots: Vec<Arc<Slot>> = self.slots.lock().values().cloned().collect();
        let mut removed = 0;
        for slot in slots {
            let mut st = slot.state.lock();
            let before = st.variants.len();
            st.variants.retain(|_, object| !object.has_surrogate_key(surrogate));
            removed += before - st.variants.len();
        }
        if removed > 0 {
            debug!(removed, "surrogate key purge");
        }
        removed
    }
}
