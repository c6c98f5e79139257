//! Reference-counted, capacity-bounded cache core
//!
//! [`HandleCache`] owns the key index, the slot arena and the usage counter;
//! an [`EvictionOrder`] decides which unpinned entry leaves first. Every
//! public method takes the single cache lock for its whole duration.
//!
//! Entry lifecycle:
//! ```text
//! insert ──► refs=2 (table + caller), pinned
//!              │ release
//!              ▼
//!            refs=1, evictable ◄──── release ───┐
//!              │ lookup                          │
//!              └──────────► refs>=2, pinned ─────┘
//!
//! evict / erase / replace: leave the table, drop the table's reference
//! refs reaches 0: finalizer runs (after the lock is released)
//! ```

use std::collections::TryReserveError;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use toonfilter::{KeyHasher, Murmur3};
use tracing::{debug, error, trace, warn};

use crate::error::{CacheError, Result};
use crate::handle::{finalize_all, EntryData, Finalizer, Handle, Retired, Slot, SlotArena};
use crate::list::SlotId;
use crate::stats::CacheStats;
use crate::table::HandleTable;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Ordering structure deciding which evictable entry goes first
///
/// The cache calls these hooks under its lock at every reference-count
/// transition of an entry that is in the table.
pub trait EvictionOrder: Send {
    /// Make room to track slots `0..slots`
    fn try_reserve(&mut self, slots: usize) -> std::result::Result<(), TryReserveError>;

    /// A new entry entered the table, pinned by the handle returned to its
    /// creator
    fn admit(&mut self, id: SlotId);

    /// An evictable entry picked up a handle
    fn pin(&mut self, id: SlotId);

    /// A lookup hit `id`; called after `pin` when both apply
    fn touch(&mut self, _id: SlotId) {}

    /// Only the table's reference is left
    fn unpin(&mut self, id: SlotId);

    /// `id` left the table
    fn remove(&mut self, id: SlotId);

    /// Next entry to evict, if any entry is evictable
    fn victim(&self) -> Option<SlotId>;

    /// Number of evictable entries
    fn evictable(&self) -> usize;
}

/// The protocol a storage engine drives its block cache with
pub trait Cache<V>: Send + Sync {
    /// Insert `value` under `key`, returning a handle to the new entry
    ///
    /// An entry already under `key` becomes unreachable; it stays valid for
    /// anyone still holding a handle to it.
    fn insert(
        &self,
        key: &[u8],
        hash: u32,
        value: V,
        charge: usize,
        finalizer: Option<Finalizer<V>>,
    ) -> Result<Handle<V>>;

    /// Handle to the entry under `key`, if present with a matching hash
    fn lookup(&self, key: &[u8], hash: u32) -> Option<Handle<V>>;

    /// Give back a handle from `insert` or `lookup`
    fn release(&self, handle: Handle<V>);

    /// Make `key` unreachable
    fn erase(&self, key: &[u8], hash: u32);

    /// Evict every entry not pinned by a handle
    fn prune(&self);

    /// Change the capacity, evicting down to it if needed
    fn set_capacity(&self, capacity: usize);

    /// Capacity in charge units
    fn capacity(&self) -> usize;

    /// Sum of the charges of all entries reachable by key
    fn total_charge(&self) -> usize;

    /// Number of entries reachable by key
    fn len(&self) -> usize;

    /// Whether no entry is reachable by key
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash `key` with the cache's hasher
    fn hash_key(&self, key: &[u8]) -> u32;

    /// Hit/miss/eviction counters
    fn stats(&self) -> &CacheStats;
}

/// Capacity-bounded cache of reference-counted entries
///
/// Use it through [`LruCache`](crate::LruCache) or
/// [`LfuCache`](crate::LfuCache).
pub struct HandleCache<V, O: EvictionOrder, H = Murmur3> {
    id: u64,
    hasher: H,
    stats: CacheStats,
    state: Mutex<State<V, O>>,
}

struct State<V, O> {
    capacity: usize,
    usage: usize,
    table: HandleTable,
    slots: SlotArena<V>,
    order: O,
}

impl<V, O: EvictionOrder> State<V, O> {
    fn reserve(&mut self) -> std::result::Result<(), TryReserveError> {
        self.table.try_reserve(1)?;
        let bound = self.slots.try_reserve()?;
        self.order.try_reserve(bound)
    }

    fn find(&self, key: &[u8], hash: u32) -> Option<SlotId> {
        let id = self.table.find(key)?;
        let slot = self.slots.get(id)?;
        (slot.entry.hash == hash).then_some(id)
    }

    /// Take a new reference to `id`, which must be in the table
    fn acquire(&mut self, id: SlotId) -> Option<(Arc<EntryData<V>>, u32)> {
        let generation = self.slots.generation(id);
        let slot = self.slots.get_mut(id)?;
        slot.refs += 1;
        let entry = slot.entry.clone();
        let was_evictable = slot.refs == 2;

        if was_evictable {
            self.order.pin(id);
        }
        self.order.touch(id);
        Some((entry, generation))
    }

    /// Drop one reference to `id`
    fn unref(&mut self, id: SlotId, retired: &mut Vec<Retired<V>>) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        debug_assert!(slot.refs > 0, "reference count underflow");
        slot.refs -= 1;
        let (refs, in_table) = (slot.refs, slot.in_table);

        if refs == 0 {
            debug_assert!(!in_table, "finalizing an entry still in the table");
            if let Some(slot) = self.slots.free(id) {
                retired.push(slot.retire());
            }
        } else if refs == 1 && in_table {
            self.order.unpin(id);
        }
    }

    /// Finish removing `id`, whose key the caller already took out of the
    /// index
    fn finish_erase(&mut self, id: SlotId, retired: &mut Vec<Retired<V>>) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        debug_assert!(slot.in_table, "entry left the table twice");
        slot.in_table = false;
        self.usage -= slot.entry.charge;
        self.order.remove(id);
        self.unref(id, retired);
    }

    fn evict_one(&mut self, retired: &mut Vec<Retired<V>>) -> bool {
        let Some(victim) = self.order.victim() else {
            return false;
        };
        let slot = self.slots.get(victim);
        debug_assert!(slot.is_some(), "eviction order returned a free slot");
        let Some(slot) = slot else {
            return false;
        };
        debug_assert_eq!(slot.refs, 1, "eviction order returned a pinned entry");

        let key = slot.entry.key.clone();
        trace!(slot = victim.index(), charge = slot.entry.charge, "evicting entry");
        self.table.remove(&key);
        self.finish_erase(victim, retired);
        true
    }

    fn evict_to_capacity(&mut self, retired: &mut Vec<Retired<V>>) -> usize {
        let mut evicted = 0;
        while self.usage > self.capacity && self.evict_one(retired) {
            evicted += 1;
        }
        if self.usage > self.capacity {
            debug!(
                usage = self.usage,
                capacity = self.capacity,
                "over capacity, remaining entries are pinned"
            );
        }
        evicted
    }

    fn prune(&mut self, retired: &mut Vec<Retired<V>>) -> usize {
        let mut evicted = 0;
        while self.evict_one(retired) {
            evicted += 1;
        }
        evicted
    }
}

impl<V, O: EvictionOrder + Default> HandleCache<V, O, Murmur3> {
    /// Create a cache hashing keys with Murmur3
    ///
    /// # Arguments
    /// * `capacity` - Total charge the cache holds before it starts evicting
    ///
    /// # Returns
    /// * `HandleCache` - Empty cache; usually named as `LruCache` or `LfuCache`
    pub fn new(capacity: usize) -> Self {
        Self::with_hasher(capacity, Murmur3)
    }
}

impl<V, O: EvictionOrder + Default, H: KeyHasher> HandleCache<V, O, H> {
    /// Create a cache with an explicit key hasher
    ///
    /// # Arguments
    /// * `capacity` - Total charge the cache holds before it starts evicting
    /// * `hasher` - Hasher behind [`hash_key`](Self::hash_key)
    pub fn with_hasher(capacity: usize, hasher: H) -> Self {
        Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            hasher,
            stats: CacheStats::new(),
            state: Mutex::new(State {
                capacity,
                usage: 0,
                table: HandleTable::new(),
                slots: SlotArena::new(),
                order: O::default(),
            }),
        }
    }
}

impl<V, O: EvictionOrder, H: KeyHasher> HandleCache<V, O, H> {
    /// Hash `key` the way callers should for `insert`, `lookup` and `erase`
    pub fn hash_key(&self, key: &[u8]) -> u32 {
        self.hasher.hash(key, 0)
    }

    /// Insert `value` under `key`, returning a handle to the new entry
    ///
    /// Any entry already under `key` leaves the table first. Unpinned entries
    /// are then evicted until usage fits the capacity again; if everything
    /// left is pinned, usage stays above capacity until handles come back.
    ///
    /// # Arguments
    /// * `key` - Key bytes, copied into the entry
    /// * `hash` - Hash of `key`, normally from [`hash_key`](Self::hash_key)
    /// * `value` - Value to cache
    /// * `charge` - Capacity units the entry consumes
    /// * `finalizer` - Called with the key and value once the last reference
    ///   is gone; without one the value is dropped
    ///
    /// # Returns
    /// * `Result<Handle<V>>` - Handle pinning the new entry; pass it to
    ///   `release` when done
    ///
    /// # Errors
    /// [`CacheError::AllocationFailed`] if the index or slot storage cannot
    /// grow, [`CacheError::ChargeOverflow`] if the total charge would no longer
    /// fit in a `usize`.
    pub fn insert(
        &self,
        key: &[u8],
        hash: u32,
        value: V,
        charge: usize,
        finalizer: Option<Finalizer<V>>,
    ) -> Result<Handle<V>> {
        let mut retired = Vec::new();
        let (handle, replaced, evicted) = {
            let mut state = self.state.lock();
            if state.usage.checked_add(charge).is_none() {
                return Err(CacheError::ChargeOverflow {
                    charge,
                    usage: state.usage,
                });
            }
            state.reserve()?;

            let key: Arc<[u8]> = Arc::from(key);
            let entry = Arc::new(EntryData {
                key: key.clone(),
                hash,
                charge,
                value,
            });
            let (id, generation) = state.slots.alloc(Slot {
                entry: entry.clone(),
                finalizer,
                refs: 2,
                in_table: true,
            });
            state.order.admit(id);

            let replaced = match state.table.insert(key, id) {
                Some(old) => {
                    state.finish_erase(old, &mut retired);
                    true
                }
                None => false,
            };
            state.usage += charge;
            let evicted = state.evict_to_capacity(&mut retired);

            (Handle::new(self.id, id, generation, entry), replaced, evicted)
        };

        if replaced {
            debug!(slot = handle.slot.index(), "replaced entry under existing key");
        }
        self.stats.record_insert(replaced);
        self.stats.record_evictions(evicted);
        self.finalize(retired);
        Ok(handle)
    }

    /// Handle to the entry under `key`, or `None` on a miss
    ///
    /// An entry whose stored hash differs from `hash` counts as a miss.
    pub fn lookup(&self, key: &[u8], hash: u32) -> Option<Handle<V>> {
        let found = {
            let mut state = self.state.lock();
            state
                .find(key, hash)
                .and_then(|id| state.acquire(id).map(|(entry, generation)| (id, entry, generation)))
        };

        match found {
            Some((slot, entry, generation)) => {
                self.stats.record_hit();
                Some(Handle::new(self.id, slot, generation, entry))
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Give back a handle
    ///
    /// Runs the finalizer if this was the last reference to an entry that
    /// already left the table.
    pub fn release(&self, mut handle: Handle<V>) {
        handle.disarm();
        let (cache_id, slot, generation) = (handle.cache_id, handle.slot, handle.generation);

        debug_assert_eq!(cache_id, self.id, "handle released to a cache that did not issue it");
        if cache_id != self.id {
            error!(cache_id, expected = self.id, "ignoring handle from another cache");
            return;
        }
        // The slot's copy must be the last one by the time refs hits zero
        drop(handle);

        let mut retired = Vec::new();
        {
            let mut state = self.state.lock();
            let current = state.slots.get_current(slot, generation);
            debug_assert!(current.is_some(), "handle refers to a finalized entry");
            let Some(current) = current else {
                error!(slot = slot.index(), "ignoring stale handle");
                return;
            };
            debug_assert!(
                current.refs > u32::from(current.in_table),
                "handle released more often than acquired"
            );
            state.unref(slot, &mut retired);
        }
        self.finalize(retired);
    }

    /// Make `key` unreachable if it is present with a matching hash
    ///
    /// The entry is finalized now if nothing pins it, otherwise when its last
    /// handle is released.
    pub fn erase(&self, key: &[u8], hash: u32) {
        let mut retired = Vec::new();
        let erased = {
            let mut state = self.state.lock();
            match state.find(key, hash) {
                Some(id) => {
                    state.table.remove(key);
                    state.finish_erase(id, &mut retired);
                    true
                }
                None => false,
            }
        };

        if erased {
            self.stats.record_erase();
        }
        self.finalize(retired);
    }

    /// Evict every entry not pinned by a handle, regardless of capacity
    pub fn prune(&self) {
        let mut retired = Vec::new();
        let evicted = self.state.lock().prune(&mut retired);

        debug!(evicted, "pruned cache");
        self.stats.record_evictions(evicted);
        self.finalize(retired);
    }

    /// Change the capacity; shrinking evicts unpinned entries right away
    pub fn set_capacity(&self, capacity: usize) {
        let mut retired = Vec::new();
        let evicted = {
            let mut state = self.state.lock();
            debug!(from = state.capacity, to = capacity, "changing cache capacity");
            state.capacity = capacity;
            state.evict_to_capacity(&mut retired)
        };

        self.stats.record_evictions(evicted);
        self.finalize(retired);
    }

    /// Capacity in charge units
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Sum of the charges of all entries reachable by key
    pub fn total_charge(&self) -> usize {
        self.state.lock().usage
    }

    /// Number of entries reachable by key
    pub fn len(&self) -> usize {
        self.state.lock().table.len()
    }

    /// Whether no entry is reachable by key
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit/miss/eviction counters
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Run finalizers outside the lock; a panicking finalizer does not stop
    /// the rest of the batch, and its panic resumes afterwards
    fn finalize(&self, retired: Vec<Retired<V>>) {
        let (n, first_panic) = finalize_all(retired);
        self.stats.record_finalized(n);
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }
}

impl<V, O, H> Cache<V> for HandleCache<V, O, H>
where
    V: Send + Sync + 'static,
    O: EvictionOrder,
    H: KeyHasher,
{
    fn insert(
        &self,
        key: &[u8],
        hash: u32,
        value: V,
        charge: usize,
        finalizer: Option<Finalizer<V>>,
    ) -> Result<Handle<V>> {
        HandleCache::insert(self, key, hash, value, charge, finalizer)
    }

    fn lookup(&self, key: &[u8], hash: u32) -> Option<Handle<V>> {
        HandleCache::lookup(self, key, hash)
    }

    fn release(&self, handle: Handle<V>) {
        HandleCache::release(self, handle)
    }

    fn erase(&self, key: &[u8], hash: u32) {
        HandleCache::erase(self, key, hash)
    }

    fn prune(&self) {
        HandleCache::prune(self)
    }

    fn set_capacity(&self, capacity: usize) {
        HandleCache::set_capacity(self, capacity)
    }

    fn capacity(&self) -> usize {
        HandleCache::capacity(self)
    }

    fn total_charge(&self) -> usize {
        HandleCache::total_charge(self)
    }

    fn len(&self) -> usize {
        HandleCache::len(self)
    }

    fn hash_key(&self, key: &[u8]) -> u32 {
        HandleCache::hash_key(self, key)
    }

    fn stats(&self) -> &CacheStats {
        HandleCache::stats(self)
    }
}

impl<V, O: EvictionOrder, H> Drop for HandleCache<V, O, H> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let mut retired = Vec::new();
        state.prune(&mut retired);

        let pinned = state.slots.live();
        if pinned > 0 {
            warn!(pinned, "cache dropped with outstanding handles, their finalizers will not run");
        }
        let (_, first_panic) = finalize_all(retired);
        if let Some(payload) = first_panic {
            if std::thread::panicking() {
                error!("finalizer panicked while dropping cache");
            } else {
                panic::resume_unwind(payload);
            }
        }
    }
}

#[cfg(test)]
impl<V, O: EvictionOrder, H> HandleCache<V, O, H> {
    /// Cross-check usage, index and eviction order against the slots
    pub(crate) fn check_invariants(&self) {
        let state = self.state.lock();
        let mut usage = 0;
        let mut indexed = 0;
        let mut evictable = 0;

        for (id, slot) in state.slots.iter() {
            assert!(slot.refs >= 1, "live slot without references");
            if slot.in_table {
                usage += slot.entry.charge;
                indexed += 1;
                assert_eq!(state.table.find(&slot.entry.key), Some(id));
                if slot.refs == 1 {
                    evictable += 1;
                }
            }
        }

        assert_eq!(usage, state.usage, "usage out of sync");
        assert_eq!(indexed, state.table.len(), "index out of sync");
        assert_eq!(evictable, state.order.evictable(), "eviction order out of sync");
    }

    pub(crate) fn evictable(&self) -> usize {
        self.state.lock().order.evictable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LfuCache, LruCache};
    use proptest::prelude::*;

    type Log = Arc<Mutex<Vec<(Vec<u8>, u32)>>>;

    fn recorder(log: &Log) -> Option<Finalizer<u32>> {
        let log = log.clone();
        Some(Box::new(move |key: &[u8], value: u32| {
            log.lock().push((key.to_vec(), value));
        }))
    }

    fn put<O: EvictionOrder>(cache: &HandleCache<u32, O>, key: &str, value: u32, log: &Log) {
        let h = cache.hash_key(key.as_bytes());
        let handle = cache
            .insert(key.as_bytes(), h, value, 1, recorder(log))
            .unwrap();
        cache.release(handle);
    }

    #[test]
    fn test_insert_lookup_release() {
        let cache: LruCache<u32> = LruCache::new(10);
        let log = Log::default();
        let h = cache.hash_key(b"a");

        let handle = cache.insert(b"a", h, 1, 1, recorder(&log)).unwrap();
        assert_eq!(handle.key(), b"a");
        assert_eq!(*handle.value(), 1);
        assert_eq!(cache.total_charge(), 1);
        assert_eq!(cache.len(), 1);
        cache.release(handle);

        let found = cache.lookup(b"a", h).unwrap();
        assert_eq!(*found.value(), 1);
        cache.release(found);

        assert!(cache.lookup(b"b", cache.hash_key(b"b")).is_none());
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert!(log.lock().is_empty());
        cache.check_invariants();
    }

    #[test]
    fn test_hash_mismatch_is_a_miss() {
        let cache: LruCache<u32> = LruCache::new(10);
        let log = Log::default();
        put(&cache, "k", 7, &log);

        let h = cache.hash_key(b"k");
        assert!(cache.lookup(b"k", h.wrapping_add(1)).is_none());

        // Erase with the wrong hash leaves the entry alone
        cache.erase(b"k", h.wrapping_add(1));
        assert_eq!(cache.len(), 1);

        let handle = cache.lookup(b"k", h).unwrap();
        cache.release(handle);
    }

    #[test]
    fn test_reference_counting_across_erase() {
        let cache: LruCache<u32> = LruCache::new(10);
        let log = Log::default();
        let h = cache.hash_key(b"k");

        let h1 = cache.insert(b"k", h, 42, 1, recorder(&log)).unwrap();
        let h2 = cache.lookup(b"k", h).unwrap();
        cache.erase(b"k", h);

        assert!(cache.lookup(b"k", h).is_none());
        assert_eq!(cache.total_charge(), 0);
        assert!(log.lock().is_empty());

        cache.release(h1);
        assert!(log.lock().is_empty());
        assert_eq!(*h2.value(), 42);

        cache.release(h2);
        assert_eq!(*log.lock(), vec![(b"k".to_vec(), 42)]);
        assert_eq!(cache.stats().finalized(), 1);
        cache.check_invariants();
    }

    #[test]
    fn test_erase_unpinned_finalizes_immediately() {
        let cache: LfuCache<u32> = LfuCache::new(10);
        let log = Log::default();
        put(&cache, "k", 3, &log);

        cache.erase(b"k", cache.hash_key(b"k"));
        assert_eq!(*log.lock(), vec![(b"k".to_vec(), 3)]);

        // Erasing again is a no-op
        cache.erase(b"k", cache.hash_key(b"k"));
        assert_eq!(log.lock().len(), 1);
        cache.check_invariants();
    }

    #[test]
    fn test_replace_keeps_pinned_old_entry_alive() {
        let cache: LruCache<u32> = LruCache::new(10);
        let log = Log::default();
        let h = cache.hash_key(b"k");

        let old = cache.insert(b"k", h, 1, 4, recorder(&log)).unwrap();
        let new = cache.insert(b"k", h, 2, 3, recorder(&log)).unwrap();

        // Old entry is out of the table and out of the usage
        assert_eq!(cache.total_charge(), 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(*old.value(), 1);

        let found = cache.lookup(b"k", h).unwrap();
        assert_eq!(*found.value(), 2);
        cache.release(found);

        cache.release(old);
        assert_eq!(*log.lock(), vec![(b"k".to_vec(), 1)]);

        cache.release(new);
        assert_eq!(log.lock().len(), 1);
        cache.check_invariants();
    }

    #[test]
    fn test_replace_unpinned_old_entry_finalizes() {
        let cache: LruCache<u32> = LruCache::new(10);
        let log = Log::default();
        put(&cache, "k", 1, &log);
        put(&cache, "k", 2, &log);

        assert_eq!(*log.lock(), vec![(b"k".to_vec(), 1)]);
        assert_eq!(cache.stats().snapshot().replacements, 1);
        assert_eq!(cache.total_charge(), 1);
    }

    #[test]
    fn test_pinned_entries_survive_eviction() {
        let cache: LruCache<u32> = LruCache::new(2);
        let log = Log::default();

        let a = cache.insert(b"a", cache.hash_key(b"a"), 1, 1, recorder(&log)).unwrap();
        let b = cache.insert(b"b", cache.hash_key(b"b"), 2, 1, recorder(&log)).unwrap();
        let c = cache.insert(b"c", cache.hash_key(b"c"), 3, 1, recorder(&log)).unwrap();

        // Everything is pinned: usage may exceed capacity
        assert_eq!(cache.total_charge(), 3);
        assert!(log.lock().is_empty());
        assert_eq!((*a.value(), *b.value(), *c.value()), (1, 2, 3));

        cache.release(a);
        cache.release(b);
        cache.release(c);
        assert_eq!(cache.total_charge(), 3);

        // Next insert brings usage back under capacity
        put(&cache, "d", 4, &log);
        assert_eq!(cache.total_charge(), 2);
        assert_eq!(log.lock().len(), 2);
        cache.check_invariants();
    }

    #[test]
    fn test_prune_keeps_pinned() {
        let cache: LfuCache<u32> = LfuCache::new(100);
        let log = Log::default();
        put(&cache, "a", 1, &log);
        put(&cache, "b", 2, &log);
        let held = cache.lookup(b"b", cache.hash_key(b"b")).unwrap();

        cache.prune();
        assert_eq!(cache.len(), 1);
        assert_eq!(*log.lock(), vec![(b"a".to_vec(), 1)]);

        cache.release(held);
        cache.prune();
        assert!(cache.is_empty());
        assert_eq!(cache.total_charge(), 0);
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_set_capacity_shrinks_now() {
        let cache: LruCache<u32> = LruCache::new(10);
        let log = Log::default();
        for (i, key) in ["a", "b", "c", "d"].into_iter().enumerate() {
            put(&cache, key, i as u32, &log);
        }

        cache.set_capacity(2);
        assert_eq!(cache.capacity(), 2);
        assert_eq!(cache.total_charge(), 2);
        assert_eq!(cache.stats().evictions(), 2);
        cache.check_invariants();
    }

    #[test]
    fn test_finalizer_may_reenter_cache() {
        let cache = Arc::new(LruCache::<u32>::new(1));
        let inner = cache.clone();
        let h = cache.hash_key(b"a");

        let handle = cache
            .insert(
                b"a",
                h,
                1,
                1,
                Some(Box::new(move |_key: &[u8], _value: u32| {
                    // Would deadlock if finalizers ran under the lock
                    let _ = inner.total_charge();
                })),
            )
            .unwrap();
        cache.release(handle);
        cache.erase(b"a", h);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_panicking_finalizer_does_not_skip_others() {
        let cache: LruCache<u32> = LruCache::new(10);
        let log = Log::default();

        let h = cache.hash_key(b"a");
        let handle = cache
            .insert(
                b"a",
                h,
                1,
                1,
                Some(Box::new(|_key: &[u8], _value: u32| panic!("finalizer failed"))),
            )
            .unwrap();
        cache.release(handle);
        put(&cache, "b", 2, &log);
        put(&cache, "c", 3, &log);

        // a is the eviction victim and its finalizer runs first
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cache.prune()));
        assert!(result.is_err());

        assert!(cache.is_empty());
        let mut seen = log.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![(b"b".to_vec(), 2), (b"c".to_vec(), 3)]);
        assert_eq!(cache.stats().finalized(), 3);

        // The lock was not held across the panic
        put(&cache, "d", 4, &log);
        assert_eq!(cache.len(), 1);
        cache.check_invariants();
    }

    #[test]
    fn test_charge_overflow_rejected() {
        let cache: LruCache<u32> = LruCache::new(usize::MAX);
        let log = Log::default();
        let big = cache
            .insert(b"big", cache.hash_key(b"big"), 1, usize::MAX, recorder(&log))
            .unwrap();

        let err = cache.insert(b"one", cache.hash_key(b"one"), 2, 1, recorder(&log));
        assert!(matches!(
            err,
            Err(CacheError::ChargeOverflow { charge: 1, usage: usize::MAX })
        ));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_charge(), usize::MAX);
        cache.check_invariants();

        cache.release(big);
        cache.erase(b"big", cache.hash_key(b"big"));
        put(&cache, "one", 2, &log);
        assert_eq!(cache.total_charge(), 1);
        assert_eq!(*log.lock(), vec![(b"big".to_vec(), 1)]);
    }

    #[test]
    fn test_drop_finalizes_unpinned() {
        let log = Log::default();
        {
            let cache: LruCache<u32> = LruCache::new(10);
            put(&cache, "a", 1, &log);
            put(&cache, "b", 2, &log);
        }
        let mut seen = log.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![(b"a".to_vec(), 1), (b"b".to_vec(), 2)]);
    }

    #[test]
    fn test_handle_outlives_cache() {
        let log = Log::default();
        let handle = {
            let cache: LruCache<u32> = LruCache::new(10);
            cache.insert(b"a", 0, 9, 1, recorder(&log)).unwrap()
        };
        // Value memory stays valid; the finalizer is skipped
        assert_eq!(*handle.value(), 9);
        assert!(log.lock().is_empty());

        // The issuing cache is gone, so there is nothing to release it to
        let mut handle = handle;
        handle.disarm();
    }

    #[test]
    fn test_cache_trait_object() {
        let cache: Box<dyn Cache<String>> = Box::new(LfuCache::<String>::new(8));
        let h = cache.hash_key(b"page");
        let handle = cache.insert(b"page", h, "body".to_string(), 4, None).unwrap();
        cache.release(handle);

        let found = cache.lookup(b"page", h).unwrap();
        assert_eq!(found.value(), "body");
        cache.release(found);
        assert_eq!(cache.total_charge(), 4);
        assert!(!cache.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8, usize),
        Lookup(u8),
        Release(usize),
        Erase(u8),
        Prune,
        SetCapacity(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u8..8, 1usize..4).prop_map(|(k, c)| Op::Insert(k, c)),
            3 => (0u8..8).prop_map(Op::Lookup),
            4 => any::<usize>().prop_map(Op::Release),
            1 => (0u8..8).prop_map(Op::Erase),
            1 => Just(Op::Prune),
            1 => (0usize..16).prop_map(Op::SetCapacity),
        ]
    }

    fn run_ops<O: EvictionOrder + Default>(ops: &[Op]) {
        let cache: HandleCache<u32, O> = HandleCache::new(6);
        let log = Log::default();
        let mut held = Vec::new();
        let mut inserted = 0usize;

        for op in ops {
            match *op {
                Op::Insert(k, charge) => {
                    let key = [k];
                    let h = cache.hash_key(&key);
                    held.push(cache.insert(&key, h, u32::from(k), charge, recorder(&log)).unwrap());
                    inserted += 1;
                }
                Op::Lookup(k) => {
                    let key = [k];
                    if let Some(handle) = cache.lookup(&key, cache.hash_key(&key)) {
                        assert_eq!(*handle.value(), u32::from(k));
                        held.push(handle);
                    }
                }
                Op::Release(i) => {
                    if !held.is_empty() {
                        let handle = held.swap_remove(i % held.len());
                        cache.release(handle);
                    }
                }
                Op::Erase(k) => cache.erase(&[k], cache.hash_key(&[k])),
                Op::Prune => {
                    cache.prune();
                    assert_eq!(cache.evictable(), 0);
                }
                Op::SetCapacity(c) => cache.set_capacity(c),
            }

            if matches!(op, Op::Insert(..) | Op::Prune | Op::SetCapacity(_)) {
                assert!(
                    cache.total_charge() <= cache.capacity() || cache.evictable() == 0,
                    "over capacity with evictable entries left"
                );
            }
            cache.check_invariants();
        }

        for handle in held.drain(..) {
            cache.release(handle);
        }
        cache.prune();
        assert_eq!(cache.total_charge(), 0);
        assert!(cache.is_empty());

        // Every entry finalized exactly once
        assert_eq!(log.lock().len(), inserted);
    }

    proptest! {
        #[test]
        fn prop_lru_bookkeeping(ops in prop::collection::vec(op(), 1..200)) {
            run_ops::<crate::RecencyOrder>(&ops);
        }

        #[test]
        fn prop_lfu_bookkeeping(ops in prop::collection::vec(op(), 1..200)) {
            run_ops::<crate::FrequencyOrder>(&ops);
        }
    }
}
