//! Entries, handles and the slot arena that owns them

use std::any::Any;
use std::collections::TryReserveError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::list::SlotId;

/// Callback run exactly once when an entry's last reference goes away
///
/// Receives the key and takes back ownership of the value.
pub type Finalizer<V> = Box<dyn FnOnce(&[u8], V) + Send>;

/// Immutable part of an entry, shared with every outstanding handle
pub(crate) struct EntryData<V> {
    pub(crate) key: Arc<[u8]>,
    pub(crate) hash: u32,
    pub(crate) charge: usize,
    pub(crate) value: V,
}

/// One held reference to a cache entry
///
/// While a handle is outstanding its entry is never finalized, even if it is
/// evicted, erased or replaced. Give it back with `release`; a handle that is
/// dropped instead keeps the entry pinned for the life of the cache, and
/// trips a debug assertion.
#[must_use = "a handle pins its entry until it is released"]
pub struct Handle<V> {
    pub(crate) cache_id: u64,
    pub(crate) slot: SlotId,
    pub(crate) generation: u32,
    pub(crate) entry: Arc<EntryData<V>>,
    released: bool,
}

impl<V> Handle<V> {
    pub(crate) fn new(cache_id: u64, slot: SlotId, generation: u32, entry: Arc<EntryData<V>>) -> Self {
        Self {
            cache_id,
            slot,
            generation,
            entry,
            released: false,
        }
    }

    /// Mark the handle as given back; dropping it is then silent
    pub(crate) fn disarm(&mut self) {
        self.released = true;
    }

    /// Key the entry was inserted under
    pub fn key(&self) -> &[u8] {
        &self.entry.key
    }

    /// Cached value
    pub fn value(&self) -> &V {
        &self.entry.value
    }

    /// Hash supplied at insert time
    pub fn hash(&self) -> u32 {
        self.entry.hash
    }

    /// Capacity units the entry consumes
    pub fn charge(&self) -> usize {
        self.entry.charge
    }
}

impl<V> fmt::Debug for Handle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("cache_id", &self.cache_id)
            .field("slot", &self.slot)
            .field("key_len", &self.entry.key.len())
            .field("hash", &self.entry.hash)
            .field("charge", &self.entry.charge)
            .finish()
    }
}

impl<V> Drop for Handle<V> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.released,
                "cache handle dropped without release, its entry stays pinned"
            );
        }
    }
}

/// Mutable bookkeeping for a live entry, guarded by the cache lock
pub(crate) struct Slot<V> {
    pub(crate) entry: Arc<EntryData<V>>,
    pub(crate) finalizer: Option<Finalizer<V>>,
    /// One for the table while `in_table`, plus one per outstanding handle
    pub(crate) refs: u32,
    /// Reachable by key; goes false once and stays false
    pub(crate) in_table: bool,
}

/// An entry whose last reference is gone, waiting for its finalizer
pub(crate) struct Retired<V> {
    entry: Arc<EntryData<V>>,
    finalizer: Option<Finalizer<V>>,
}

impl<V> Retired<V> {
    /// Run the finalizer, handing it the key and the value
    pub(crate) fn finalize(self) {
        let entry = Arc::try_unwrap(self.entry);
        debug_assert!(entry.is_ok(), "retired entry is still shared");
        if let (Ok(EntryData { key, value, .. }), Some(finalizer)) = (entry, self.finalizer) {
            finalizer(&key, value);
        }
    }
}

/// Run every finalizer in `retired`, even if some of them panic
///
/// Returns how many entries were finalized and the first panic payload, which
/// the caller should resume once its own bookkeeping is done.
pub(crate) fn finalize_all<V>(retired: Vec<Retired<V>>) -> (usize, Option<Box<dyn Any + Send>>) {
    let n = retired.len();
    let mut first_panic = None;
    for entry in retired {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| entry.finalize())) {
            first_panic.get_or_insert(payload);
        }
    }
    (n, first_panic)
}

struct Cell<V> {
    generation: u32,
    slot: Option<Slot<V>>,
}

/// Slot storage with index reuse
///
/// A generation counter per index lets a stale handle be told apart from the
/// entry that later reuses its slot.
pub(crate) struct SlotArena<V> {
    cells: Vec<Cell<V>>,
    free_list: Vec<usize>,
    live: usize,
}

impl<V> SlotArena<V> {
    pub(crate) fn new() -> Self {
        Self {
            cells: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Make sure the next `alloc` cannot fail; returns the index bound it
    /// may reach
    pub(crate) fn try_reserve(&mut self) -> Result<usize, TryReserveError> {
        if self.free_list.is_empty() {
            self.cells.try_reserve(1)?;
            Ok(self.cells.len() + 1)
        } else {
            Ok(self.cells.len())
        }
    }

    pub(crate) fn alloc(&mut self, slot: Slot<V>) -> (SlotId, u32) {
        self.live += 1;
        if let Some(idx) = self.free_list.pop() {
            let cell = &mut self.cells[idx];
            cell.slot = Some(slot);
            (SlotId(idx), cell.generation)
        } else {
            let idx = self.cells.len();
            self.cells.push(Cell {
                generation: 0,
                slot: Some(slot),
            });
            (SlotId(idx), 0)
        }
    }

    /// Vacate `id`, returning what it held
    pub(crate) fn free(&mut self, id: SlotId) -> Option<Slot<V>> {
        let cell = self.cells.get_mut(id.0)?;
        let slot = cell.slot.take()?;
        cell.generation = cell.generation.wrapping_add(1);
        self.free_list.push(id.0);
        self.live -= 1;
        Some(slot)
    }

    pub(crate) fn get(&self, id: SlotId) -> Option<&Slot<V>> {
        self.cells.get(id.0)?.slot.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: SlotId) -> Option<&mut Slot<V>> {
        self.cells.get_mut(id.0)?.slot.as_mut()
    }

    /// Like `get_mut`, but only if the slot still holds generation
    /// `generation`
    pub(crate) fn get_current(&mut self, id: SlotId, generation: u32) -> Option<&mut Slot<V>> {
        let cell = self.cells.get_mut(id.0)?;
        if cell.generation != generation {
            return None;
        }
        cell.slot.as_mut()
    }

    /// Generation currently stamped on `id`
    pub(crate) fn generation(&self, id: SlotId) -> u32 {
        self.cells.get(id.0).map_or(0, |cell| cell.generation)
    }

    /// Number of occupied slots
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SlotId, &Slot<V>)> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, cell)| cell.slot.as_ref().map(|slot| (SlotId(i), slot)))
    }
}

impl<V> Slot<V> {
    pub(crate) fn retire(self) -> Retired<V> {
        Retired {
            entry: self.entry,
            finalizer: self.finalizer,
        }
    }
}
