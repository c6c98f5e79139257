//! Key index for cache entries

use std::collections::{HashMap, TryReserveError};
use std::sync::Arc;

use ahash::RandomState;

use crate::list::SlotId;

/// Hash index mapping a key to the slot of the entry that owns it
///
/// Keys are shared with the entry itself, so indexing an entry does not copy
/// its key a second time.
#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    map: HashMap<Arc<[u8]>, SlotId, RandomState>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self {
            map: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// Make room for `additional` more keys
    pub(crate) fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        self.map.try_reserve(additional)
    }

    pub(crate) fn find(&self, key: &[u8]) -> Option<SlotId> {
        self.map.get(key).copied()
    }

    /// Index `id` under `key`, returning the slot it displaced
    pub(crate) fn insert(&mut self, key: Arc<[u8]>, id: SlotId) -> Option<SlotId> {
        // Drop the old key first so the map holds the new entry's copy
        let prior = self.map.remove(&*key);
        self.map.insert(key, id);
        prior
    }

    pub(crate) fn remove(&mut self, key: &[u8]) -> Option<SlotId> {
        self.map.remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}
