//! LRU (Least Recently Used) eviction order
//!
//! Entries live on one of two lists threaded through the same links:
//! - **pinned**: held by at least one handle, never evicted
//! - **evictable**: held only by the table, most recently unpinned at the head
//!
//! Recency only moves at the pin/unpin transitions: a lookup takes an entry
//! off the evictable list and its release puts it back at the head. Eviction
//! takes the tail.

use std::collections::TryReserveError;

use toonfilter::Murmur3;

use crate::cache::{EvictionOrder, HandleCache};
use crate::list::{Links, List, Residence, SlotId};

/// Recency-based cache: evicts the entry least recently made evictable
pub type LruCache<V, H = Murmur3> = HandleCache<V, RecencyOrder, H>;

/// Pinned/evictable list pair backing [`LruCache`]
#[derive(Debug, Default)]
pub struct RecencyOrder {
    links: Links,
    residence: Vec<Residence>,
    pinned: List,
    evictable: List,
}

impl RecencyOrder {
    fn residence_mut(&mut self, id: SlotId) -> &mut Residence {
        if id.0 >= self.residence.len() {
            self.residence.resize(id.0 + 1, Residence::Detached);
        }
        &mut self.residence[id.0]
    }

    /// Number of pinned entries
    pub fn pinned(&self) -> usize {
        self.pinned.len()
    }
}

impl EvictionOrder for RecencyOrder {
    fn try_reserve(&mut self, slots: usize) -> Result<(), TryReserveError> {
        self.links.try_reserve(slots)?;
        if slots > self.residence.len() {
            self.residence.try_reserve(slots - self.residence.len())?;
        }
        Ok(())
    }

    fn admit(&mut self, id: SlotId) {
        let residence = self.residence_mut(id);
        debug_assert_eq!(*residence, Residence::Detached);
        *residence = Residence::Pinned;
        self.links.push_front(&mut self.pinned, id);
    }

    fn pin(&mut self, id: SlotId) {
        debug_assert_eq!(self.residence[id.0], Residence::Evictable);
        self.links.unlink(&mut self.evictable, id);
        self.links.push_front(&mut self.pinned, id);
        self.residence[id.0] = Residence::Pinned;
    }

    fn unpin(&mut self, id: SlotId) {
        debug_assert_eq!(self.residence[id.0], Residence::Pinned);
        self.links.unlink(&mut self.pinned, id);
        self.links.push_front(&mut self.evictable, id);
        self.residence[id.0] = Residence::Evictable;
    }

    fn remove(&mut self, id: SlotId) {
        match self.residence[id.0] {
            Residence::Pinned => self.links.unlink(&mut self.pinned, id),
            Residence::Evictable => self.links.unlink(&mut self.evictable, id),
            Residence::Detached => {}
        }
        self.residence[id.0] = Residence::Detached;
    }

    fn victim(&self) -> Option<SlotId> {
        self.evictable.tail()
    }

    fn evictable(&self) -> usize {
        self.evictable.len()
    }
}
