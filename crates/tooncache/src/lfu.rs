//! LFU (Least Frequently Used) eviction order
//!
//! Evictable entries are bucketed by access frequency:
//!
//! ```text
//! tiers: BTreeMap<freq, List>
//!
//!   freq=1: head ──► [c] ◄──► [d] ◄── tail   (evicted first)
//!   freq=3: head ──► [a] ◄── tail
//!
//! pinned: [b]   (frequency kept, outside every tier)
//! ```
//!
//! A new entry starts at frequency 1 and every lookup hit adds one. Pinned
//! entries are parked outside the tiers so they can never be chosen; when one
//! becomes evictable again it joins the head of the tier for its current
//! frequency. Eviction takes the tail of the lowest tier, so ties within a
//! tier go to the entry that has been evictable the longest. Empty tiers are
//! dropped as soon as they empty out.

use std::collections::{BTreeMap, TryReserveError};

use toonfilter::Murmur3;

use crate::cache::{EvictionOrder, HandleCache};
use crate::list::{Links, List, Residence, SlotId};

/// Frequency-based cache: evicts from the lowest populated access tier
pub type LfuCache<V, H = Murmur3> = HandleCache<V, FrequencyOrder, H>;

#[derive(Debug, Clone, Copy, Default)]
struct Meta {
    freq: u32,
    residence: Residence,
}

/// Frequency tiers backing [`LfuCache`]
#[derive(Debug, Default)]
pub struct FrequencyOrder {
    links: Links,
    meta: Vec<Meta>,
    pinned: List,
    tiers: BTreeMap<u32, List>,
    evictable: usize,
}

impl FrequencyOrder {
    /// Access frequency recorded for `id`, if it is tracked
    pub fn frequency(&self, id: SlotId) -> Option<u32> {
        self.meta
            .get(id.0)
            .filter(|m| m.residence != Residence::Detached)
            .map(|m| m.freq)
    }

    /// Number of non-empty tiers
    pub fn tiers(&self) -> usize {
        self.tiers.len()
    }

    fn unlink_from_tier(&mut self, id: SlotId) {
        let freq = self.meta[id.0].freq;
        let tier = self.tiers.get_mut(&freq);
        debug_assert!(tier.is_some(), "evictable entry without a tier");
        let Some(tier) = tier else {
            return;
        };
        self.links.unlink(tier, id);
        if tier.is_empty() {
            self.tiers.remove(&freq);
        }
        self.evictable -= 1;
    }
}

impl EvictionOrder for FrequencyOrder {
    fn try_reserve(&mut self, slots: usize) -> Result<(), TryReserveError> {
        self.links.try_reserve(slots)?;
        if slots > self.meta.len() {
            self.meta.try_reserve(slots - self.meta.len())?;
        }
        Ok(())
    }

    fn admit(&mut self, id: SlotId) {
        if id.0 >= self.meta.len() {
            self.meta.resize(id.0 + 1, Meta::default());
        }
        debug_assert_eq!(self.meta[id.0].residence, Residence::Detached);
        self.meta[id.0] = Meta {
            freq: 1,
            residence: Residence::Pinned,
        };
        self.links.push_front(&mut self.pinned, id);
    }

    fn pin(&mut self, id: SlotId) {
        debug_assert_eq!(self.meta[id.0].residence, Residence::Evictable);
        self.unlink_from_tier(id);
        self.links.push_front(&mut self.pinned, id);
        self.meta[id.0].residence = Residence::Pinned;
    }

    fn touch(&mut self, id: SlotId) {
        let meta = &mut self.meta[id.0];
        debug_assert_eq!(meta.residence, Residence::Pinned, "lookups pin before touching");
        meta.freq = meta.freq.saturating_add(1);
    }

    fn unpin(&mut self, id: SlotId) {
        debug_assert_eq!(self.meta[id.0].residence, Residence::Pinned);
        self.links.unlink(&mut self.pinned, id);

        let freq = self.meta[id.0].freq;
        let tier = self.tiers.entry(freq).or_default();
        self.links.push_front(tier, id);
        self.meta[id.0].residence = Residence::Evictable;
        self.evictable += 1;
    }

    fn remove(&mut self, id: SlotId) {
        match self.meta[id.0].residence {
            Residence::Pinned => self.links.unlink(&mut self.pinned, id),
            Residence::Evictable => self.unlink_from_tier(id),
            Residence::Detached => {}
        }
        self.meta[id.0] = Meta::default();
    }

    fn victim(&self) -> Option<SlotId> {
        self.tiers.values().find_map(List::tail)
    }

    fn evictable(&self) -> usize {
        self.evictable
    }
}
