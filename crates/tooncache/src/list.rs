//! Doubly-linked lists threaded through slot indices
//!
//! Several lists can share one [`Links`] arena: a slot is on at most one of
//! them at a time, and its [`Residence`] records which. Every operation is
//! O(1).

use std::collections::TryReserveError;

/// Opaque index of a cache entry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    /// Position in the slot arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// Which partition a slot currently belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Residence {
    /// Not on any list (free slot, or out of the table)
    #[default]
    Detached,
    /// Held by at least one handle besides the table
    Pinned,
    /// Held only by the table
    Evictable,
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Head, tail and length of one list
#[derive(Debug, Default)]
pub(crate) struct List {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl List {
    #[cfg(test)]
    pub(crate) fn head(&self) -> Option<SlotId> {
        self.head
    }

    pub(crate) fn tail(&self) -> Option<SlotId> {
        self.tail
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Link storage shared by the lists of one eviction order
#[derive(Debug, Default)]
pub(crate) struct Links {
    links: Vec<Link>,
}

impl Links {
    /// Make room for slots `0..slots`
    pub(crate) fn try_reserve(&mut self, slots: usize) -> Result<(), TryReserveError> {
        if slots > self.links.len() {
            self.links.try_reserve(slots - self.links.len())?;
        }
        Ok(())
    }

    fn ensure(&mut self, id: SlotId) {
        if id.0 >= self.links.len() {
            self.links.resize(id.0 + 1, Link::default());
        }
    }

    /// Link `id` in front of `list`'s head
    pub(crate) fn push_front(&mut self, list: &mut List, id: SlotId) {
        self.ensure(id);
        self.links[id.0] = Link {
            prev: None,
            next: list.head,
        };

        match list.head {
            Some(head) => self.links[head.0].prev = Some(id),
            None => list.tail = Some(id),
        }

        list.head = Some(id);
        list.len += 1;
    }

    /// Remove `id` from `list`; the caller guarantees it is linked there
    pub(crate) fn unlink(&mut self, list: &mut List, id: SlotId) {
        let Link { prev, next } = self.links[id.0];

        match prev {
            Some(prev) => self.links[prev.0].next = next,
            None => list.head = next,
        }

        match next {
            Some(next) => self.links[next.0].prev = prev,
            None => list.tail = prev,
        }

        self.links[id.0] = Link::default();
        list.len -= 1;
    }

    /// Walk `list` from head to tail
    #[cfg(test)]
    pub(crate) fn iter<'a>(&'a self, list: &List) -> impl Iterator<Item = SlotId> + 'a {
        std::iter::successors(list.head, move |id| self.links[id.0].next)
    }
}
