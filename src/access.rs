//! Access-order queue backing time-based expiration.
//!
//! A sentinel-headed doubly linked list whose nodes live in an arena and link
//! to each other by slot index rather than by pointer. The least recently
//! touched item sits right after the sentinel, the most recently touched one
//! right before it:
//!
//! ```text
//!   ┌──────────┐   ┌─────┐   ┌─────┐         ┌─────┐
//!   │ sentinel │──▶│  a  │──▶│  b  │── ... ─▶│  z  │──┐
//!   │ (slot 0) │◀──│     │◀──│     │◀─ ... ──│     │  │
//!   └──────────┘   └─────┘   └─────┘         └─────┘  │
//!        ▲          oldest                    newest  │
//!        └────────────────────────────────────────────┘
//! ```
//!
//! Every operation except [`AccessQueue::clear`] is O(1). Freed slots are
//! recycled, so a [`SlotId`] is only meaningful while its item is live; the
//! owning segment checks identity before acting on an id it did not just
//! obtain under its lock.

use core::fmt;

/// Index of an item inside an [`AccessQueue`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct SlotId(usize);

const SENTINEL: usize = 0;

struct Slot<T> {
    prev: usize,
    next: usize,
    item: Option<T>,
}

pub(crate) struct AccessQueue<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> AccessQueue<T> {
    pub(crate) fn new() -> Self {
        AccessQueue {
            slots: vec![Slot {
                prev: SENTINEL,
                next: SENTINEL,
                item: None,
            }],
            free: Vec::new(),
            len: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocates a slot, builds the item with its id and appends it as the
    /// most recently touched entry. Returns the id and the stored item.
    pub(crate) fn insert_with<F>(&mut self, build: F) -> (SlotId, &T)
    where
        F: FnOnce(SlotId) -> T,
    {
        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                let idx = self.slots.len();
                self.slots.push(Slot {
                    prev: SENTINEL,
                    next: SENTINEL,
                    item: None,
                });
                idx
            }
        };
        let id = SlotId(idx);
        self.link_last(idx);
        self.len += 1;
        let item: &T = self.slots[idx].item.insert(build(id));
        (id, item)
    }

    /// Returns the item stored at `id`, if the slot is occupied.
    #[inline]
    pub(crate) fn get(&self, id: SlotId) -> Option<&T> {
        if id.0 == SENTINEL {
            return None;
        }
        self.slots.get(id.0).and_then(|s| s.item.as_ref())
    }

    /// Moves the item at `id` to the tail. No-op for vacant slots.
    pub(crate) fn touch(&mut self, id: SlotId) {
        if self.get(id).is_none() {
            return;
        }
        if self.slots[SENTINEL].prev == id.0 {
            return;
        }
        self.detach(id.0);
        self.link_last(id.0);
    }

    /// Returns the least recently touched item without modifying the queue.
    #[inline]
    pub(crate) fn peek_oldest(&self) -> Option<&T> {
        let first = self.slots[SENTINEL].next;
        if first == SENTINEL {
            None
        } else {
            self.slots[first].item.as_ref()
        }
    }

    /// Unlinks the item at `id` and frees its slot. Idempotent: a vacant slot
    /// yields `None`.
    pub(crate) fn remove(&mut self, id: SlotId) -> Option<T> {
        self.get(id)?;
        self.detach(id.0);
        let slot = &mut self.slots[id.0];
        slot.prev = SENTINEL;
        slot.next = SENTINEL;
        let item = slot.item.take();
        self.free.push(id.0);
        self.len -= 1;
        item
    }

    /// Unlinks every item and releases the arena.
    pub(crate) fn clear(&mut self) {
        self.slots.truncate(1);
        self.slots[SENTINEL].prev = SENTINEL;
        self.slots[SENTINEL].next = SENTINEL;
        self.free.clear();
        self.len = 0;
    }

    /// Iterates from the oldest to the newest item.
    #[cfg(test)]
    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            queue: self,
            cursor: self.slots[SENTINEL].next,
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = &self.slots[idx];
            (slot.prev, slot.next)
        };
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
    }

    fn link_last(&mut self, idx: usize) {
        let tail = self.slots[SENTINEL].prev;
        {
            let slot = &mut self.slots[idx];
            slot.prev = tail;
            slot.next = SENTINEL;
        }
        self.slots[tail].next = idx;
        self.slots[SENTINEL].prev = idx;
    }
}

impl<T> Default for AccessQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AccessQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessQueue")
            .field("len", &self.len)
            .field("slots", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) struct Iter<'a, T> {
    queue: &'a AccessQueue<T>,
    cursor: usize,
}

#[cfg(test)]
impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.cursor == SENTINEL {
            return None;
        }
        let slot = &self.queue.slots[self.cursor];
        self.cursor = slot.next;
        slot.item.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(queue: &AccessQueue<&'static str>) -> Vec<&'static str> {
        queue.iter().copied().collect()
    }

    #[test]
    fn test_insert_appends_to_tail() {
        let mut queue = AccessQueue::new();
        assert!(queue.is_empty());
        assert!(queue.peek_oldest().is_none());

        queue.insert_with(|_| "a");
        queue.insert_with(|_| "b");
        queue.insert_with(|_| "c");

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek_oldest(), Some(&"a"));
        assert_eq!(order(&queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_touch_moves_to_tail() {
        let mut queue = AccessQueue::new();
        let (a, _) = queue.insert_with(|_| "a");
        let (b, _) = queue.insert_with(|_| "b");
        queue.insert_with(|_| "c");

        queue.touch(a);
        assert_eq!(order(&queue), vec!["b", "c", "a"]);

        queue.touch(b);
        assert_eq!(order(&queue), vec!["c", "a", "b"]);

        // touching the tail is a no-op
        queue.touch(b);
        assert_eq!(order(&queue), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut queue = AccessQueue::new();
        let (a, _) = queue.insert_with(|_| "a");
        let (b, _) = queue.insert_with(|_| "b");

        assert_eq!(queue.remove(a), Some("a"));
        assert_eq!(queue.remove(a), None);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_oldest(), Some(&"b"));

        // touching a vacant slot does nothing
        queue.touch(a);
        assert_eq!(order(&queue), vec!["b"]);

        assert_eq!(queue.remove(b), Some("b"));
        assert!(queue.is_empty());
        assert!(queue.peek_oldest().is_none());
    }

    #[test]
    fn test_slots_are_recycled() {
        let mut queue = AccessQueue::new();
        let (a, _) = queue.insert_with(|_| "a");
        queue.insert_with(|_| "b");
        queue.remove(a);

        let mut seen = None;
        let (c, item) = queue.insert_with(|id| {
            seen = Some(id);
            "c"
        });
        assert_eq!(*item, "c");
        assert_eq!(c, a);
        assert_eq!(seen, Some(c));
        assert_eq!(queue.get(c), Some(&"c"));
        assert_eq!(order(&queue), vec!["b", "c"]);
    }

    #[test]
    fn test_clear() {
        let mut queue = AccessQueue::new();
        let (a, _) = queue.insert_with(|_| "a");
        queue.insert_with(|_| "b");
        queue.clear();

        assert!(queue.is_empty());
        assert!(queue.get(a).is_none());
        assert!(queue.peek_oldest().is_none());

        queue.insert_with(|_| "c");
        assert_eq!(order(&queue), vec!["c"]);
    }

    #[test]
    fn test_sentinel_is_not_addressable() {
        let mut queue: AccessQueue<&str> = AccessQueue::new();
        assert!(queue.get(SlotId(SENTINEL)).is_none());
        assert!(queue.remove(SlotId(SENTINEL)).is_none());
        assert!(queue.get(SlotId(42)).is_none());
    }
}
