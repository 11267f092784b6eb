//! LRU Recency List Module
//!
//! Arena-backed doubly linked list ordering entries by recency of use.

use crate::cache::entry::Entry;

// == Handle ==
/// Stable address of an entry inside the arena.
///
/// A handle stays valid until its entry is removed; the slot may then be
/// reused by a later insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Handle(usize);

// == Recency List ==
/// Owns every live entry and keeps them in recency order.
///
/// - Head = Most recently used
/// - Tail = Least recently used
#[derive(Debug)]
pub(crate) struct RecencyList<K, V> {
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    head: Option<Handle>,
    tail: Option<Handle>,
    len: usize,
}

impl<K, V> Default for RecencyList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RecencyList<K, V> {
    // == Constructor ==
    /// Creates a new empty list.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Most recently used entry.
    pub fn head(&self) -> Option<Handle> {
        self.head
    }

    /// Least recently used entry, the eviction candidate.
    pub fn tail(&self) -> Option<Handle> {
        self.tail
    }

    pub fn get(&self, handle: Handle) -> Option<&Entry<K, V>> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Entry<K, V>> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    // == Push Front ==
    /// Stores an entry at the head and returns its handle.
    pub fn push_front(&mut self, mut entry: Entry<K, V>) -> Handle {
        entry.prev = None;
        entry.next = self.head;

        let handle = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(entry);
                Handle(idx)
            }
            None => {
                self.slots.push(Some(entry));
                Handle(self.slots.len() - 1)
            }
        };

        self.link_as_head(handle);
        self.len += 1;
        handle
    }

    // == Touch ==
    /// Marks an entry as most recently used (moves it to the head).
    ///
    /// No-op if the entry already is the head.
    pub fn touch(&mut self, handle: Handle) {
        if self.head == Some(handle) || self.get(handle).is_none() {
            return;
        }

        self.unlink(handle);
        let head = self.head;
        if let Some(entry) = self.get_mut(handle) {
            entry.prev = None;
            entry.next = head;
        }
        self.link_as_head(handle);
    }

    // == Remove ==
    /// Detaches an entry and hands it back, freeing its slot.
    pub fn remove(&mut self, handle: Handle) -> Option<Entry<K, V>> {
        self.get(handle)?;
        self.unlink(handle);

        let mut entry = self.slots[handle.0].take()?;
        entry.prev = None;
        entry.next = None;
        self.free.push(handle.0);
        self.len -= 1;
        Some(entry)
    }

    // == Pop Back ==
    /// Removes and returns the least recently used entry.
    pub fn pop_back(&mut self) -> Option<Entry<K, V>> {
        let tail = self.tail?;
        self.remove(tail)
    }

    /// Neighbour toward the head.
    pub fn prev_of(&self, handle: Handle) -> Option<Handle> {
        self.get(handle).and_then(|entry| entry.prev)
    }

    // == Clear ==
    /// Drops every entry and releases the arena.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    // Expects `handle`'s own `next` to already point at the old head.
    fn link_as_head(&mut self, handle: Handle) {
        if let Some(old_head) = self.head {
            if let Some(entry) = self.get_mut(old_head) {
                entry.prev = Some(handle);
            }
        }
        self.head = Some(handle);
        if self.tail.is_none() {
            self.tail = Some(handle);
        }
    }

    fn unlink(&mut self, handle: Handle) {
        let (prev, next) = match self.get(handle) {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };

        match prev {
            Some(prev) => {
                if let Some(entry) = self.get_mut(prev) {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(next) => {
                if let Some(entry) = self.get_mut(next) {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    /// Walks head to tail and panics on any broken link or count mismatch.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        let mut seen = 0;
        let mut prev: Option<Handle> = None;
        let mut cursor = self.head;

        while let Some(handle) = cursor {
            let entry = self.get(handle).expect("linked handle must be live");
            assert_eq!(entry.prev, prev, "back link mismatch");
            seen += 1;
            assert!(seen <= self.len, "cycle in recency list");
            prev = Some(handle);
            cursor = entry.next;
        }

        assert_eq!(prev, self.tail, "tail does not terminate the walk");
        assert_eq!(seen, self.len, "length mismatch");
        assert_eq!(self.head.is_none(), self.len == 0);
        assert_eq!(self.tail.is_none(), self.len == 0);
    }
}
