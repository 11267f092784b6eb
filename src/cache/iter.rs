//! Cache Iteration Module
//!
//! Lazy walks over the recency list. Stale entries are skipped, never removed.

use crate::cache::entry::Entry;
use crate::cache::lru::{Handle, RecencyList};

/// Which end of the recency list a walk starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// Head to tail
    MostRecentFirst,
    /// Tail to head
    LeastRecentFirst,
}

// == Cursor ==
/// Position of an in-progress walk, detached from any borrow of the list.
///
/// Only meaningful while the list is not structurally modified.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor {
    next: Option<Handle>,
    direction: Direction,
}

impl Cursor {
    pub fn start<K, V>(list: &RecencyList<K, V>, direction: Direction) -> Self {
        let next = match direction {
            Direction::MostRecentFirst => list.head(),
            Direction::LeastRecentFirst => list.tail(),
        };
        Self { next, direction }
    }

    /// Returns the next live entry and steps past it.
    pub fn advance<'a, K, V>(&mut self, list: &'a RecencyList<K, V>) -> Option<&'a Entry<K, V>> {
        loop {
            let entry = list.get(self.next?)?;
            self.next = match self.direction {
                Direction::MostRecentFirst => entry.next,
                Direction::LeastRecentFirst => entry.prev,
            };
            if !entry.is_expired() {
                return Some(entry);
            }
        }
    }
}

// == Iter ==
/// Iterator over `(&K, &V)` pairs of live entries.
///
/// Created by [`CacheStore::iter`](crate::cache::CacheStore::iter) and
/// [`CacheStore::iter_lru`](crate::cache::CacheStore::iter_lru).
pub struct Iter<'a, K, V> {
    list: &'a RecencyList<K, V>,
    cursor: Cursor,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(crate) fn new(list: &'a RecencyList<K, V>, direction: Direction) -> Self {
        Self {
            list,
            cursor: Cursor::start(list, direction),
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor
            .advance(self.list)
            .map(|entry| (&entry.key, &entry.value))
    }
}

/// Iterator over the keys of live entries, most recent first.
pub struct Keys<'a, K, V> {
    pub(crate) inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }
}

/// Iterator over the values of live entries, most recent first.
pub struct Values<'a, K, V> {
    pub(crate) inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }
}
