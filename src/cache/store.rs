//! Cache Store Module
//!
//! Main cache engine combining a HashMap index with the arena recency list,
//! size accounting and lazy TTL expiration.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::entry::{expiry_from, Entry};
use crate::cache::iter::{Direction, Iter, Keys, Values};
use crate::cache::lru::{Handle, RecencyList};
use crate::cache::{CacheOptions, CacheStats, DisposeReason};

/// Outcome of an internal lookup that must tell stale entries apart from
/// missing ones.
pub(crate) enum Lookup<'a, V> {
    Fresh(&'a V),
    Stale(&'a V),
    Missing,
}

// == Cache Store ==
/// Synchronous LRU cache with TTL and size-bounded eviction.
///
/// Every operation runs to completion without suspending. For shared,
/// concurrent use and fetch-through see [`Cache`](crate::Cache).
///
/// The disposal observer runs inline, after the operation has finished
/// restructuring: removed entries are detached from the index and the
/// recency list, and both caps hold again. A panic raised by the observer
/// propagates to the caller of the mutating operation and skips any
/// notifications still queued for that call.
pub struct CacheStore<K, V> {
    /// Key to arena handle
    index: HashMap<K, Handle>,
    /// Recency order and entry storage
    list: RecencyList<K, V>,
    /// Sum of all live entry sizes
    total_size: usize,
    /// Performance statistics
    stats: CacheStats,
    options: CacheOptions<K, V>,
}

impl<K, V> CacheStore<K, V>
where
    K: Hash + Eq + Clone,
{
    // == Constructor ==
    /// Creates a new CacheStore bounded by entry count.
    ///
    /// # Arguments
    /// * `max_entries` - Maximum number of entries, 0 = unbounded
    /// * `default_ttl` - TTL for entries stored without an explicit TTL
    pub fn new(max_entries: usize, default_ttl: Option<Duration>) -> Self {
        let mut options = CacheOptions::new(max_entries);
        options.default_ttl = default_ttl.filter(|ttl| !ttl.is_zero());
        Self::with_options(options)
    }

    /// Creates a CacheStore from a full set of options.
    pub fn with_options(options: CacheOptions<K, V>) -> Self {
        Self {
            index: HashMap::new(),
            list: RecencyList::new(),
            total_size: 0,
            stats: CacheStats::new(),
            options,
        }
    }

    pub fn options(&self) -> &CacheOptions<K, V> {
        &self.options
    }

    // == Set ==
    /// Stores a key-value pair and marks it most recently used.
    ///
    /// An existing key is updated in place: the old value is reported to the
    /// disposal observer with [`DisposeReason::Set`] and the size counter is
    /// adjusted by the difference. Afterwards entries are evicted from the
    /// tail until both the entry cap and the size cap hold.
    ///
    /// When a size cap is configured and this entry alone exceeds it, the
    /// value is not stored and any previous entry for the key is deleted.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - The value to store
    /// * `ttl` - TTL override (uses the default TTL if None, zero = no expiry)
    pub fn set(&mut self, key: K, value: V, ttl: Option<Duration>) {
        let size = self.options.size_of(&value, &key);
        let expires_at = expiry_from(ttl.or(self.options.default_ttl));

        if self.options.max_size > 0 && size > self.options.max_size {
            debug!(
                size,
                max_size = self.options.max_size,
                "Entry larger than the size cap, not stored"
            );
            self.delete(&key);
            return;
        }

        // Both caps are restored before any observer runs.
        let mut disposed = Vec::new();
        match self.index.get(&key).copied() {
            Some(handle) => {
                if let Some(old_value) = self.replace(handle, value, size, expires_at) {
                    disposed.push((key, old_value, DisposeReason::Set));
                }
            }
            None => {
                let mut entry = Entry::new(key.clone(), value, size, None);
                entry.expires_at = expires_at;
                let handle = self.list.push_front(entry);
                self.index.insert(key, handle);
                self.total_size += size;

                if self.options.max_entries > 0 && self.list.len() > self.options.max_entries {
                    disposed.extend(self.detach_oldest());
                }
            }
        }

        self.trim_to_size(&mut disposed);

        for (key, value, reason) in &disposed {
            self.notify(key, value, *reason);
        }
    }

    /// Swaps in a new value and promotes the entry. Returns the old value.
    fn replace(
        &mut self,
        handle: Handle,
        value: V,
        size: usize,
        expires_at: Option<Instant>,
    ) -> Option<V> {
        let entry = self.list.get_mut(handle)?;
        let old_value = std::mem::replace(&mut entry.value, value);
        let old_size = std::mem::replace(&mut entry.size, size);
        entry.expires_at = expires_at;

        self.total_size = self.total_size - old_size + size;
        self.list.touch(handle);
        Some(old_value)
    }

    // == Get ==
    /// Retrieves a value by key and marks it most recently used.
    ///
    /// A stale entry is removed (reason [`DisposeReason::Expire`]) and
    /// reported as absent.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(handle) = self.index.get(key).copied() else {
            self.stats.record_miss();
            return None;
        };

        if self.is_stale(handle) {
            self.remove_handle(handle, DisposeReason::Expire);
            self.stats.record_miss();
            return None;
        }

        self.stats.record_hit();
        self.list.touch(handle);
        self.list.get(handle).map(|entry| &entry.value)
    }

    /// Like [`CacheStore::get`], but a stale entry is returned as-is.
    ///
    /// Stale reads neither remove the entry nor promote it.
    pub fn get_allow_stale<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(handle) = self.index.get(key).copied() else {
            self.stats.record_miss();
            return None;
        };

        self.stats.record_hit();
        if !self.is_stale(handle) {
            self.list.touch(handle);
        }
        self.list.get(handle).map(|entry| &entry.value)
    }

    /// Lookup used by fetch-through: promotes fresh entries, leaves stale
    /// ones in place.
    pub(crate) fn lookup<Q>(&mut self, key: &Q) -> Lookup<'_, V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(handle) = self.index.get(key).copied() else {
            self.stats.record_miss();
            return Lookup::Missing;
        };

        if self.is_stale(handle) {
            self.stats.record_miss();
            return match self.list.get(handle) {
                Some(entry) => Lookup::Stale(&entry.value),
                None => Lookup::Missing,
            };
        }

        self.stats.record_hit();
        self.list.touch(handle);
        match self.list.get(handle) {
            Some(entry) => Lookup::Fresh(&entry.value),
            None => Lookup::Missing,
        }
    }

    // == Peek ==
    /// Returns a live value without touching recency or statistics.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let handle = *self.index.get(key)?;
        self.list
            .get(handle)
            .filter(|entry| !entry.is_expired())
            .map(|entry| &entry.value)
    }

    // == Has ==
    /// Reports whether a live entry exists. Never reorders.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.peek(key).is_some()
    }

    // == Delete ==
    /// Removes an entry regardless of staleness and returns its value.
    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let handle = self.index.get(key).copied()?;
        self.remove_handle(handle, DisposeReason::Delete)
            .map(|entry| entry.value)
    }

    /// Removes the entry under `key` only if it is stale.
    pub(crate) fn purge_if_stale<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.index.get(key).copied() {
            Some(handle) if self.is_stale(handle) => {
                self.remove_handle(handle, DisposeReason::Expire);
                true
            }
            _ => false,
        }
    }

    // == Pop ==
    /// Removes and returns the least recently used entry.
    pub fn pop(&mut self) -> Option<(K, V)> {
        let (key, value, reason) = self.detach_oldest()?;
        self.notify(&key, &value, reason);
        Some((key, value))
    }

    // == Clear ==
    /// Removes every entry, reporting each with [`DisposeReason::Delete`].
    pub fn clear(&mut self) {
        let count = self.list.len();
        let mut drained = Vec::new();
        if self.options.dispose.is_some() {
            drained.reserve(count);
            while let Some(entry) = self.list.pop_back() {
                drained.push(entry);
            }
        }

        self.index.clear();
        self.list.clear();
        self.total_size = 0;
        debug!(count, "Cache cleared");

        for entry in &drained {
            self.notify(&entry.key, &entry.value, DisposeReason::Delete);
        }
    }

    // == Reap ==
    /// Removes all stale entries, walking from the least recently used end.
    ///
    /// Returns the number of entries removed.
    pub fn reap(&mut self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut cursor = self.list.tail();

        while let Some(handle) = cursor {
            cursor = self.list.prev_of(handle);
            let stale = self
                .list
                .get(handle)
                .map_or(false, |entry| entry.is_expired_at(now));
            if stale {
                self.remove_handle(handle, DisposeReason::Expire);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Reaped expired entries");
        }
        removed
    }

    // == Remaining TTL ==
    /// Time left before `key` expires.
    ///
    /// Zero for absent keys, expired entries and entries without a TTL.
    pub fn remaining_ttl<Q>(&self, key: &Q) -> Duration
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index
            .get(key)
            .and_then(|handle| self.list.get(*handle))
            .and_then(Entry::ttl_remaining)
            .unwrap_or(Duration::ZERO)
    }

    // == Iteration ==
    /// Live entries from most to least recently used.
    ///
    /// Stale entries are skipped but not removed.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(&self.list, Direction::MostRecentFirst)
    }

    /// Live entries from least to most recently used.
    pub fn iter_lru(&self) -> Iter<'_, K, V> {
        Iter::new(&self.list, Direction::LeastRecentFirst)
    }

    /// Same walk as [`CacheStore::iter`].
    pub fn entries(&self) -> Iter<'_, K, V> {
        self.iter()
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_totals(self.list.len(), self.total_size);
        stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }

    pub(crate) fn list(&self) -> &RecencyList<K, V> {
        &self.list
    }

    // == Length ==
    /// Returns the number of entries, stale ones included until removed.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Aggregate size of all entries.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    // == Internals ==
    fn is_stale(&self, handle: Handle) -> bool {
        self.list.get(handle).map_or(false, Entry::is_expired)
    }

    /// Unlinks the tail entry without notifying the observer.
    fn detach_oldest(&mut self) -> Option<(K, V, DisposeReason)> {
        let entry = self.list.pop_back()?;
        self.index.remove(&entry.key);
        self.total_size -= entry.size;
        self.stats.record_eviction();
        trace!(size = entry.size, "Evicted least recently used entry");
        Some((entry.key, entry.value, DisposeReason::Evict))
    }

    fn trim_to_size(&mut self, disposed: &mut Vec<(K, V, DisposeReason)>) {
        if self.options.max_size == 0 {
            return;
        }
        while self.total_size > self.options.max_size {
            match self.detach_oldest() {
                Some(evicted) => disposed.push(evicted),
                None => break,
            }
        }
    }

    fn remove_handle(&mut self, handle: Handle, reason: DisposeReason) -> Option<Entry<K, V>> {
        let entry = self.list.remove(handle)?;
        self.index.remove(&entry.key);
        self.total_size -= entry.size;
        if reason == DisposeReason::Expire {
            self.stats.record_expiration();
        }
        self.notify(&entry.key, &entry.value, reason);
        Some(entry)
    }

    fn notify(&self, key: &K, value: &V, reason: DisposeReason) {
        if let Some(dispose) = &self.options.dispose {
            dispose(key, value, reason);
        }
    }

    /// Checks index, list and size counter against each other.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        self.list.assert_consistent();
        assert_eq!(self.index.len(), self.list.len(), "index/list count mismatch");

        let mut size = 0;
        for (key, handle) in &self.index {
            let entry = self.list.get(*handle).expect("indexed handle must be live");
            assert!(entry.key == *key, "index points at the wrong entry");
            size += entry.size;
        }
        assert_eq!(size, self.total_size, "size counter drifted");

        if self.options.max_entries > 0 {
            assert!(self.list.len() <= self.options.max_entries);
        }
        if self.options.max_size > 0 {
            assert!(self.total_size <= self.options.max_size);
        }
    }
}

impl<'a, K, V> IntoIterator for &'a CacheStore<K, V>
where
    K: Hash + Eq + Clone,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V> fmt::Debug for CacheStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("len", &self.list.len())
            .field("total_size", &self.total_size)
            .field("options", &self.options)
            .finish()
    }
}
