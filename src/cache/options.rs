//! Cache Options Module
//!
//! Capacity limits, TTL defaults and the pluggable size and disposal policies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::CacheConfig;

/// Maps `(value, key)` to the cost charged against `max_size`.
pub type SizeFn<K, V> = Arc<dyn Fn(&V, &K) -> usize + Send + Sync>;

/// Observer called with every entry that leaves the cache.
pub type DisposeFn<K, V> = Arc<dyn Fn(&K, &V, DisposeReason) + Send + Sync>;

// == Dispose Reason ==
/// Why an entry was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisposeReason {
    /// Capacity pressure (entry count or aggregate size)
    Evict,
    /// Value replaced by a newer `set` on the same key
    Set,
    /// Explicit removal (`delete`, `clear`, oversized replacement)
    Delete,
    /// TTL elapsed, detected lazily or by a reap pass
    Expire,
}

// == Cache Options ==
/// Everything a [`CacheStore`](crate::cache::CacheStore) needs to decide
/// what to keep.
pub struct CacheOptions<K, V> {
    /// Maximum entry count, 0 = unbounded
    pub max_entries: usize,
    /// Maximum aggregate size, 0 = unbounded
    pub max_size: usize,
    /// TTL used when `set` gets no override
    pub default_ttl: Option<Duration>,
    /// Size policy, None = every entry costs 1
    pub size_fn: Option<SizeFn<K, V>>,
    /// Disposal observer
    pub dispose: Option<DisposeFn<K, V>>,
}

impl<K, V> CacheOptions<K, V> {
    /// Options bounded by entry count only.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    /// Builds options from a loaded [`CacheConfig`]; zero values disable
    /// the matching limit.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            max_size: config.max_size,
            default_ttl: Some(config.default_ttl).filter(|ttl| !ttl.is_zero()),
            size_fn: None,
            dispose: None,
        }
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl).filter(|ttl| !ttl.is_zero());
        self
    }

    pub fn size_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&V, &K) -> usize + Send + Sync + 'static,
    {
        let size_fn: SizeFn<K, V> = Arc::new(f);
        self.size_fn = Some(size_fn);
        self
    }

    pub fn dispose<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &V, DisposeReason) + Send + Sync + 'static,
    {
        let dispose: DisposeFn<K, V> = Arc::new(f);
        self.dispose = Some(dispose);
        self
    }

    /// Cost of one entry under the configured policy.
    pub(crate) fn size_of(&self, value: &V, key: &K) -> usize {
        match &self.size_fn {
            Some(size_fn) => size_fn(value, key),
            None => 1,
        }
    }
}

impl<K, V> Default for CacheOptions<K, V> {
    fn default() -> Self {
        Self {
            max_entries: 0,
            max_size: 0,
            default_ttl: None,
            size_fn: None,
            dispose: None,
        }
    }
}

impl<K, V> Clone for CacheOptions<K, V> {
    fn clone(&self) -> Self {
        Self {
            max_entries: self.max_entries,
            max_size: self.max_size,
            default_ttl: self.default_ttl,
            size_fn: self.size_fn.clone(),
            dispose: self.dispose.clone(),
        }
    }
}

impl<K, V> fmt::Debug for CacheOptions<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("max_entries", &self.max_entries)
            .field("max_size", &self.max_size)
            .field("default_ttl", &self.default_ttl)
            .field("size_fn", &self.size_fn.is_some())
            .field("dispose", &self.dispose.is_some())
            .finish()
    }
}
