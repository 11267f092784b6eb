//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use tokio::time::Instant;

use crate::cache::lru::Handle;

// == Cache Entry ==
/// A single cached item together with its bookkeeping.
///
/// The `prev`/`next` links belong to the recency list that stores the entry;
/// only the list module rewires them.
#[derive(Debug)]
pub(crate) struct Entry<K, V> {
    /// Lookup identity
    pub key: K,
    /// The stored value
    pub value: V,
    /// Cost assigned by the size policy at insertion
    pub size: usize,
    /// Absolute expiry, None = never expires
    pub expires_at: Option<Instant>,
    /// Toward the most recently used end
    pub(crate) prev: Option<Handle>,
    /// Toward the least recently used end
    pub(crate) next: Option<Handle>,
}

impl<K, V> Entry<K, V> {
    // == Constructor ==
    /// Creates an unlinked entry expiring `ttl` from now.
    pub fn new(key: K, value: V, size: usize, ttl: Option<Duration>) -> Self {
        Self {
            key,
            value,
            size,
            expires_at: expiry_from(ttl),
            prev: None,
            next: None,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// Boundary condition: an entry is expired once the current time is
    /// greater than or equal to its expiry.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Same as [`Entry::is_expired`] against a caller-supplied clock reading.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns the remaining TTL, or None if no expiration is set.
    ///
    /// Expired entries report `Some(Duration::ZERO)`.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(Instant::now()))
    }
}

// == Utility Functions ==
/// Converts a relative TTL into an absolute expiry.
///
/// A zero TTL means "no expiry".
pub(crate) fn expiry_from(ttl: Option<Duration>) -> Option<Instant> {
    ttl.filter(|ttl| !ttl.is_zero())
        .map(|ttl| Instant::now() + ttl)
}
