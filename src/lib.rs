//! Mini LRU - An in-memory cache with recency-ordered eviction
//!
//! Bounds entries by count and/or aggregate size, expires them lazily by
//! TTL, and collapses concurrent misses for the same key into a single
//! population call.
//!
//! - [`CacheStore`] is the synchronous engine, for single-owner use.
//! - [`Cache`] is a cloneable, thread-safe handle over it that adds
//!   [`Cache::fetch`] and periodic reaping.

pub mod cache;
pub mod config;
pub mod error;
mod shared;
mod tasks;

pub use cache::{CacheOptions, CacheStats, CacheStore, DisposeReason};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use shared::{Cache, CacheBuilder, Entries, FetchFn};
