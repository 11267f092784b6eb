//! Cache Module
//!
//! Provides the synchronous cache engine: an index over an arena-backed
//! recency list, size accounting, TTL expiration and disposal notification.

mod entry;
mod iter;
mod lru;
mod options;
mod stats;
mod store;


// Re-export public types
pub use iter::{Iter, Keys, Values};
pub use options::{CacheOptions, DisposeFn, DisposeReason, SizeFn};
pub use stats::CacheStats;
pub use store::CacheStore;

pub(crate) use iter::{Cursor, Direction};
pub(crate) use store::Lookup;
