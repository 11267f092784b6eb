//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside a cache.
//!
//! # Tasks
//! - Reap: removes expired cache entries at a configured interval

mod reaper;

pub(crate) use reaper::{spawn_reap_task, Reap};
