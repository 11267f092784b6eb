//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cache configuration parameters.
///
/// A zero value disables the corresponding feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries the cache can hold (0 = unbounded)
    pub max_entries: usize,
    /// Maximum aggregate size of all entries (0 = unbounded)
    pub max_size: usize,
    /// TTL applied when a `set` carries no override (zero = never expires)
    pub default_ttl: Duration,
    /// Period of the background reap task (zero = no periodic reaping)
    pub reap_interval: Duration,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_ENTRIES` - Maximum cache entries (default: 1000)
    /// - `CACHE_MAX_SIZE` - Maximum aggregate size (default: 0, disabled)
    /// - `CACHE_DEFAULT_TTL_MS` - Default TTL in milliseconds (default: 0, disabled)
    /// - `CACHE_REAP_INTERVAL_MS` - Reap period in milliseconds (default: 0, disabled)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_parse("CACHE_MAX_ENTRIES").unwrap_or(defaults.max_entries),
            max_size: env_parse("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            default_ttl: env_parse("CACHE_DEFAULT_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_ttl),
            reap_interval: env_parse("CACHE_REAP_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reap_interval),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_size: 0,
            default_ttl: Duration::ZERO,
            reap_interval: Duration::ZERO,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
