//! Error types for the cache
//!
//! Provides unified error handling using thiserror.
//!
//! Absence is not an error: lookups return `Option`. Only fetch-through and
//! background reaping can fail.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// Cloneable so that a single population failure can be handed to every
/// caller that joined the same in-flight fetch.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The population function returned an error
    #[error("Population failed: {0}")]
    Fetch(Arc<anyhow::Error>),

    /// The population task panicked or was cancelled by the runtime
    #[error("Population aborted: {0}")]
    PopulationAborted(String),

    /// A background task was requested outside of a Tokio runtime
    #[error("No runtime available: {0}")]
    NoRuntime(String),
}

impl CacheError {
    /// Wraps a population failure.
    pub fn fetch(err: anyhow::Error) -> Self {
        CacheError::Fetch(Arc::new(err))
    }

    /// Returns true if this error came from the population function itself.
    pub fn is_fetch(&self) -> bool {
        matches!(self, CacheError::Fetch(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
