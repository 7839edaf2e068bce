//! # Error Types for Swarm
//!
//! Unified error handling across the swarm crates.

use thiserror::Error;

/// Main error type for swarm operations
#[derive(Error, Debug)]
pub enum SwarmError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// GPU-specific error
    #[error("GPU error: {0}")]
    Gpu(String),

    /// A buffer could not be allocated
    #[error("Allocation of '{label}' failed: {requested} bytes exceeds limit of {limit} bytes")]
    Allocation {
        label: &'static str,
        requested: u64,
        limit: u64,
    },

    /// Batch does not fit in the remaining capacity
    #[error("Capacity exceeded: requested {requested} slots, {available} available")]
    Capacity { requested: u32, available: u32 },

    /// Dispatch plan exceeds the per-dimension workgroup limit
    #[error("Workgroup limit exceeded: {total} workgroups > {limit}")]
    WorkgroupLimit { total: u64, limit: u32 },

    /// Required collaborator was not supplied at construction
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// Bound GPU memory no longer matches the resources it was built from
    #[error("Stale binding: {0}")]
    StaleBinding(String),

    /// Two writers claimed the same buffer within one frame
    #[error("Writer conflict on {resource}: owned by {owner}, requested by {requested}")]
    WriterConflict {
        resource: String,
        owner: String,
        requested: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for swarm operations
pub type SwarmResult<T> = Result<T, SwarmError>;

impl SwarmError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a GPU error
    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    /// Create a stale binding error
    pub fn stale(msg: impl Into<String>) -> Self {
        Self::StaleBinding(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
