//! Registry error types
//!
//! TigerStyle: Explicit error variants with context.

use thiserror::Error;

/// Registry-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Invalid worker identity
    #[error("invalid worker ID: {id}, reason: {reason}")]
    InvalidWorkerId { id: String, reason: String },

    /// Invalid callback address
    #[error("invalid task executor address: {address}, reason: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Capacity report violates limits
    #[error("invalid slot report from {worker_id}: {reason}")]
    InvalidSlotReport { worker_id: String, reason: String },

    /// Worker is not tracked
    #[error("worker not tracked: {worker_id}")]
    WorkerNotTracked { worker_id: String },

    /// Registry is at capacity
    #[error("registry full: {count} workers, limit {limit}")]
    RegistryFull { count: usize, limit: usize },
}

impl RegistryError {
    pub fn invalid_worker_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWorkerId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn worker_not_tracked(worker_id: impl Into<String>) -> Self {
        Self::WorkerNotTracked {
            worker_id: worker_id.into(),
        }
    }

    /// Check if this error indicates a retriable condition
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RegistryFull { .. })
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
