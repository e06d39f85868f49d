//! Coordinator error types
//!
//! TigerStyle: Explicit error variants with context.
//!
//! A `Decline` is a successful call with a negative answer and lives in
//! [`crate::registration::RegistrationOutcome`], not here.

use corral_core::FencingToken;
use corral_registry::{RegistryError, TaskExecutorAddress, WorkerId};
use std::time::Duration;
use thiserror::Error;

/// Coordinator-specific errors
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Caller's token is not the current one, or this coordinator is not leader
    #[error("fencing token mismatch: provided {provided}, current {current:?}")]
    FencingMismatch {
        provided: FencingToken,
        current: Option<FencingToken>,
    },

    /// Callback connection not established in time
    #[error("connection to {address} timed out after {timeout_ms}ms")]
    ConnectionTimeout { address: String, timeout_ms: u64 },

    /// Fenced call exceeded its deadline
    #[error("{operation} timed out after {timeout_ms}ms")]
    RpcTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// No current registration for the identity
    #[error("unknown task executor: {worker_id}")]
    UnknownWorker { worker_id: String },

    /// Worker gateway call failed
    #[error("gateway {address} failed: {reason}")]
    Gateway { address: String, reason: String },

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Core error
    #[error("core error: {0}")]
    Core(#[from] corral_core::Error),
}

impl CoordinatorError {
    pub fn fencing_mismatch(provided: FencingToken, current: Option<FencingToken>) -> Self {
        Self::FencingMismatch { provided, current }
    }

    pub fn connection_timeout(address: &TaskExecutorAddress, timeout: Duration) -> Self {
        Self::ConnectionTimeout {
            address: address.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn rpc_timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::RpcTimeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn unknown_worker(worker_id: &WorkerId) -> Self {
        Self::UnknownWorker {
            worker_id: worker_id.to_string(),
        }
    }

    pub fn gateway(address: &TaskExecutorAddress, reason: impl Into<String>) -> Self {
        Self::Gateway {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    ///
    /// Only transport timeouts are; a fenced-out caller must first learn the
    /// new leader's token.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RpcTimeout { .. }
        )
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoordinatorError::fencing_mismatch(FencingToken::from_raw(1), None);
        assert!(err.to_string().contains("fencing token mismatch"));

        let err = CoordinatorError::unknown_worker(&WorkerId::new("worker-1").unwrap());
        assert!(err.to_string().contains("worker-1"));
    }

    #[test]
    fn test_error_retriable() {
        let address = TaskExecutorAddress::parse("/taskExecutor1").unwrap();
        assert!(
            CoordinatorError::connection_timeout(&address, Duration::from_secs(10)).is_retriable()
        );
        assert!(
            CoordinatorError::rpc_timeout("send_slot_report", Duration::from_secs(1))
                .is_retriable()
        );

        let fenced = CoordinatorError::fencing_mismatch(
            FencingToken::from_raw(1),
            Some(FencingToken::from_raw(2)),
        );
        assert!(!fenced.is_retriable());
        assert!(!CoordinatorError::Registry(RegistryError::invalid_address("", "empty"))
            .is_retriable());
    }

    #[test]
    fn test_timeout_converts_duration() {
        let address = TaskExecutorAddress::parse("/taskExecutor1").unwrap();
        match CoordinatorError::connection_timeout(&address, Duration::from_millis(1500)) {
            CoordinatorError::ConnectionTimeout { timeout_ms, .. } => assert_eq!(timeout_ms, 1500),
            other => panic!("unexpected error: {other}"),
        }
    }
}
