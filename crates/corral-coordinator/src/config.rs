//! Resource manager configuration
//!
//! TigerStyle: Explicit configuration with bounded values.

use crate::error::CoordinatorResult;
use corral_core::constants::{
    REGISTRATION_TIMEOUT_MS_DEFAULT, REGISTRY_SHARDS_COUNT_DEFAULT, RPC_TIMEOUT_MS_DEFAULT,
};
use corral_core::CorralConfig;
use corral_registry::HeartbeatConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceManagerConfig {
    /// Heartbeat configuration
    pub heartbeat: HeartbeatConfig,
    /// Default timeout for fenced calls in milliseconds
    pub rpc_timeout_ms: u64,
    /// Default timeout for the registration callback connection in milliseconds
    pub registration_timeout_ms: u64,
    /// Number of registry shards
    pub shard_count: usize,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            rpc_timeout_ms: RPC_TIMEOUT_MS_DEFAULT,
            registration_timeout_ms: REGISTRATION_TIMEOUT_MS_DEFAULT,
            shard_count: REGISTRY_SHARDS_COUNT_DEFAULT,
        }
    }
}

impl From<&CorralConfig> for ResourceManagerConfig {
    fn from(config: &CorralConfig) -> Self {
        Self {
            heartbeat: HeartbeatConfig::new(config.heartbeat.interval_ms, config.heartbeat.timeout_ms),
            rpc_timeout_ms: config.coordinator.rpc_timeout_ms,
            registration_timeout_ms: config.coordinator.registration_timeout_ms,
            shard_count: config.registry.shard_count,
        }
    }
}

impl ResourceManagerConfig {
    /// Build from a file-level config, validating it first
    pub fn from_corral_config(config: &CorralConfig) -> CoordinatorResult<Self> {
        config.validate()?;
        Ok(Self::from(config))
    }

    /// Set heartbeat interval and timeout
    pub fn with_heartbeat(mut self, interval_ms: u64, timeout_ms: u64) -> Self {
        self.heartbeat = HeartbeatConfig::new(interval_ms, timeout_ms);
        self
    }

    /// Set RPC timeout
    pub fn with_rpc_timeout(mut self, timeout_ms: u64) -> Self {
        self.rpc_timeout_ms = timeout_ms;
        self
    }

    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Short heartbeats, few shards
    pub fn for_testing() -> Self {
        Self {
            heartbeat: HeartbeatConfig::for_testing(),
            rpc_timeout_ms: 1_000,
            registration_timeout_ms: 1_000,
            shard_count: 4,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
}
