//! Configuration for Corral
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorralConfig {
    /// Coordinator RPC behavior
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    /// Worker liveness detection
    #[serde(default)]
    pub heartbeat: HeartbeatSection,

    /// Registry layout
    #[serde(default)]
    pub registry: RegistrySection,
}

impl CorralConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;
        self.heartbeat.validate()?;
        self.registry.validate()?;
        Ok(())
    }
}

/// Coordinator RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSection {
    /// Default timeout for fenced calls (milliseconds)
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Default timeout for the registration callback connection (milliseconds)
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout_ms: u64,
}

fn default_rpc_timeout() -> u64 {
    RPC_TIMEOUT_MS_DEFAULT
}

fn default_registration_timeout() -> u64 {
    REGISTRATION_TIMEOUT_MS_DEFAULT
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: default_rpc_timeout(),
            registration_timeout_ms: default_registration_timeout(),
        }
    }
}

impl CoordinatorSection {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("coordinator.rpc_timeout_ms", self.rpc_timeout_ms),
            (
                "coordinator.registration_timeout_ms",
                self.registration_timeout_ms,
            ),
        ] {
            if value == 0 {
                return Err(Error::invalid_configuration(field, "must be positive"));
            }
            if value > RPC_TIMEOUT_MS_MAX {
                return Err(Error::invalid_configuration(
                    field,
                    format!("{} exceeds limit {}", value, RPC_TIMEOUT_MS_MAX),
                ));
            }
        }
        Ok(())
    }
}

/// Heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSection {
    /// Interval between probe rounds (milliseconds)
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Silence after which a worker is evicted (milliseconds)
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

fn default_heartbeat_interval() -> u64 {
    HEARTBEAT_INTERVAL_MS_DEFAULT
}

fn default_heartbeat_timeout() -> u64 {
    HEARTBEAT_TIMEOUT_MS_DEFAULT
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl HeartbeatSection {
    fn validate(&self) -> Result<()> {
        if !(HEARTBEAT_INTERVAL_MS_MIN..=HEARTBEAT_INTERVAL_MS_MAX).contains(&self.interval_ms) {
            return Err(Error::invalid_configuration(
                "heartbeat.interval_ms",
                format!(
                    "must be within {}..={}",
                    HEARTBEAT_INTERVAL_MS_MIN, HEARTBEAT_INTERVAL_MS_MAX
                ),
            ));
        }
        if self.timeout_ms <= self.interval_ms {
            return Err(Error::invalid_configuration(
                "heartbeat.timeout_ms",
                "must be greater than heartbeat.interval_ms",
            ));
        }
        Ok(())
    }
}

/// Registry layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    /// Number of independently locked shards
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
}

fn default_shard_count() -> usize {
    REGISTRY_SHARDS_COUNT_DEFAULT
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
        }
    }
}

impl RegistrySection {
    fn validate(&self) -> Result<()> {
        if self.shard_count == 0 || !self.shard_count.is_power_of_two() {
            return Err(Error::invalid_configuration(
                "registry.shard_count",
                "must be a positive power of two",
            ));
        }
        if self.shard_count > REGISTRY_SHARDS_COUNT_MAX {
            return Err(Error::invalid_configuration(
                "registry.shard_count",
                format!(
                    "{} exceeds limit {}",
                    self.shard_count, REGISTRY_SHARDS_COUNT_MAX
                ),
            ));
        }
        Ok(())
    }
}
