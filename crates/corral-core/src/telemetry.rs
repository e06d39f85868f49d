//! Logging setup
//!
//! Installs a `tracing-subscriber` registry with an env filter and a fmt
//! layer. Library code only emits `tracing` events; binaries and tests call
//! [`init_telemetry`] once.

use crate::error::{Error, Result};

/// Default service name used in log output
const SERVICE_NAME_DEFAULT: &str = "corral";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Log level filter, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Whether to write events to stdout
    pub stdout_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME_DEFAULT.to_string(),
            log_level: "info".to_string(),
            stdout_enabled: true,
        }
    }
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Create from environment variables
    ///
    /// Reads `CORRAL_SERVICE_NAME` and `RUST_LOG`.
    pub fn from_env() -> Self {
        let service_name = std::env::var("CORRAL_SERVICE_NAME")
            .unwrap_or_else(|_| SERVICE_NAME_DEFAULT.to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            service_name,
            log_level,
            stdout_enabled: true,
        }
    }
}

/// Handle returned by [`init_telemetry`]; keep it alive for the process lifetime
#[derive(Debug)]
pub struct TelemetryGuard {
    service_name: String,
}

impl TelemetryGuard {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Initialize the global tracing subscriber
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = if config.stdout_enabled {
        Some(tracing_subscriber::fmt::layer().with_target(true))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::TelemetryInitFailed {
            reason: e.to_string(),
        })?;

    tracing::info!(service = %config.service_name, "telemetry initialized");

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "corral");
        assert_eq!(config.log_level, "info");
        assert!(config.stdout_enabled);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("rm-1")
            .with_log_level("debug")
            .without_stdout();

        assert_eq!(config.service_name, "rm-1");
        assert_eq!(config.log_level, "debug");
        assert!(!config.stdout_enabled);
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig::new("twice").without_stdout();
        // The first call may lose to another test in this binary; the
        // second can never succeed.
        let _ = init_telemetry(config.clone());
        assert!(init_telemetry(config).is_err());
    }
}
