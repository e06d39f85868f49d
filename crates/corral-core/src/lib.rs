//! Corral Core
//!
//! Core types, errors, and constants for the Corral resource manager.
//!
//! # Overview
//!
//! Corral is the registration and liveness layer of a cluster resource
//! manager: it admits task executors, fences traffic from stale leaders, and
//! evicts workers that stop heartbeating.
//!
//! # TigerStyle
//!
//! - Explicit limits with big-endian naming (e.g., `WORKER_ID_LENGTH_BYTES_MAX`)
//! - Time and randomness are injected through [`io`]
//! - Errors are returned, never panics

pub mod config;
pub mod constants;
pub mod error;
pub mod fencing;
pub mod io;
pub mod telemetry;

pub use config::CorralConfig;
pub use constants::*;
pub use error::{Error, Result};
pub use fencing::{FencingToken, LeaderEpoch, LeadershipState};
pub use io::{IoContext, RngProvider, SimClock, StdRngProvider, TimeProvider, WallClockTime};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
