//! Corral Registry
//!
//! Worker registration records and liveness tracking for Corral.
//!
//! # Overview
//!
//! The registry provides:
//! - Validated worker identifiers, addresses and slot reports
//! - The sharded table of current registrations
//! - Heartbeat-based failure detection

pub mod error;
pub mod heartbeat;
pub mod registry;
pub mod worker;

pub use error::{RegistryError, RegistryResult};
pub use heartbeat::{HeartbeatConfig, HeartbeatTracker, LivenessState, WorkerHeartbeatState};
pub use registry::{CurrentRegistration, WorkerRegistry};
pub use worker::{
    CapacityReport, HardwareDescription, RegistrationId, RegistrationRecord, ResourceManagerId,
    ResourceProfile, SlotId, SlotReport, SlotStatus, TaskExecutorAddress, WorkerId,
};
