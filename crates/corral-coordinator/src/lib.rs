//! Corral Coordinator
//!
//! The resource manager side of the task executor protocol.
//!
//! # Overview
//!
//! The coordinator provides:
//! - Fenced registration of task executors with connection deadlines
//! - Capacity report ingestion tied to the current registration
//! - Heartbeat probing and eviction of silent workers
//! - Leadership grant and revoke handling
//!
//! # Example
//!
//! ```rust,no_run
//! use corral_coordinator::{
//!     MemoryRpcService, MemorySlotTracker, ResourceManager, ResourceManagerConfig,
//! };
//! use corral_core::{IoContext, LeaderEpoch};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let manager = Arc::new(ResourceManager::new(
//!     ResourceManagerConfig::default(),
//!     Arc::new(MemoryRpcService::new()),
//!     Arc::new(MemorySlotTracker::new()),
//!     IoContext::production(),
//! ));
//! if let Some(token) = manager.grant_leadership(LeaderEpoch::new(1)).await {
//!     let _gateway = manager.gateway(token);
//! }
//! # }
//! ```

pub mod capacity;
pub mod config;
pub mod error;
pub mod fencing;
pub mod gateway;
pub mod leadership;
pub mod manager;
pub mod monitor;
pub mod registration;

pub use capacity::{CapacityReportIngestor, IngestOutcome, MemorySlotTracker, SlotTracker};
pub use config::ResourceManagerConfig;
pub use error::{CoordinatorError, CoordinatorResult};
pub use fencing::{Admitted, FencingGuard, Transition};
pub use gateway::{
    ConnectError, MemoryRpcService, TaskExecutorConnector, TaskExecutorGateway,
    TestingTaskExecutorGateway,
};
pub use leadership::{LeaderElectionEvent, LeadershipLifecycle};
pub use manager::{Acknowledge, ResourceManager, ResourceManagerGateway, TaskManagerInfo};
pub use monitor::HeartbeatMonitor;
pub use registration::{
    DeclineReason, RegistrationCoordinator, RegistrationOutcome, TaskExecutorRegistration,
};
