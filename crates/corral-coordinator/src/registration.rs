//! Task executor registration
//!
//! TigerStyle: Validate, connect with a deadline, re-check fencing, then commit.
//!
//! Registration is the only path that creates registry records. The callback
//! connection is the slow step and runs without holding any lock; the commit
//! after it re-validates the caller's token and holds leadership pinned while
//! it writes. A connection attempt that outlives its deadline is dropped with
//! the timed-out future, so its late completion never reaches the commit.
//!
//! For a single worker identity the last attempt to commit wins, whatever
//! order the attempts were issued in.

use crate::capacity::SlotTracker;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::fencing::FencingGuard;
use crate::gateway::TaskExecutorConnector;
use crate::monitor::HeartbeatMonitor;
use corral_core::{FencingToken, IoContext};
use corral_registry::{
    HardwareDescription, RegistrationId, RegistrationRecord, ResourceManagerId,
    TaskExecutorAddress, WorkerId, WorkerRegistry,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cause sent to the gateway of a registration that was replaced
pub const REPLACED_CAUSE: &str = "task executor registered again";

/// A worker's request to be admitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutorRegistration {
    /// Callback address, validated on arrival
    pub address: String,
    pub worker_id: WorkerId,
    pub data_port: u16,
    pub hardware: HardwareDescription,
}

impl TaskExecutorRegistration {
    pub fn new(
        address: impl Into<String>,
        worker_id: WorkerId,
        data_port: u16,
        hardware: HardwareDescription,
    ) -> Self {
        Self {
            address: address.into(),
            worker_id,
            data_port,
            hardware,
        }
    }
}

/// Why a registration was declined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclineReason {
    /// Address failed validation, or connecting to it failed fast
    InvalidAddress,
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress => f.write_str("invalid task executor address"),
        }
    }
}

/// Answer to a registration that was understood
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationOutcome {
    Success {
        registration_id: RegistrationId,
        resource_manager_id: ResourceManagerId,
    },
    Decline {
        reason: DeclineReason,
    },
}

impl RegistrationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn registration_id(&self) -> Option<&RegistrationId> {
        match self {
            Self::Success {
                registration_id, ..
            } => Some(registration_id),
            Self::Decline { .. } => None,
        }
    }
}

/// Admits task executors into the registry
#[derive(Debug)]
pub struct RegistrationCoordinator {
    manager_id: ResourceManagerId,
    fencing: Arc<FencingGuard>,
    registry: Arc<WorkerRegistry>,
    connector: Arc<dyn TaskExecutorConnector>,
    monitor: Arc<HeartbeatMonitor>,
    slots: Arc<dyn SlotTracker>,
    io: IoContext,
}

impl RegistrationCoordinator {
    pub fn new(
        manager_id: ResourceManagerId,
        fencing: Arc<FencingGuard>,
        registry: Arc<WorkerRegistry>,
        connector: Arc<dyn TaskExecutorConnector>,
        monitor: Arc<HeartbeatMonitor>,
        slots: Arc<dyn SlotTracker>,
        io: IoContext,
    ) -> Self {
        Self {
            manager_id,
            fencing,
            registry,
            connector,
            monitor,
            slots,
            io,
        }
    }

    /// Register a task executor
    ///
    /// # Errors
    ///
    /// `FencingMismatch` if `token` is not current at arrival or at commit,
    /// `ConnectionTimeout` if the callback connection takes longer than
    /// `timeout`. Declines are `Ok`.
    pub async fn register(
        &self,
        token: &FencingToken,
        request: TaskExecutorRegistration,
        timeout: Duration,
    ) -> CoordinatorResult<RegistrationOutcome> {
        self.fencing.check(token).await?;

        let TaskExecutorRegistration {
            address,
            worker_id,
            data_port,
            hardware,
        } = request;

        let address = match TaskExecutorAddress::parse(address) {
            Ok(address) => address,
            Err(e) => {
                warn!(%worker_id, error = %e, "declining registration");
                return Ok(RegistrationOutcome::Decline {
                    reason: DeclineReason::InvalidAddress,
                });
            }
        };

        let gateway = match tokio::time::timeout(timeout, self.connector.connect(&address)).await {
            Ok(Ok(gateway)) => gateway,
            Ok(Err(e)) => {
                warn!(%worker_id, %address, error = %e, "declining registration, connection failed");
                return Ok(RegistrationOutcome::Decline {
                    reason: DeclineReason::InvalidAddress,
                });
            }
            Err(_) => {
                warn!(
                    %worker_id,
                    %address,
                    timeout_ms = timeout.as_millis() as u64,
                    "registration connection timed out"
                );
                return Err(CoordinatorError::connection_timeout(&address, timeout));
            }
        };

        let admitted = self.fencing.admit(token).await?;

        let now_ms = self.io.now_ms();
        let registration_id = RegistrationId::generate(self.io.rng.as_ref());
        let record = RegistrationRecord::new(
            worker_id.clone(),
            registration_id.clone(),
            address.clone(),
            data_port,
            hardware,
            now_ms,
        );
        let replaced = self.registry.upsert(record).await?;

        // A later commit may already have replaced this one; only the
        // registration still current moves the heartbeat target.
        let replaced_gateway = match self.registry.current(&worker_id, &registration_id).await {
            Some(pinned) => {
                let previous = self
                    .monitor
                    .track(worker_id.clone(), registration_id.clone(), gateway, now_ms)
                    .await;
                drop(pinned);
                previous
            }
            None => {
                debug!(%worker_id, %registration_id, "registration superseded before tracking");
                None
            }
        };

        if let Some(old) = &replaced {
            self.slots.release(&old.registration_id).await;
        }
        drop(admitted);

        match &replaced {
            Some(old) => info!(
                %worker_id,
                %registration_id,
                replaced_registration_id = %old.registration_id,
                "task executor registered again"
            ),
            None => info!(%worker_id, %registration_id, "task executor registered"),
        }

        // A retry from the same endpoint keeps its connection
        match replaced_gateway {
            Some(old_gateway) if old_gateway.address() != &address => {
                old_gateway.disconnect_resource_manager(REPLACED_CAUSE).await;
            }
            Some(_) => debug!(%worker_id, %address, "re-registered from the same endpoint"),
            None => {}
        }

        Ok(RegistrationOutcome::Success {
            registration_id,
            resource_manager_id: self.manager_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::MemorySlotTracker;
    use crate::gateway::{MemoryRpcService, TestingTaskExecutorGateway};
    use corral_core::LeaderEpoch;
    use corral_registry::HeartbeatConfig;

    struct Fixture {
        coordinator: RegistrationCoordinator,
        registry: Arc<WorkerRegistry>,
        rpc: Arc<MemoryRpcService>,
        fencing: Arc<FencingGuard>,
        token: FencingToken,
        gateway: Arc<TestingTaskExecutorGateway>,
    }

    async fn fixture() -> Fixture {
        let (io, _clock) = IoContext::simulated(31);
        let fencing = Arc::new(FencingGuard::new());
        let token = FencingToken::generate(io.rng.as_ref());
        fencing.transition().await.install(LeaderEpoch::new(1), token);

        let registry = Arc::new(WorkerRegistry::new(4));
        let slots: Arc<dyn SlotTracker> = Arc::new(MemorySlotTracker::new());
        let manager_id = ResourceManagerId::generate(io.rng.as_ref());
        let monitor = Arc::new(HeartbeatMonitor::new(
            manager_id.clone(),
            HeartbeatConfig::for_testing(),
            fencing.clone(),
            registry.clone(),
            slots.clone(),
            io.clone(),
        ));

        let rpc = Arc::new(MemoryRpcService::new());
        let gateway = Arc::new(TestingTaskExecutorGateway::new(
            TaskExecutorAddress::parse("/taskExecutor1").unwrap(),
        ));
        rpc.register_gateway(gateway.clone()).await;

        let coordinator = RegistrationCoordinator::new(
            manager_id,
            fencing.clone(),
            registry.clone(),
            rpc.clone(),
            monitor,
            slots,
            io,
        );

        Fixture {
            coordinator,
            registry,
            rpc,
            fencing,
            token,
            gateway,
        }
    }

    fn request(address: &str) -> TaskExecutorRegistration {
        TaskExecutorRegistration::new(
            address,
            WorkerId::new("worker-1").unwrap(),
            1234,
            HardwareDescription::new(1, 2, 3, 4),
        )
    }

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_register_success() {
        let f = fixture().await;
        let outcome = f
            .coordinator
            .register(&f.token, request("/taskExecutor1"), TIMEOUT)
            .await
            .unwrap();

        let rid = outcome.registration_id().unwrap();
        let record = f.registry.get(&WorkerId::new("worker-1").unwrap()).await.unwrap();
        assert_eq!(&record.registration_id, rid);
        assert_eq!(record.data_port, 1234);
    }

    #[tokio::test]
    async fn test_reregistration_from_same_endpoint_keeps_connection() {
        let f = fixture().await;
        let first = f
            .coordinator
            .register(&f.token, request("/taskExecutor1"), TIMEOUT)
            .await
            .unwrap();
        let second = f
            .coordinator
            .register(&f.token, request("/taskExecutor1"), TIMEOUT)
            .await
            .unwrap();

        assert_ne!(first.registration_id(), second.registration_id());
        assert_eq!(f.registry.len(), 1);
        assert!(f.gateway.disconnect_causes().await.is_empty());
    }

    #[tokio::test]
    async fn test_reregistration_from_new_endpoint_disconnects_old() {
        let f = fixture().await;
        let moved = Arc::new(TestingTaskExecutorGateway::new(
            TaskExecutorAddress::parse("/taskExecutor1-moved").unwrap(),
        ));
        f.rpc.register_gateway(moved.clone()).await;

        f.coordinator
            .register(&f.token, request("/taskExecutor1"), TIMEOUT)
            .await
            .unwrap();
        let second = f
            .coordinator
            .register(&f.token, request("/taskExecutor1-moved"), TIMEOUT)
            .await
            .unwrap();

        let record = f.registry.get(&WorkerId::new("worker-1").unwrap()).await.unwrap();
        assert_eq!(Some(&record.registration_id), second.registration_id());
        assert_eq!(f.gateway.disconnect_causes().await, vec![REPLACED_CAUSE]);
        assert!(moved.disconnect_causes().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_address_declined_without_connecting() {
        let f = fixture().await;
        f.rpc.set_connection_delay_ms(3_600_000);

        let outcome = f
            .coordinator
            .register(&f.token, request("bad address"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RegistrationOutcome::Decline {
                reason: DeclineReason::InvalidAddress
            }
        );
    }

    #[tokio::test]
    async fn test_failed_connection_declined_as_invalid_address() {
        let f = fixture().await;
        let outcome = f
            .coordinator
            .register(&f.token, request("/taskExecutor2"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RegistrationOutcome::Decline {
                reason: DeclineReason::InvalidAddress
            }
        );
        assert!(f.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_connection_times_out() {
        let f = fixture().await;
        f.rpc.set_connection_delay_ms(TIMEOUT.as_millis() as u64 + 1_000);

        let err = f
            .coordinator
            .register(&f.token, request("/taskExecutor1"), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::ConnectionTimeout { .. }));
        assert!(err.is_retriable());
        assert!(f.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leadership_change_during_connect_rejected_at_commit() {
        let f = Arc::new(fixture().await);
        f.rpc.set_connection_delay_ms(1_000);

        let attempt = {
            let f = f.clone();
            tokio::spawn(async move {
                f.coordinator
                    .register(&f.token, request("/taskExecutor1"), TIMEOUT)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        f.fencing
            .transition()
            .await
            .install(LeaderEpoch::new(2), FencingToken::from_raw(77));

        let err = attempt.await.unwrap().unwrap_err();
        assert!(matches!(err, CoordinatorError::FencingMismatch { .. }));
        assert!(f.registry.is_empty());
    }
}
