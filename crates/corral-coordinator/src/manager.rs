//! Resource manager service
//!
//! TigerStyle: Every entry point is fenced and bounded by the caller's timeout.
//!
//! [`ResourceManager`] owns the shared state and wires the components
//! together. Workers talk to it through a [`ResourceManagerGateway`], a handle
//! bound to the fencing token the worker believes is current.

use crate::capacity::{CapacityReportIngestor, IngestOutcome, SlotTracker};
use crate::config::ResourceManagerConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::fencing::FencingGuard;
use crate::gateway::TaskExecutorConnector;
use crate::leadership::{LeaderElectionEvent, LeadershipLifecycle};
use crate::monitor::HeartbeatMonitor;
use crate::registration::{RegistrationCoordinator, RegistrationOutcome, TaskExecutorRegistration};
use corral_core::{FencingToken, IoContext, LeaderEpoch};
use corral_registry::{
    CapacityReport, HardwareDescription, RegistrationId, ResourceManagerId, SlotReport,
    TaskExecutorAddress, WorkerId, WorkerRegistry,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Positive reply carrying no data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledge;

/// Public view of one registered task executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskManagerInfo {
    pub worker_id: WorkerId,
    pub address: TaskExecutorAddress,
    pub data_port: u16,
    pub last_heartbeat_ms: u64,
    pub number_slots: usize,
    pub number_free_slots: usize,
    pub hardware: HardwareDescription,
}

/// The coordinator for task executor registration and liveness
#[derive(Debug)]
pub struct ResourceManager {
    id: ResourceManagerId,
    config: ResourceManagerConfig,
    fencing: Arc<FencingGuard>,
    registry: Arc<WorkerRegistry>,
    slots: Arc<dyn SlotTracker>,
    monitor: Arc<HeartbeatMonitor>,
    registration: RegistrationCoordinator,
    capacity: CapacityReportIngestor,
    leadership: LeadershipLifecycle,
}

impl ResourceManager {
    /// Create a resource manager that is not yet leader
    pub fn new(
        config: ResourceManagerConfig,
        connector: Arc<dyn TaskExecutorConnector>,
        slots: Arc<dyn SlotTracker>,
        io: IoContext,
    ) -> Self {
        let id = ResourceManagerId::generate(io.rng.as_ref());
        let fencing = Arc::new(FencingGuard::new());
        let registry = Arc::new(WorkerRegistry::new(config.shard_count));
        let monitor = Arc::new(HeartbeatMonitor::new(
            id.clone(),
            config.heartbeat,
            fencing.clone(),
            registry.clone(),
            slots.clone(),
            io.clone(),
        ));
        let registration = RegistrationCoordinator::new(
            id.clone(),
            fencing.clone(),
            registry.clone(),
            connector,
            monitor.clone(),
            slots.clone(),
            io.clone(),
        );
        let capacity = CapacityReportIngestor::new(fencing.clone(), registry.clone(), slots.clone());
        let leadership = LeadershipLifecycle::new(
            fencing.clone(),
            registry.clone(),
            monitor.clone(),
            slots.clone(),
            io,
        );

        info!(resource_manager_id = %id, shards = registry.shard_count(), "resource manager created");

        Self {
            id,
            config,
            fencing,
            registry,
            slots,
            monitor,
            registration,
            capacity,
            leadership,
        }
    }

    pub fn id(&self) -> &ResourceManagerId {
        &self.id
    }

    pub fn config(&self) -> &ResourceManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &HeartbeatMonitor {
        &self.monitor
    }

    pub fn leadership(&self) -> &LeadershipLifecycle {
        &self.leadership
    }

    /// Token currently admitted, if leader
    pub async fn fencing_token(&self) -> Option<FencingToken> {
        self.fencing.current_token().await
    }

    pub async fn grant_leadership(&self, epoch: LeaderEpoch) -> Option<FencingToken> {
        self.leadership.grant(epoch).await
    }

    pub async fn revoke_leadership(&self) {
        self.leadership.revoke().await;
    }

    /// Consume election events on a background task
    pub fn spawn_leadership(
        self: &Arc<Self>,
        events: mpsc::Receiver<LeaderElectionEvent>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move { manager.leadership.run(events).await })
    }

    /// Handle bound to `token`
    pub fn gateway(self: &Arc<Self>, token: FencingToken) -> ResourceManagerGateway {
        ResourceManagerGateway {
            manager: self.clone(),
            token,
        }
    }

    /// Stop background probing
    pub async fn shutdown(&self) {
        self.monitor.stop().await;
        info!(resource_manager_id = %self.id, "resource manager stopped");
    }

    async fn task_manager_info(&self, worker_id: &WorkerId) -> CoordinatorResult<TaskManagerInfo> {
        let record = self
            .registry
            .get(worker_id)
            .await
            .ok_or_else(|| CoordinatorError::unknown_worker(worker_id))?;

        Ok(TaskManagerInfo {
            number_slots: self.slots.slot_count(&record.registration_id).await,
            number_free_slots: self.slots.free_slot_count(&record.registration_id).await,
            worker_id: record.worker_id,
            address: record.address,
            data_port: record.data_port,
            last_heartbeat_ms: record.last_heartbeat_ms,
            hardware: record.hardware,
        })
    }
}

/// Fenced client handle to a [`ResourceManager`]
#[derive(Debug, Clone)]
pub struct ResourceManagerGateway {
    manager: Arc<ResourceManager>,
    token: FencingToken,
}

impl ResourceManagerGateway {
    pub fn fencing_token(&self) -> FencingToken {
        self.token
    }

    pub fn resource_manager_id(&self) -> &ResourceManagerId {
        &self.manager.id
    }

    /// Register a task executor; `timeout` bounds the callback connection
    pub async fn register_task_executor(
        &self,
        registration: TaskExecutorRegistration,
        timeout: Duration,
    ) -> CoordinatorResult<RegistrationOutcome> {
        self.manager
            .registration
            .register(&self.token, registration, timeout)
            .await
    }

    /// Report a registration's slots
    ///
    /// Reports for a superseded registration are acknowledged and dropped.
    pub async fn send_slot_report(
        &self,
        worker_id: WorkerId,
        registration_id: RegistrationId,
        report: SlotReport,
        timeout: Duration,
    ) -> CoordinatorResult<Acknowledge> {
        let report = CapacityReport {
            worker_id,
            registration_id,
            report,
        };
        bounded("send_slot_report", timeout, async {
            match self.manager.capacity.submit(&self.token, report).await? {
                IngestOutcome::Accepted | IngestOutcome::Stale => Ok(Acknowledge),
            }
        })
        .await
    }

    pub async fn request_task_manager_info(
        &self,
        worker_id: &WorkerId,
        timeout: Duration,
    ) -> CoordinatorResult<TaskManagerInfo> {
        bounded("request_task_manager_info", timeout, async {
            let _admitted = self.manager.fencing.admit(&self.token).await?;
            self.manager.task_manager_info(worker_id).await
        })
        .await
    }

    /// Info for every registered task executor
    pub async fn request_task_manager_infos(
        &self,
        timeout: Duration,
    ) -> CoordinatorResult<Vec<TaskManagerInfo>> {
        bounded("request_task_manager_infos", timeout, async {
            let _admitted = self.manager.fencing.admit(&self.token).await?;
            let mut infos = Vec::new();
            for record in self.manager.registry.list().await {
                // Removed since the listing; skip it
                if let Ok(info) = self.manager.task_manager_info(&record.worker_id).await {
                    infos.push(info);
                }
            }
            Ok(infos)
        })
        .await
    }

    /// Inbound liveness signal from a task executor
    pub async fn heartbeat_from_task_executor(
        &self,
        worker_id: &WorkerId,
        timeout: Duration,
    ) -> CoordinatorResult<()> {
        bounded("heartbeat_from_task_executor", timeout, async {
            let _admitted = self.manager.fencing.admit(&self.token).await?;
            let record = self
                .manager
                .registry
                .get(worker_id)
                .await
                .ok_or_else(|| CoordinatorError::unknown_worker(worker_id))?;

            if self
                .manager
                .monitor
                .record_heartbeat(worker_id, &record.registration_id)
                .await
            {
                Ok(())
            } else {
                Err(CoordinatorError::unknown_worker(worker_id))
            }
        })
        .await
    }

    /// Task executor is leaving; drop its registration
    pub async fn disconnect_task_executor(
        &self,
        worker_id: &WorkerId,
        cause: &str,
        timeout: Duration,
    ) -> CoordinatorResult<Acknowledge> {
        bounded("disconnect_task_executor", timeout, async {
            let gateway = {
                let _admitted = self.manager.fencing.admit(&self.token).await?;
                let record = self
                    .manager
                    .registry
                    .get(worker_id)
                    .await
                    .ok_or_else(|| CoordinatorError::unknown_worker(worker_id))?;
                self.manager
                    .registry
                    .remove_if_current(worker_id, &record.registration_id)
                    .await
                    .ok_or_else(|| CoordinatorError::unknown_worker(worker_id))?;

                self.manager.slots.release(&record.registration_id).await;
                self.manager
                    .monitor
                    .untrack(worker_id, &record.registration_id)
                    .await
            };

            info!(%worker_id, cause, "task executor disconnected");
            if let Some(gateway) = gateway {
                gateway.disconnect_resource_manager(cause).await;
            }
            Ok(Acknowledge)
        })
        .await
    }
}

async fn bounded<T>(
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = CoordinatorResult<T>>,
) -> CoordinatorResult<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| CoordinatorError::rpc_timeout(operation, timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::MemorySlotTracker;
    use crate::gateway::{MemoryRpcService, TestingTaskExecutorGateway};
    use corral_registry::{ResourceProfile, SlotId, SlotStatus};

    const TIMEOUT: Duration = Duration::from_secs(10);

    async fn leader() -> (Arc<ResourceManager>, ResourceManagerGateway, Arc<TestingTaskExecutorGateway>) {
        let (io, _clock) = IoContext::simulated(51);
        let rpc = Arc::new(MemoryRpcService::new());
        let executor = Arc::new(TestingTaskExecutorGateway::new(
            TaskExecutorAddress::parse("/taskExecutor1").unwrap(),
        ));
        rpc.register_gateway(executor.clone()).await;

        let manager = Arc::new(ResourceManager::new(
            ResourceManagerConfig::for_testing(),
            rpc,
            Arc::new(MemorySlotTracker::new()),
            io,
        ));
        let token = manager.grant_leadership(LeaderEpoch::new(1)).await.unwrap();
        let gateway = manager.gateway(token);
        (manager, gateway, executor)
    }

    fn worker() -> WorkerId {
        WorkerId::new("worker-1").unwrap()
    }

    fn registration() -> TaskExecutorRegistration {
        TaskExecutorRegistration::new("/taskExecutor1", worker(), 1234, HardwareDescription::new(1, 2, 3, 4))
    }

    #[tokio::test]
    async fn test_info_reflects_registration_and_slots() {
        let (manager, gateway, _) = leader().await;
        let outcome = gateway
            .register_task_executor(registration(), TIMEOUT)
            .await
            .unwrap();
        let rid = outcome.registration_id().unwrap().clone();

        let report = SlotReport::single(SlotStatus::free(
            SlotId::new(worker(), 0),
            ResourceProfile::Unknown,
        ));
        gateway
            .send_slot_report(worker(), rid, report, TIMEOUT)
            .await
            .unwrap();

        let info = gateway
            .request_task_manager_info(&worker(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(info.worker_id, worker());
        assert_eq!(info.number_slots, 1);
        assert_eq!(info.number_free_slots, 1);
        assert_eq!(info.hardware, HardwareDescription::new(1, 2, 3, 4));

        let infos = gateway.request_task_manager_infos(TIMEOUT).await.unwrap();
        assert_eq!(infos, vec![info]);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_worker_info_fails() {
        let (manager, gateway, _) = leader().await;
        let err = gateway
            .request_task_manager_info(&worker(), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownWorker { .. }));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_heartbeat() {
        let (manager, gateway, _) = leader().await;
        assert!(gateway
            .heartbeat_from_task_executor(&worker(), TIMEOUT)
            .await
            .is_err());

        gateway
            .register_task_executor(registration(), TIMEOUT)
            .await
            .unwrap();
        gateway
            .heartbeat_from_task_executor(&worker(), TIMEOUT)
            .await
            .unwrap();
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_removes_registration() {
        let (manager, gateway, executor) = leader().await;
        gateway
            .register_task_executor(registration(), TIMEOUT)
            .await
            .unwrap();

        gateway
            .disconnect_task_executor(&worker(), "shutting down", TIMEOUT)
            .await
            .unwrap();

        assert!(manager.registry().is_empty());
        assert_eq!(manager.monitor().tracked_count().await, 0);
        assert_eq!(executor.disconnect_causes().await, vec!["shutting down"]);

        let err = gateway
            .disconnect_task_executor(&worker(), "again", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownWorker { .. }));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_gateway_rejected_everywhere() {
        let (manager, gateway, _) = leader().await;
        let stale = manager.gateway(FencingToken::from_raw(0xdead));

        assert!(matches!(
            stale.register_task_executor(registration(), TIMEOUT).await,
            Err(CoordinatorError::FencingMismatch { .. })
        ));
        assert!(matches!(
            stale.request_task_manager_infos(TIMEOUT).await,
            Err(CoordinatorError::FencingMismatch { .. })
        ));
        assert!(matches!(
            stale.heartbeat_from_task_executor(&worker(), TIMEOUT).await,
            Err(CoordinatorError::FencingMismatch { .. })
        ));
        assert!(gateway.request_task_manager_infos(TIMEOUT).await.is_ok());
        manager.shutdown().await;
    }
}
