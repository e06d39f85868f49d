//! Heartbeat monitor
//!
//! TigerStyle: Probes are bounded by the heartbeat timeout; eviction acts only
//! on the registration that timed out.
//!
//! The monitor owns the [`HeartbeatTracker`] and the gateway of every tracked
//! worker. A background task probes all gateways each interval and evicts
//! registrations that stayed silent past the timeout. Inbound heartbeats from
//! workers reset the same timers.

use crate::capacity::SlotTracker;
use crate::fencing::FencingGuard;
use crate::gateway::TaskExecutorGateway;
use corral_core::IoContext;
use corral_registry::{
    HeartbeatConfig, HeartbeatTracker, RegistrationId, ResourceManagerId, WorkerId,
    WorkerRegistry,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cause sent to a worker evicted for silence
pub const EVICTION_CAUSE: &str = "heartbeat of task executor timed out";

#[derive(Debug)]
struct MonitorState {
    tracker: HeartbeatTracker,
    gateways: HashMap<WorkerId, Arc<dyn TaskExecutorGateway>>,
}

#[derive(Debug)]
struct MonitorShared {
    manager_id: ResourceManagerId,
    config: HeartbeatConfig,
    fencing: Arc<FencingGuard>,
    registry: Arc<WorkerRegistry>,
    slots: Arc<dyn SlotTracker>,
    io: IoContext,
    state: Mutex<MonitorState>,
}

#[derive(Debug)]
struct ProbeTask {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

/// Liveness monitor for registered task executors
#[derive(Debug)]
pub struct HeartbeatMonitor {
    shared: Arc<MonitorShared>,
    task: Mutex<Option<ProbeTask>>,
}

impl HeartbeatMonitor {
    pub fn new(
        manager_id: ResourceManagerId,
        config: HeartbeatConfig,
        fencing: Arc<FencingGuard>,
        registry: Arc<WorkerRegistry>,
        slots: Arc<dyn SlotTracker>,
        io: IoContext,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                manager_id,
                config,
                fencing,
                registry,
                slots,
                io,
                state: Mutex::new(MonitorState {
                    tracker: HeartbeatTracker::new(config),
                    gateways: HashMap::new(),
                }),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.shared.config
    }

    /// Track `registration_id` through `gateway`, replacing any previous target
    ///
    /// Returns the replaced gateway. Call while the registration is pinned in
    /// the registry so tracking follows registry order.
    pub async fn track(
        &self,
        worker_id: WorkerId,
        registration_id: RegistrationId,
        gateway: Arc<dyn TaskExecutorGateway>,
        now_ms: u64,
    ) -> Option<Arc<dyn TaskExecutorGateway>> {
        let mut state = self.shared.state.lock().await;
        state
            .tracker
            .track(worker_id.clone(), registration_id, now_ms);
        state.gateways.insert(worker_id, gateway)
    }

    /// Stop tracking `worker_id` if it is still `registration_id`
    pub async fn untrack(
        &self,
        worker_id: &WorkerId,
        registration_id: &RegistrationId,
    ) -> Option<Arc<dyn TaskExecutorGateway>> {
        let mut state = self.shared.state.lock().await;
        if state.tracker.untrack(worker_id, registration_id) {
            state.gateways.remove(worker_id)
        } else {
            None
        }
    }

    /// Record an inbound heartbeat for the worker's current registration
    pub async fn record_heartbeat(
        &self,
        worker_id: &WorkerId,
        registration_id: &RegistrationId,
    ) -> bool {
        self.shared.record_heartbeat(worker_id, registration_id).await
    }

    /// Probe every tracked worker once
    pub async fn probe_all(&self) {
        self.shared.probe_all().await;
    }

    /// Evict every registration silent past the timeout
    ///
    /// Does nothing while this coordinator is not leader. Returns the evicted
    /// workers.
    pub async fn check_timeouts(&self) -> Vec<WorkerId> {
        self.shared.check_timeouts().await
    }

    /// Drop all tracking state, returning the gateways that were tracked
    pub async fn clear(&self) -> Vec<Arc<dyn TaskExecutorGateway>> {
        let mut state = self.shared.state.lock().await;
        state.tracker.clear();
        state.gateways.drain().map(|(_, gateway)| gateway).collect()
    }

    pub async fn tracked_count(&self) -> usize {
        self.shared.state.lock().await.tracker.len()
    }

    /// Start the probe loop; no-op if already running
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if matches!(&*task, Some(running) if !running.handle.is_finished()) {
            return;
        }

        let shared = self.shared.clone();
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let interval_ms = self.shared.config.interval_ms;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.io.sleep_ms(interval_ms) => {
                        shared.probe_all().await;
                        shared.check_timeouts().await;
                    }
                    _ = signal.notified() => {
                        debug!("heartbeat monitor shutting down");
                        break;
                    }
                }
            }
        });

        info!(interval_ms, timeout_ms = self.shared.config.timeout_ms, "heartbeat monitor started");
        *task = Some(ProbeTask { handle, shutdown });
    }

    /// Stop the probe loop and wait for it to exit
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        task.shutdown.notify_one();
        task.handle.abort();
        let _ = task.handle.await;
        info!("heartbeat monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        let task = self.task.lock().await;
        matches!(&*task, Some(running) if !running.handle.is_finished())
    }
}

impl MonitorShared {
    async fn record_heartbeat(&self, worker_id: &WorkerId, registration_id: &RegistrationId) -> bool {
        let now_ms = self.io.now_ms();
        if !self
            .registry
            .record_heartbeat(worker_id, registration_id, now_ms)
            .await
        {
            return false;
        }
        let accepted = self
            .state
            .lock()
            .await
            .tracker
            .receive(worker_id, registration_id, now_ms)
            .is_ok();
        debug!(%worker_id, %registration_id, accepted, "heartbeat recorded");
        accepted
    }

    async fn probe_all(&self) {
        let targets: Vec<_> = {
            let state = self.state.lock().await;
            state
                .tracker
                .targets()
                .into_iter()
                .filter_map(|(worker_id, registration_id)| {
                    state
                        .gateways
                        .get(&worker_id)
                        .cloned()
                        .map(|gateway| (worker_id, registration_id, gateway))
                })
                .collect()
        };

        let timeout = self.config.timeout();
        let manager_id = &self.manager_id;
        let probes = targets
            .into_iter()
            .map(|(worker_id, registration_id, gateway)| async move {
                let result =
                    tokio::time::timeout(timeout, gateway.heartbeat_from_resource_manager(manager_id))
                        .await;
                (worker_id, registration_id, result)
            });

        for (worker_id, registration_id, result) in join_all(probes).await {
            match result {
                Ok(Ok(())) => {
                    self.record_heartbeat(&worker_id, &registration_id).await;
                }
                Ok(Err(e)) => {
                    debug!(%worker_id, error = %e, "heartbeat probe failed");
                }
                Err(_) => {
                    debug!(%worker_id, timeout_ms = self.config.timeout_ms, "heartbeat probe timed out");
                }
            }
        }
    }

    async fn check_timeouts(&self) -> Vec<WorkerId> {
        let Some(leadership) = self.fencing.active().await else {
            return Vec::new();
        };

        let now_ms = self.io.now_ms();
        let timed_out: Vec<_> = {
            let mut state = self.state.lock().await;
            state
                .tracker
                .check_all_timeouts(now_ms)
                .into_iter()
                .map(|(worker_id, registration_id)| {
                    let gateway = state.gateways.remove(&worker_id);
                    (worker_id, registration_id, gateway)
                })
                .collect()
        };

        let mut evicted = Vec::with_capacity(timed_out.len());
        let mut notify = Vec::new();
        for (worker_id, registration_id, gateway) in timed_out {
            if self
                .registry
                .remove_if_current(&worker_id, &registration_id)
                .await
                .is_none()
            {
                continue;
            }
            warn!(
                %worker_id,
                %registration_id,
                timeout_ms = self.config.timeout_ms,
                "evicting task executor after heartbeat timeout"
            );
            self.slots.release(&registration_id).await;
            notify.extend(gateway);
            evicted.push(worker_id);
        }
        drop(leadership);

        for gateway in notify {
            gateway.disconnect_resource_manager(EVICTION_CAUSE).await;
        }
        evicted
    }
}
