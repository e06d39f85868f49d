//! Leadership lifecycle
//!
//! TigerStyle: Grant and revoke are whole-state transitions taken under the
//! fencing write lock.
//!
//! A grant mints a fresh fencing token, wipes every registration made under a
//! previous term and starts heartbeat probing. A revoke rejects all further
//! calls and stops probing. Either wipe notifies the affected workers once the
//! transition is complete.

use crate::capacity::SlotTracker;
use crate::fencing::FencingGuard;
use crate::gateway::TaskExecutorGateway;
use crate::monitor::HeartbeatMonitor;
use corral_core::{FencingToken, IoContext, LeaderEpoch, LeadershipState};
use corral_registry::WorkerRegistry;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Cause sent to workers whose registration was wiped by a leadership change
pub const LEADERSHIP_CHANGED_CAUSE: &str = "resource manager leadership changed";

/// Notification from the leader election service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderElectionEvent {
    Granted { epoch: LeaderEpoch },
    Revoked,
}

/// Applies leader election events to the coordinator
#[derive(Debug)]
pub struct LeadershipLifecycle {
    fencing: Arc<FencingGuard>,
    registry: Arc<WorkerRegistry>,
    monitor: Arc<HeartbeatMonitor>,
    slots: Arc<dyn SlotTracker>,
    io: IoContext,
    /// Highest epoch ever granted
    last_granted: Mutex<Option<LeaderEpoch>>,
}

impl LeadershipLifecycle {
    pub fn new(
        fencing: Arc<FencingGuard>,
        registry: Arc<WorkerRegistry>,
        monitor: Arc<HeartbeatMonitor>,
        slots: Arc<dyn SlotTracker>,
        io: IoContext,
    ) -> Self {
        Self {
            fencing,
            registry,
            monitor,
            slots,
            io,
            last_granted: Mutex::new(None),
        }
    }

    /// Become leader for `epoch`
    ///
    /// Returns the new token, or `None` if `epoch` is not newer than the last
    /// granted one.
    pub async fn grant(&self, epoch: LeaderEpoch) -> Option<FencingToken> {
        let mut last_granted = self.last_granted.lock().await;
        if let Some(last) = *last_granted {
            if epoch <= last {
                warn!(%epoch, last_epoch = %last, "ignoring stale leadership grant");
                return None;
            }
        }

        let token = FencingToken::generate(self.io.rng.as_ref());
        let wiped = {
            let mut transition = self.fencing.transition().await;
            let wiped = self.reset().await;
            transition.install(epoch, token);
            wiped
        };
        *last_granted = Some(epoch);
        // Probing starts under the epoch lock so a concurrent revoke stops it
        self.monitor.start().await;
        drop(last_granted);

        info!(%epoch, wiped = wiped.len(), "leadership granted");

        notify_all(wiped).await;
        Some(token)
    }

    /// Stop being leader
    pub async fn revoke(&self) {
        // Hold the epoch lock so a concurrent grant orders strictly around us
        let _last_granted = self.last_granted.lock().await;

        let (previous, wiped) = {
            let mut transition = self.fencing.transition().await;
            let previous = transition.revoke();
            (previous, self.reset().await)
        };
        self.monitor.stop().await;

        match previous {
            LeadershipState::Active { epoch, .. } => {
                info!(%epoch, wiped = wiped.len(), "leadership revoked")
            }
            LeadershipState::Inactive => info!("leadership revoked while inactive"),
        }

        notify_all(wiped).await;
    }

    /// Apply one election event
    pub async fn handle(&self, event: LeaderElectionEvent) {
        match event {
            LeaderElectionEvent::Granted { epoch } => {
                self.grant(epoch).await;
            }
            LeaderElectionEvent::Revoked => self.revoke().await,
        }
    }

    /// Apply events until the election service hangs up
    pub async fn run(&self, mut events: mpsc::Receiver<LeaderElectionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("leader election channel closed");
    }

    async fn reset(&self) -> Vec<Arc<dyn TaskExecutorGateway>> {
        self.registry.clear().await;
        self.slots.clear().await;
        self.monitor.clear().await
    }
}

async fn notify_all(gateways: Vec<Arc<dyn TaskExecutorGateway>>) {
    futures::future::join_all(
        gateways
            .iter()
            .map(|gateway| gateway.disconnect_resource_manager(LEADERSHIP_CHANGED_CAUSE)),
    )
    .await;
}
