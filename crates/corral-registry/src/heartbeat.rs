//! Heartbeat bookkeeping and failure detection
//!
//! TigerStyle: Explicit timeouts, bounded intervals, observable state.
//!
//! The tracker is pure state: callers feed it receive times and ask it which
//! workers have timed out. Driving probes and acting on evictions is the
//! coordinator's job.

use crate::error::{RegistryError, RegistryResult};
use crate::worker::{RegistrationId, WorkerId};
use corral_core::constants::{
    HEARTBEAT_INTERVAL_MS_DEFAULT, HEARTBEAT_INTERVAL_MS_MAX, HEARTBEAT_INTERVAL_MS_MIN,
    HEARTBEAT_TIMEOUT_MS_DEFAULT,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Minimum ratio of timeout to interval
pub const HEARTBEAT_TIMEOUT_INTERVALS_COUNT_MIN: u64 = 2;

/// Configuration for heartbeat tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between probe rounds in milliseconds
    pub interval_ms: u64,
    /// Silence after which a worker is evicted in milliseconds
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: HEARTBEAT_INTERVAL_MS_DEFAULT,
            timeout_ms: HEARTBEAT_TIMEOUT_MS_DEFAULT,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new heartbeat configuration
    ///
    /// The interval is clamped to valid range and the timeout is raised to
    /// at least two intervals.
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        let interval_ms = interval_ms.clamp(HEARTBEAT_INTERVAL_MS_MIN, HEARTBEAT_INTERVAL_MS_MAX);
        let timeout_ms = timeout_ms.max(interval_ms * HEARTBEAT_TIMEOUT_INTERVALS_COUNT_MIN);

        debug_assert!(timeout_ms > interval_ms);
        Self {
            interval_ms,
            timeout_ms,
        }
    }

    /// Short intervals for tests
    pub fn for_testing() -> Self {
        Self {
            interval_ms: 100,
            timeout_ms: 500,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Liveness state of one tracked registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivenessState {
    /// Heard from within the last interval
    Tracking,
    /// Silent for this many whole intervals, still inside the timeout
    Missed(u32),
    /// Silent past the timeout; terminal for this registration
    Evicted,
}

/// Per-worker tracking entry
#[derive(Debug, Clone)]
pub struct WorkerHeartbeatState {
    pub registration_id: RegistrationId,
    /// Last heartbeat receive time (local clock)
    pub last_received_ms: u64,
    pub state: LivenessState,
}

impl WorkerHeartbeatState {
    fn new(registration_id: RegistrationId, now_ms: u64) -> Self {
        Self {
            registration_id,
            last_received_ms: now_ms,
            state: LivenessState::Tracking,
        }
    }

    fn receive(&mut self, now_ms: u64) {
        self.last_received_ms = self.last_received_ms.max(now_ms);
        self.state = LivenessState::Tracking;
    }

    /// Recompute state for `now_ms`
    fn check_timeout(&mut self, now_ms: u64, config: &HeartbeatConfig) -> LivenessState {
        let elapsed = now_ms.saturating_sub(self.last_received_ms);

        self.state = if elapsed > config.timeout_ms {
            LivenessState::Evicted
        } else if elapsed > config.interval_ms {
            let missed = elapsed / config.interval_ms;
            LivenessState::Missed(u32::try_from(missed).unwrap_or(u32::MAX))
        } else {
            LivenessState::Tracking
        };
        self.state
    }
}

/// Heartbeat state for all tracked workers
#[derive(Debug)]
pub struct HeartbeatTracker {
    config: HeartbeatConfig,
    workers: HashMap<WorkerId, WorkerHeartbeatState>,
}

impl HeartbeatTracker {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            workers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Start tracking `registration_id`, replacing any previous target
    ///
    /// Returns the registration that was tracked before, if any.
    pub fn track(
        &mut self,
        worker_id: WorkerId,
        registration_id: RegistrationId,
        now_ms: u64,
    ) -> Option<RegistrationId> {
        self.workers
            .insert(worker_id, WorkerHeartbeatState::new(registration_id, now_ms))
            .map(|previous| previous.registration_id)
    }

    /// Stop tracking `worker_id` if it is still `registration_id`
    pub fn untrack(&mut self, worker_id: &WorkerId, registration_id: &RegistrationId) -> bool {
        let matches = self
            .workers
            .get(worker_id)
            .is_some_and(|state| &state.registration_id == registration_id);
        if matches {
            self.workers.remove(worker_id);
        }
        matches
    }

    /// Record a heartbeat for `worker_id`
    ///
    /// Heartbeats for a registration other than the tracked one are rejected
    /// so a superseded gateway cannot keep the new registration alive.
    pub fn receive(
        &mut self,
        worker_id: &WorkerId,
        registration_id: &RegistrationId,
        now_ms: u64,
    ) -> RegistryResult<()> {
        match self.workers.get_mut(worker_id) {
            Some(state) if &state.registration_id == registration_id => {
                state.receive(now_ms);
                Ok(())
            }
            _ => Err(RegistryError::worker_not_tracked(worker_id.as_str())),
        }
    }

    /// Update every worker's state and drop the ones that timed out
    ///
    /// Returns the evicted `(worker_id, registration_id)` pairs.
    pub fn check_all_timeouts(&mut self, now_ms: u64) -> Vec<(WorkerId, RegistrationId)> {
        let config = self.config;
        let mut evicted = Vec::new();

        self.workers.retain(|worker_id, state| {
            if state.check_timeout(now_ms, &config) == LivenessState::Evicted {
                evicted.push((worker_id.clone(), state.registration_id.clone()));
                false
            } else {
                true
            }
        });

        evicted
    }

    pub fn get(&self, worker_id: &WorkerId) -> Option<&WorkerHeartbeatState> {
        self.workers.get(worker_id)
    }

    /// Snapshot of tracked targets
    pub fn targets(&self) -> Vec<(WorkerId, RegistrationId)> {
        self.workers
            .iter()
            .map(|(id, state)| (id.clone(), state.registration_id.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn clear(&mut self) {
        self.workers.clear();
    }
}
