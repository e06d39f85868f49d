//! Capacity report ingestion
//!
//! TigerStyle: Reports are keyed by registration, never by worker alone.
//!
//! A capacity report names the registration it belongs to. It is forwarded
//! to the [`SlotTracker`] only while that registration is the worker's
//! current one; anything else is stale and dropped after logging. The
//! registry record stays pinned while the report is forwarded, so a
//! concurrent re-registration lands strictly before or after it.

use crate::error::CoordinatorResult;
use crate::fencing::FencingGuard;
use async_trait::async_trait;
use corral_core::FencingToken;
use corral_registry::{CapacityReport, RegistrationId, SlotReport, WorkerRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// External capacity bookkeeping
#[async_trait]
pub trait SlotTracker: Send + Sync + std::fmt::Debug {
    /// Store `report` as the capacity of its registration
    async fn ingest(&self, report: CapacityReport);

    /// Forget the capacity of `registration_id`; returns whether any was held
    async fn release(&self, registration_id: &RegistrationId) -> bool;

    async fn slot_count(&self, registration_id: &RegistrationId) -> usize;

    async fn free_slot_count(&self, registration_id: &RegistrationId) -> usize;

    /// Forget everything
    async fn clear(&self);
}

/// In-memory slot tracker
#[derive(Debug, Default)]
pub struct MemorySlotTracker {
    reports: RwLock<HashMap<RegistrationId, SlotReport>>,
    ingested: AtomicU64,
}

impl MemorySlotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reports ever ingested
    pub fn ingest_count(&self) -> u64 {
        self.ingested.load(Ordering::SeqCst)
    }

    pub async fn tracked_registrations(&self) -> usize {
        self.reports.read().await.len()
    }
}

#[async_trait]
impl SlotTracker for MemorySlotTracker {
    async fn ingest(&self, report: CapacityReport) {
        self.ingested.fetch_add(1, Ordering::SeqCst);
        self.reports
            .write()
            .await
            .insert(report.registration_id, report.report);
    }

    async fn release(&self, registration_id: &RegistrationId) -> bool {
        self.reports.write().await.remove(registration_id).is_some()
    }

    async fn slot_count(&self, registration_id: &RegistrationId) -> usize {
        self.reports
            .read()
            .await
            .get(registration_id)
            .map_or(0, SlotReport::len)
    }

    async fn free_slot_count(&self, registration_id: &RegistrationId) -> usize {
        self.reports
            .read()
            .await
            .get(registration_id)
            .map_or(0, SlotReport::free_count)
    }

    async fn clear(&self) {
        self.reports.write().await.clear();
    }
}

/// What happened to a submitted report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Forwarded to the slot tracker
    Accepted,
    /// Registration was superseded or gone; report dropped
    Stale,
}

/// Forwards current capacity reports to the slot tracker
#[derive(Debug)]
pub struct CapacityReportIngestor {
    fencing: Arc<FencingGuard>,
    registry: Arc<WorkerRegistry>,
    slots: Arc<dyn SlotTracker>,
}

impl CapacityReportIngestor {
    pub fn new(
        fencing: Arc<FencingGuard>,
        registry: Arc<WorkerRegistry>,
        slots: Arc<dyn SlotTracker>,
    ) -> Self {
        Self {
            fencing,
            registry,
            slots,
        }
    }

    /// Submit a capacity report under `token`
    ///
    /// Fails only on a fencing mismatch or a malformed report. A stale
    /// report is not an error.
    pub async fn submit(
        &self,
        token: &FencingToken,
        report: CapacityReport,
    ) -> CoordinatorResult<IngestOutcome> {
        let _admitted = self.fencing.admit(token).await?;
        report.report.validate(&report.worker_id)?;

        let Some(current) = self
            .registry
            .current(&report.worker_id, &report.registration_id)
            .await
        else {
            warn!(
                worker_id = %report.worker_id,
                registration_id = %report.registration_id,
                "dropping capacity report for superseded registration"
            );
            return Ok(IngestOutcome::Stale);
        };

        debug!(
            worker_id = %current.worker_id,
            registration_id = %current.registration_id,
            slots = report.report.len(),
            "ingesting capacity report"
        );
        self.slots.ingest(report).await;
        drop(current);

        Ok(IngestOutcome::Accepted)
    }
}
