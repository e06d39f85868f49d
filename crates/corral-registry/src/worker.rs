//! Worker identity, registration records, and capacity reports
//!
//! TigerStyle: Validated identifiers, explicit limits.

use crate::error::{RegistryError, RegistryResult};
use corral_core::constants::{
    SLOT_REPORT_SLOTS_COUNT_MAX, WORKER_ADDRESS_LENGTH_BYTES_MAX, WORKER_ID_LENGTH_BYTES_MAX,
};
use corral_core::io::RngProvider;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Identifiers
// =============================================================================

/// Globally unique identity a task executor assigns itself at startup
///
/// Stable for the lifetime of the worker process; the registry key.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Create a WorkerId with validation
    ///
    /// # Errors
    /// Returns error if id is empty, too long, or contains characters other
    /// than alphanumerics, dashes, underscores and dots.
    pub fn new(id: impl Into<String>) -> RegistryResult<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(RegistryError::invalid_worker_id(
                id,
                "worker ID cannot be empty",
            ));
        }

        if id.len() > WORKER_ID_LENGTH_BYTES_MAX {
            let reason = format!(
                "worker ID length {} exceeds limit {}",
                id.len(),
                WORKER_ID_LENGTH_BYTES_MAX
            );
            return Err(RegistryError::invalid_worker_id(id, reason));
        }

        let valid = id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid {
            return Err(RegistryError::invalid_worker_id(
                id,
                "worker ID contains invalid characters",
            ));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token minted on every successful registration
///
/// A re-registration of the same worker always gets a new one; the old id
/// is dead from that moment on.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RegistrationId(String);

impl RegistrationId {
    pub fn generate(rng: &dyn RngProvider) -> Self {
        Self(rng.gen_uuid())
    }

    /// Wrap an id received over the wire
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the coordinator process itself (not its leadership session)
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResourceManagerId(String);

impl ResourceManagerId {
    pub fn generate(rng: &dyn RngProvider) -> Self {
        Self(format!("rm-{}", rng.gen_uuid()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callback endpoint of a task executor
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutorAddress(String);

impl TaskExecutorAddress {
    /// Syntactic validation only; reachability is decided by connecting.
    pub fn parse(address: impl Into<String>) -> RegistryResult<Self> {
        let address = address.into();

        if address.is_empty() {
            return Err(RegistryError::invalid_address(address, "address is empty"));
        }
        if address.len() > WORKER_ADDRESS_LENGTH_BYTES_MAX {
            let reason = format!(
                "address length {} exceeds limit {}",
                address.len(),
                WORKER_ADDRESS_LENGTH_BYTES_MAX
            );
            return Err(RegistryError::invalid_address(address, reason));
        }
        if address.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(RegistryError::invalid_address(
                address,
                "address contains whitespace or control characters",
            ));
        }

        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskExecutorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Capacity Metadata
// =============================================================================

/// Hardware a task executor reports at registration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HardwareDescription {
    pub cpu_cores: u32,
    pub physical_memory_bytes: u64,
    pub heap_memory_bytes: u64,
    pub managed_memory_bytes: u64,
}

impl HardwareDescription {
    pub fn new(
        cpu_cores: u32,
        physical_memory_bytes: u64,
        heap_memory_bytes: u64,
        managed_memory_bytes: u64,
    ) -> Self {
        Self {
            cpu_cores,
            physical_memory_bytes,
            heap_memory_bytes,
            managed_memory_bytes,
        }
    }
}

/// Slot on a specific worker
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SlotId {
    pub worker_id: WorkerId,
    pub slot_number: u32,
}

impl SlotId {
    pub fn new(worker_id: WorkerId, slot_number: u32) -> Self {
        Self {
            worker_id,
            slot_number,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.worker_id, self.slot_number)
    }
}

/// Resources offered by one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResourceProfile {
    #[default]
    Unknown,
    Sized {
        cpu_millis: u64,
        memory_bytes: u64,
    },
}

/// State of one slot as seen by its worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub slot_id: SlotId,
    pub profile: ResourceProfile,
    /// Allocation currently occupying the slot, if any
    pub allocation_id: Option<String>,
}

impl SlotStatus {
    pub fn free(slot_id: SlotId, profile: ResourceProfile) -> Self {
        Self {
            slot_id,
            profile,
            allocation_id: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.allocation_id.is_none()
    }
}

/// A worker's declaration of its slots
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlotReport {
    pub slots: Vec<SlotStatus>,
}

impl SlotReport {
    pub fn new(slots: Vec<SlotStatus>) -> Self {
        Self { slots }
    }

    pub fn single(status: SlotStatus) -> Self {
        Self {
            slots: vec![status],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_free()).count()
    }

    /// Check limits and that every slot belongs to `worker_id`
    pub fn validate(&self, worker_id: &WorkerId) -> RegistryResult<()> {
        if self.slots.len() > SLOT_REPORT_SLOTS_COUNT_MAX {
            return Err(RegistryError::InvalidSlotReport {
                worker_id: worker_id.to_string(),
                reason: format!(
                    "{} slots exceeds limit {}",
                    self.slots.len(),
                    SLOT_REPORT_SLOTS_COUNT_MAX
                ),
            });
        }
        if let Some(foreign) = self.slots.iter().find(|s| &s.slot_id.worker_id != worker_id) {
            return Err(RegistryError::InvalidSlotReport {
                worker_id: worker_id.to_string(),
                reason: format!("slot {} belongs to another worker", foreign.slot_id),
            });
        }
        Ok(())
    }
}

/// A slot report tagged with the registration it was produced under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityReport {
    pub worker_id: WorkerId,
    pub registration_id: RegistrationId,
    pub report: SlotReport,
}

// =============================================================================
// Registration Record
// =============================================================================

/// The coordinator's authoritative state for one admitted worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub worker_id: WorkerId,
    pub registration_id: RegistrationId,
    pub address: TaskExecutorAddress,
    pub data_port: u16,
    pub hardware: HardwareDescription,
    /// When the registration was committed (Unix ms)
    pub registered_at_ms: u64,
    /// Last observed heartbeat (Unix ms); written only by heartbeat bookkeeping
    pub last_heartbeat_ms: u64,
}

impl RegistrationRecord {
    pub fn new(
        worker_id: WorkerId,
        registration_id: RegistrationId,
        address: TaskExecutorAddress,
        data_port: u16,
        hardware: HardwareDescription,
        now_ms: u64,
    ) -> Self {
        Self {
            worker_id,
            registration_id,
            address,
            data_port,
            hardware,
            registered_at_ms: now_ms,
            last_heartbeat_ms: now_ms,
        }
    }

    /// Whether `registration_id` is the one this record was created with
    pub fn is_registration(&self, registration_id: &RegistrationId) -> bool {
        &self.registration_id == registration_id
    }
}
