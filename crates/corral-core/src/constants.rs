//! TigerStyle constants for Corral
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Worker Limits
// =============================================================================

/// Maximum length of a worker identity in bytes
pub const WORKER_ID_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of a worker callback address in bytes
pub const WORKER_ADDRESS_LENGTH_BYTES_MAX: usize = 256;

/// Maximum number of workers registered with one coordinator
pub const WORKERS_REGISTERED_COUNT_MAX: usize = 100_000;

/// Maximum number of slots a single capacity report may declare
pub const SLOT_REPORT_SLOTS_COUNT_MAX: usize = 4096;

// =============================================================================
// Heartbeat Limits
// =============================================================================

/// Default heartbeat interval in milliseconds (1 sec)
pub const HEARTBEAT_INTERVAL_MS_DEFAULT: u64 = 1000;

/// Default heartbeat timeout before a worker is evicted (5 sec)
pub const HEARTBEAT_TIMEOUT_MS_DEFAULT: u64 = 5000;

/// Minimum heartbeat interval in milliseconds
pub const HEARTBEAT_INTERVAL_MS_MIN: u64 = 10;

/// Maximum heartbeat interval in milliseconds (1 min)
pub const HEARTBEAT_INTERVAL_MS_MAX: u64 = 60 * 1000;

// =============================================================================
// RPC Limits
// =============================================================================

/// Default RPC timeout in milliseconds (10 sec)
pub const RPC_TIMEOUT_MS_DEFAULT: u64 = 10 * 1000;

/// Maximum RPC timeout in milliseconds (5 min)
pub const RPC_TIMEOUT_MS_MAX: u64 = 5 * 60 * 1000;

/// Default timeout for establishing the callback connection during registration
pub const REGISTRATION_TIMEOUT_MS_DEFAULT: u64 = 10 * 1000;

// =============================================================================
// Registry Layout
// =============================================================================

/// Default number of registry shards
pub const REGISTRY_SHARDS_COUNT_DEFAULT: usize = 16;

/// Maximum number of registry shards
pub const REGISTRY_SHARDS_COUNT_MAX: usize = 1024;

// Compile-time assertions for constant validity
const _: () = {
    assert!(WORKER_ID_LENGTH_BYTES_MAX >= 36); // fits a UUID
    assert!(HEARTBEAT_TIMEOUT_MS_DEFAULT > HEARTBEAT_INTERVAL_MS_DEFAULT);
    assert!(HEARTBEAT_INTERVAL_MS_MIN < HEARTBEAT_INTERVAL_MS_MAX);
    assert!(RPC_TIMEOUT_MS_DEFAULT <= RPC_TIMEOUT_MS_MAX);
    assert!(REGISTRY_SHARDS_COUNT_DEFAULT.is_power_of_two());
    assert!(REGISTRY_SHARDS_COUNT_MAX.is_power_of_two());
};
