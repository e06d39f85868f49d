//! I/O abstraction for deterministic testing
//!
//! TigerStyle: Time and randomness are injected, never read from globals.
//!
//! Coordinator logic reads the clock for heartbeat bookkeeping and draws
//! randomness for registration ids and fencing tokens. Both go through the
//! traits below so tests can swap in a [`SimClock`] and a seeded
//! [`StdRngProvider`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction
///
/// Never call `SystemTime::now()` from coordinator logic; go through this trait.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    async fn sleep_ms(&self, ms: u64);
}

/// Production time provider backed by the system clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

/// Manually advanced clock
///
/// `sleep_ms` parks until some other task advances the clock past the
/// deadline, so background loops only make progress when a test says so.
#[derive(Debug, Clone)]
pub struct SimClock {
    current_ms: Arc<AtomicU64>,
    advanced: Arc<Notify>,
}

impl SimClock {
    /// Create a clock starting at the given millisecond timestamp
    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_ms: Arc::new(AtomicU64::new(ms)),
            advanced: Arc::new(Notify::new()),
        }
    }

    /// Advance time by `ms` and wake sleepers
    pub fn advance_ms(&self, ms: u64) {
        self.current_ms.fetch_add(ms, Ordering::SeqCst);
        self.advanced.notify_waiters();
    }
}

impl Default for SimClock {
    fn default() -> Self {
        // 2024-01-01T00:00:00Z
        Self::from_millis(1_704_067_200_000)
    }
}

#[async_trait]
impl TimeProvider for SimClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        let deadline_ms = self.now_ms().saturating_add(ms);
        loop {
            // Register interest before re-checking so an advance between the
            // check and the await is not lost.
            let mut notified = std::pin::pin!(self.advanced.notified());
            notified.as_mut().enable();
            if self.now_ms() >= deadline_ms {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Random number generator abstraction
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    /// Generate a random u64
    fn next_u64(&self) -> u64;

    /// Generate 128 random bits
    fn next_u128(&self) -> u128 {
        ((self.next_u64() as u128) << 64) | self.next_u64() as u128
    }

    /// Generate a random UUID v4 string
    fn gen_uuid(&self) -> String {
        let mut bits = self.next_u128();
        // version 4, variant 1
        bits = (bits & !(0xf << 76)) | (0x4 << 76);
        bits = (bits & !(0x3 << 62)) | (0x2 << 62);

        let hex = format!("{:032x}", bits);
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

/// Production RNG provider (xorshift64*, not cryptographically secure)
#[derive(Debug)]
pub struct StdRngProvider {
    state: AtomicU64,
}

impl Default for StdRngProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StdRngProvider {
    /// Create a provider seeded from the system clock
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(seed)
    }

    /// Create a provider with a fixed seed
    pub fn with_seed(seed: u64) -> Self {
        // xorshift never leaves the zero state
        let seed = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self {
            state: AtomicU64::new(seed),
        }
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            let mut x = state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;

            match self
                .state
                .compare_exchange_weak(state, x, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return x.wrapping_mul(0x2545_F491_4F6C_DD1D),
                Err(current) => state = current,
            }
        }
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of all I/O providers
#[derive(Clone, Debug)]
pub struct IoContext {
    pub time: Arc<dyn TimeProvider>,
    pub rng: Arc<dyn RngProvider>,
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Wall clock and system-seeded RNG
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
            rng: Arc::new(StdRngProvider::new()),
        }
    }

    /// Custom providers
    pub fn new(time: Arc<dyn TimeProvider>, rng: Arc<dyn RngProvider>) -> Self {
        Self { time, rng }
    }

    /// Simulated clock and seeded RNG, returning the clock handle for advancing
    pub fn simulated(seed: u64) -> (Self, SimClock) {
        let clock = SimClock::default();
        let ctx = Self::new(
            Arc::new(clock.clone()),
            Arc::new(StdRngProvider::with_seed(seed)),
        );
        (ctx, clock)
    }

    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    pub async fn sleep_ms(&self, ms: u64) {
        self.time.sleep_ms(ms).await;
    }

    pub fn gen_uuid(&self) -> String {
        self.rng.gen_uuid()
    }
}
