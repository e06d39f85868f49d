//! Task executor gateways
//!
//! TigerStyle: The callback channel to a worker is a trait; transports plug in
//! behind it.
//!
//! A [`TaskExecutorConnector`] turns a worker's advertised address into a
//! [`TaskExecutorGateway`] the coordinator can probe and notify. The
//! in-memory [`MemoryRpcService`] and [`TestingTaskExecutorGateway`] stand in
//! for a network transport in tests.

use crate::error::{CoordinatorError, CoordinatorResult};
use async_trait::async_trait;
use corral_registry::{ResourceManagerId, TaskExecutorAddress};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Callback channel from the coordinator to one task executor
#[async_trait]
pub trait TaskExecutorGateway: Send + Sync + std::fmt::Debug {
    /// Address this gateway is connected to
    fn address(&self) -> &TaskExecutorAddress;

    /// Outbound heartbeat probe; `Ok` means the worker answered
    async fn heartbeat_from_resource_manager(
        &self,
        manager_id: &ResourceManagerId,
    ) -> CoordinatorResult<()>;

    /// Tell the worker its registration with this coordinator ended
    async fn disconnect_resource_manager(&self, cause: &str);
}

/// Definitive connection failures
///
/// These complete quickly with an answer; a connection that never answers
/// is a timeout, not a `ConnectError`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Nothing is listening at the address
    #[error("no task executor at {address}")]
    Unreachable { address: String },

    /// Endpoint answered but refused the connection
    #[error("connection to {address} refused: {reason}")]
    Refused { address: String, reason: String },
}

/// Establishes callback connections to task executors
#[async_trait]
pub trait TaskExecutorConnector: Send + Sync + std::fmt::Debug {
    async fn connect(
        &self,
        address: &TaskExecutorAddress,
    ) -> Result<Arc<dyn TaskExecutorGateway>, ConnectError>;
}

// =============================================================================
// In-memory RPC service
// =============================================================================

/// Address table of in-process gateways with an injectable connection delay
#[derive(Debug, Default)]
pub struct MemoryRpcService {
    gateways: RwLock<HashMap<TaskExecutorAddress, Arc<dyn TaskExecutorGateway>>>,
    /// Delay applied to every connection attempt started after it was set
    connection_delay_ms: AtomicU64,
}

impl MemoryRpcService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `gateway` reachable at its own address
    pub async fn register_gateway(&self, gateway: Arc<dyn TaskExecutorGateway>) {
        let address = gateway.address().clone();
        self.gateways.write().await.insert(address, gateway);
    }

    pub async fn unregister_gateway(&self, address: &TaskExecutorAddress) -> bool {
        self.gateways.write().await.remove(address).is_some()
    }

    pub fn set_connection_delay_ms(&self, delay_ms: u64) {
        self.connection_delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn connection_delay_ms(&self) -> u64 {
        self.connection_delay_ms.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutorConnector for MemoryRpcService {
    async fn connect(
        &self,
        address: &TaskExecutorAddress,
    ) -> Result<Arc<dyn TaskExecutorGateway>, ConnectError> {
        let delay_ms = self.connection_delay_ms();
        if delay_ms > 0 {
            debug!(%address, delay_ms, "delaying connection");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        self.gateways
            .read()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| ConnectError::Unreachable {
                address: address.to_string(),
            })
    }
}

// =============================================================================
// Testing gateway
// =============================================================================

/// Scriptable in-process task executor
#[derive(Debug)]
pub struct TestingTaskExecutorGateway {
    address: TaskExecutorAddress,
    responsive: AtomicBool,
    hanging: AtomicBool,
    heartbeats_received: AtomicU64,
    last_manager_id: Mutex<Option<ResourceManagerId>>,
    disconnect_causes: Mutex<Vec<String>>,
}

impl TestingTaskExecutorGateway {
    pub fn new(address: TaskExecutorAddress) -> Self {
        Self {
            address,
            responsive: AtomicBool::new(true),
            hanging: AtomicBool::new(false),
            heartbeats_received: AtomicU64::new(0),
            last_manager_id: Mutex::new(None),
            disconnect_causes: Mutex::new(Vec::new()),
        }
    }

    /// Stop (or resume) answering heartbeat probes
    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    /// Leave heartbeats from the resource manager unanswered forever
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn heartbeats_received(&self) -> u64 {
        self.heartbeats_received.load(Ordering::SeqCst)
    }

    pub async fn last_manager_id(&self) -> Option<ResourceManagerId> {
        self.last_manager_id.lock().await.clone()
    }

    /// Causes passed to `disconnect_resource_manager`, oldest first
    pub async fn disconnect_causes(&self) -> Vec<String> {
        self.disconnect_causes.lock().await.clone()
    }
}

#[async_trait]
impl TaskExecutorGateway for TestingTaskExecutorGateway {
    fn address(&self) -> &TaskExecutorAddress {
        &self.address
    }

    async fn heartbeat_from_resource_manager(
        &self,
        manager_id: &ResourceManagerId,
    ) -> CoordinatorResult<()> {
        if self.hanging.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if !self.responsive.load(Ordering::SeqCst) {
            return Err(CoordinatorError::gateway(
                &self.address,
                "heartbeat not answered",
            ));
        }
        self.heartbeats_received.fetch_add(1, Ordering::SeqCst);
        *self.last_manager_id.lock().await = Some(manager_id.clone());
        Ok(())
    }

    async fn disconnect_resource_manager(&self, cause: &str) {
        self.disconnect_causes.lock().await.push(cause.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::io::StdRngProvider;

    fn address(name: &str) -> TaskExecutorAddress {
        TaskExecutorAddress::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_connect_registered_gateway() {
        let rpc = MemoryRpcService::new();
        let gateway = Arc::new(TestingTaskExecutorGateway::new(address("/taskExecutor1")));
        rpc.register_gateway(gateway).await;

        let connected = rpc.connect(&address("/taskExecutor1")).await.unwrap();
        assert_eq!(connected.address(), &address("/taskExecutor1"));
    }

    #[tokio::test]
    async fn test_connect_unknown_address() {
        let rpc = MemoryRpcService::new();
        let err = rpc.connect(&address("/taskExecutor2")).await.unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_delay() {
        let rpc = MemoryRpcService::new();
        let gateway = Arc::new(TestingTaskExecutorGateway::new(address("/taskExecutor1")));
        rpc.register_gateway(gateway).await;
        rpc.set_connection_delay_ms(1_000);

        let quick = tokio::time::timeout(
            Duration::from_millis(500),
            rpc.connect(&address("/taskExecutor1")),
        )
        .await;
        assert!(quick.is_err());

        let patient = tokio::time::timeout(
            Duration::from_millis(1_500),
            rpc.connect(&address("/taskExecutor1")),
        )
        .await;
        assert!(patient.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unregister_gateway() {
        let rpc = MemoryRpcService::new();
        let gateway = Arc::new(TestingTaskExecutorGateway::new(address("/taskExecutor1")));
        rpc.register_gateway(gateway).await;

        assert!(rpc.unregister_gateway(&address("/taskExecutor1")).await);
        assert!(rpc.connect(&address("/taskExecutor1")).await.is_err());
    }

    #[tokio::test]
    async fn test_testing_gateway_heartbeats() {
        let rng = StdRngProvider::with_seed(1);
        let manager_id = ResourceManagerId::generate(&rng);
        let gateway = TestingTaskExecutorGateway::new(address("/taskExecutor1"));

        gateway
            .heartbeat_from_resource_manager(&manager_id)
            .await
            .unwrap();
        assert_eq!(gateway.heartbeats_received(), 1);
        assert_eq!(gateway.last_manager_id().await, Some(manager_id.clone()));

        gateway.set_responsive(false);
        let err = gateway
            .heartbeat_from_resource_manager(&manager_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Gateway { .. }));
        assert_eq!(gateway.heartbeats_received(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_testing_gateway_hangs() {
        let rng = StdRngProvider::with_seed(2);
        let manager_id = ResourceManagerId::generate(&rng);
        let gateway = TestingTaskExecutorGateway::new(address("/taskExecutor1"));
        gateway.set_hanging(true);

        let answer = tokio::time::timeout(
            Duration::from_secs(60),
            gateway.heartbeat_from_resource_manager(&manager_id),
        )
        .await;
        assert!(answer.is_err());
        assert_eq!(gateway.heartbeats_received(), 0);
    }

    #[tokio::test]
    async fn test_testing_gateway_records_disconnects() {
        let gateway = TestingTaskExecutorGateway::new(address("/taskExecutor1"));
        gateway.disconnect_resource_manager("first").await;
        gateway.disconnect_resource_manager("second").await;
        assert_eq!(gateway.disconnect_causes().await, vec!["first", "second"]);
    }
}
