//! Authoritative table of registered workers
//!
//! TigerStyle: One record per identity, writes serialized per shard.
//!
//! The table is split into a power-of-two number of shards, each behind its
//! own `tokio::sync::RwLock`. A worker identity always maps to the same
//! shard, so every write for one identity is serialized by that shard's lock
//! while writes for identities on other shards proceed independently. No
//! reader can observe a half-written record.

use crate::error::{RegistryError, RegistryResult};
use crate::worker::{RegistrationId, RegistrationRecord, WorkerId};
use corral_core::constants::{
    REGISTRY_SHARDS_COUNT_DEFAULT, REGISTRY_SHARDS_COUNT_MAX, WORKERS_REGISTERED_COUNT_MAX,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::debug;

type Shard = HashMap<WorkerId, RegistrationRecord>;

/// Read guard pinning the current record of one worker
///
/// While held, no write to the worker's shard can happen, so the record
/// cannot be replaced or removed underneath the holder.
pub struct CurrentRegistration {
    guard: OwnedRwLockReadGuard<Shard, RegistrationRecord>,
}

impl Deref for CurrentRegistration {
    type Target = RegistrationRecord;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl std::fmt::Debug for CurrentRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CurrentRegistration")
            .field(&*self.guard)
            .finish()
    }
}

/// Sharded in-memory worker registry
#[derive(Debug)]
pub struct WorkerRegistry {
    shards: Vec<Arc<RwLock<Shard>>>,
    /// Number of records across all shards
    count: AtomicUsize,
    /// Maximum number of records
    capacity: usize,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(REGISTRY_SHARDS_COUNT_DEFAULT)
    }
}

impl WorkerRegistry {
    /// Create a registry with `shard_count` shards
    ///
    /// `shard_count` is rounded up to a power of two and clamped to
    /// `1..=REGISTRY_SHARDS_COUNT_MAX`.
    pub fn new(shard_count: usize) -> Self {
        Self::with_capacity(shard_count, WORKERS_REGISTERED_COUNT_MAX)
    }

    /// Create a registry holding at most `capacity` workers
    pub fn with_capacity(shard_count: usize, capacity: usize) -> Self {
        let shard_count = shard_count
            .clamp(1, REGISTRY_SHARDS_COUNT_MAX)
            .next_power_of_two();
        debug_assert!(shard_count.is_power_of_two());
        assert!(capacity > 0, "registry capacity must be positive");

        Self {
            shards: (0..shard_count)
                .map(|_| Arc::new(RwLock::new(HashMap::new())))
                .collect(),
            count: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, worker_id: &WorkerId) -> &Arc<RwLock<Shard>> {
        let mut hasher = DefaultHasher::new();
        worker_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) & (self.shards.len() - 1);
        &self.shards[index]
    }

    /// Insert `record`, replacing any record for the same worker
    ///
    /// Returns the replaced record. The replacement is unconditional: the
    /// most recent committed registration for an identity always wins.
    pub async fn upsert(
        &self,
        record: RegistrationRecord,
    ) -> RegistryResult<Option<RegistrationRecord>> {
        let mut shard = self.shard(&record.worker_id).write().await;

        if !shard.contains_key(&record.worker_id) {
            // Reserve a slot atomically; inserts on other shards race here
            self.count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                    (count < self.capacity).then_some(count + 1)
                })
                .map_err(|count| RegistryError::RegistryFull {
                    count,
                    limit: self.capacity,
                })?;
        }

        debug!(
            worker_id = %record.worker_id,
            registration_id = %record.registration_id,
            "registry upsert"
        );
        Ok(shard.insert(record.worker_id.clone(), record))
    }

    /// Snapshot of the current record for `worker_id`
    pub async fn get(&self, worker_id: &WorkerId) -> Option<RegistrationRecord> {
        self.shard(worker_id).read().await.get(worker_id).cloned()
    }

    /// Pin the current record if it carries `registration_id`
    ///
    /// Returns `None` when the worker is unknown or its current registration
    /// is a different one.
    pub async fn current(
        &self,
        worker_id: &WorkerId,
        registration_id: &RegistrationId,
    ) -> Option<CurrentRegistration> {
        let guard = self.shard(worker_id).clone().read_owned().await;
        OwnedRwLockReadGuard::try_map(guard, |shard| {
            shard
                .get(worker_id)
                .filter(|record| record.is_registration(registration_id))
        })
        .ok()
        .map(|guard| CurrentRegistration { guard })
    }

    /// Remove the record for `worker_id` only if it is still `registration_id`
    pub async fn remove_if_current(
        &self,
        worker_id: &WorkerId,
        registration_id: &RegistrationId,
    ) -> Option<RegistrationRecord> {
        let mut shard = self.shard(worker_id).write().await;
        let matches = shard
            .get(worker_id)
            .is_some_and(|record| record.is_registration(registration_id));
        if !matches {
            return None;
        }
        let removed = shard.remove(worker_id);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    /// Remove whatever record exists for `worker_id`
    pub async fn remove(&self, worker_id: &WorkerId) -> Option<RegistrationRecord> {
        let mut shard = self.shard(worker_id).write().await;
        let removed = shard.remove(worker_id);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    /// Advance `last_heartbeat_ms` of the matching registration
    ///
    /// Timestamps never move backwards. Returns false if the registration is
    /// no longer current.
    pub async fn record_heartbeat(
        &self,
        worker_id: &WorkerId,
        registration_id: &RegistrationId,
        now_ms: u64,
    ) -> bool {
        let mut shard = self.shard(worker_id).write().await;
        match shard.get_mut(worker_id) {
            Some(record) if record.is_registration(registration_id) => {
                record.last_heartbeat_ms = record.last_heartbeat_ms.max(now_ms);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of all records
    pub async fn list(&self) -> Vec<RegistrationRecord> {
        let mut records = Vec::with_capacity(self.len());
        for shard in &self.shards {
            records.extend(shard.read().await.values().cloned());
        }
        records
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record, returning what was removed
    pub async fn clear(&self) -> Vec<RegistrationRecord> {
        let mut removed = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.write().await;
            self.count.fetch_sub(shard.len(), Ordering::SeqCst);
            removed.extend(shard.drain().map(|(_, record)| record));
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{HardwareDescription, TaskExecutorAddress};
    use corral_core::io::StdRngProvider;
    use std::time::Duration;

    fn worker(n: u32) -> WorkerId {
        WorkerId::new(format!("worker-{}", n)).unwrap()
    }

    fn record(worker_id: WorkerId, rng: &StdRngProvider) -> RegistrationRecord {
        RegistrationRecord::new(
            worker_id,
            RegistrationId::generate(rng),
            TaskExecutorAddress::parse("/taskExecutor1").unwrap(),
            1234,
            HardwareDescription::new(1, 2, 3, 4),
            1_000,
        )
    }

    #[test]
    fn test_shard_count_rounded() {
        assert_eq!(WorkerRegistry::new(10).shard_count(), 16);
        assert_eq!(WorkerRegistry::new(0).shard_count(), 1);
        assert_eq!(
            WorkerRegistry::new(usize::MAX).shard_count(),
            REGISTRY_SHARDS_COUNT_MAX
        );
    }

    #[tokio::test]
    async fn test_upsert_replaces_previous() {
        let rng = StdRngProvider::with_seed(1);
        let registry = WorkerRegistry::default();

        let first = record(worker(1), &rng);
        let second = record(worker(1), &rng);

        assert!(registry.upsert(first.clone()).await.unwrap().is_none());
        let replaced = registry.upsert(second.clone()).await.unwrap();

        assert_eq!(replaced, Some(first));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&worker(1)).await, Some(second));
    }

    #[tokio::test]
    async fn test_current_rejects_superseded_id() {
        let rng = StdRngProvider::with_seed(2);
        let registry = WorkerRegistry::default();

        let old = record(worker(1), &rng);
        let new = record(worker(1), &rng);
        registry.upsert(old.clone()).await.unwrap();
        registry.upsert(new.clone()).await.unwrap();

        assert!(registry
            .current(&worker(1), &old.registration_id)
            .await
            .is_none());
        let pinned = registry
            .current(&worker(1), &new.registration_id)
            .await
            .unwrap();
        assert_eq!(pinned.registration_id, new.registration_id);
    }

    #[tokio::test]
    async fn test_current_guard_blocks_writers() {
        let rng = StdRngProvider::with_seed(3);
        let registry = Arc::new(WorkerRegistry::new(1));
        let rec = record(worker(1), &rng);
        registry.upsert(rec.clone()).await.unwrap();

        let pinned = registry
            .current(&worker(1), &rec.registration_id)
            .await
            .unwrap();

        let writer = {
            let registry = registry.clone();
            let replacement = record(worker(1), &rng);
            tokio::spawn(async move { registry.upsert(replacement).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished(), "write must wait for the pin");

        drop(pinned);
        let replaced = writer.await.unwrap().unwrap();
        assert_eq!(replaced.map(|r| r.registration_id), Some(rec.registration_id));
    }

    #[tokio::test]
    async fn test_remove_if_current() {
        let rng = StdRngProvider::with_seed(4);
        let registry = WorkerRegistry::default();

        let old = record(worker(1), &rng);
        let new = record(worker(1), &rng);
        registry.upsert(old.clone()).await.unwrap();
        registry.upsert(new.clone()).await.unwrap();

        assert!(registry
            .remove_if_current(&worker(1), &old.registration_id)
            .await
            .is_none());
        assert_eq!(registry.len(), 1);

        let removed = registry
            .remove_if_current(&worker(1), &new.registration_id)
            .await;
        assert_eq!(removed, Some(new));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_record_heartbeat_monotonic() {
        let rng = StdRngProvider::with_seed(5);
        let registry = WorkerRegistry::default();
        let rec = record(worker(1), &rng);
        registry.upsert(rec.clone()).await.unwrap();

        assert!(
            registry
                .record_heartbeat(&worker(1), &rec.registration_id, 5_000)
                .await
        );
        assert!(
            registry
                .record_heartbeat(&worker(1), &rec.registration_id, 4_000)
                .await
        );
        assert_eq!(
            registry.get(&worker(1)).await.unwrap().last_heartbeat_ms,
            5_000
        );

        let stale = RegistrationId::generate(&rng);
        assert!(!registry.record_heartbeat(&worker(1), &stale, 9_000).await);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let rng = StdRngProvider::with_seed(6);
        let registry = WorkerRegistry::with_capacity(4, 2);

        registry.upsert(record(worker(1), &rng)).await.unwrap();
        registry.upsert(record(worker(2), &rng)).await.unwrap();
        // replacing an existing identity does not count against the limit
        registry.upsert(record(worker(2), &rng)).await.unwrap();

        let err = registry.upsert(record(worker(3), &rng)).await.unwrap_err();
        assert!(matches!(err, RegistryError::RegistryFull { limit: 2, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_limit_holds_across_shards() {
        let rng = StdRngProvider::with_seed(9);
        let registry = Arc::new(WorkerRegistry::with_capacity(16, 4));

        let mut handles = Vec::new();
        for i in 0..64 {
            let registry = registry.clone();
            let rec = record(worker(i), &rng);
            handles.push(tokio::spawn(async move { registry.upsert(rec).await }));
        }

        let mut admitted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(e) => assert!(matches!(e, RegistryError::RegistryFull { limit: 4, .. })),
            }
        }

        assert_eq!(admitted, 4);
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.list().await.len(), 4);
    }

    #[tokio::test]
    async fn test_clear_returns_everything() {
        let rng = StdRngProvider::with_seed(7);
        let registry = WorkerRegistry::new(4);
        for i in 0..10 {
            registry.upsert(record(worker(i), &rng)).await.unwrap();
        }
        assert_eq!(registry.list().await.len(), 10);

        let removed = registry.clear().await;
        assert_eq!(removed.len(), 10);
        assert!(registry.is_empty());
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_leave_one_record() {
        let registry = Arc::new(WorkerRegistry::new(4));
        let rng = Arc::new(StdRngProvider::with_seed(8));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            let rec = record(worker(1), &rng);
            handles.push(tokio::spawn(async move {
                registry.upsert(rec.clone()).await.unwrap();
                rec.registration_id
            }));
        }

        let mut issued = Vec::new();
        for handle in handles {
            issued.push(handle.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        let winner = registry.get(&worker(1)).await.unwrap();
        assert!(issued.contains(&winner.registration_id));
    }
}
