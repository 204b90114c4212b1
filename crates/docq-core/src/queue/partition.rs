//! Per-partition lock registry.
//!
//! Batch dequeue reads candidates and then leases them in a second store call.
//! Two batch calls for the same partition in one process would read the same
//! candidates and lease them twice, so they take the partition's lock first.
//! The lock does nothing across processes; there, only the store's
//! per-document atomicity applies.
//!
//! Locks are created on first use and never removed. The registry is owned by a
//! queue instance; share one `Arc<PartitionLocks>` between instances to get a
//! process-wide table.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Debug, Default)]
pub struct PartitionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held while a partition is locked. Dropping it releases the lock.
#[derive(Debug)]
pub struct PartitionGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl PartitionGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PartitionGuard {
    fn drop(&mut self) {
        trace!(partition = %self.key, "partition lock released");
    }
}

impl PartitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry key for a partition: the key itself, or "" for the unpartitioned lane.
    pub fn registry_key(partition_key: Option<&str>) -> String {
        partition_key.unwrap_or_default().to_string()
    }

    /// Wait for exclusive access to `partition_key`.
    pub async fn acquire(&self, partition_key: Option<&str>) -> PartitionGuard {
        let key = Self::registry_key(partition_key);
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        trace!(partition = %key, "partition lock acquired");
        PartitionGuard { key, _guard: guard }
    }

    /// Number of partitions that have ever been locked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
