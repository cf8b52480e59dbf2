#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **grain-kv** – Byte-keyed snapshot store for Grain.
//!
//! The read-model projector caches `(state, watermark)` snapshots under a
//! per-projection key. The contract it needs is deliberately small: `get`
//! and `put` with per-key read-your-writes, no atomicity across keys. Two
//! drivers are provided: an in-memory map for tests and development, and a
//! sled-backed embedded B-tree for deployments that want snapshots to
//! survive a restart.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tokio::sync::RwLock;
use tracing::debug;

use grain_types::Anomaly;

//─────────────────────────────
//  Contract
//─────────────────────────────

/// A byte-keyed, byte-valued store.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Anomaly>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), Anomaly>;
}

//─────────────────────────────
//  Configuration
//─────────────────────────────

/// Configuration for the on-disk driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvConfig {
    /// Directory the database lives in.
    pub storage_dir: PathBuf,
    /// Database name within `storage_dir`.
    pub db_name: String,
}

//─────────────────────────────
//  In-memory driver
//─────────────────────────────

/// Non-persistent map-backed driver. All data is lost when the process
/// terminates.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove the value under `key`. Testing helper.
    pub async fn remove(&self, key: &[u8]) {
        self.entries.write().await.remove(key);
    }
}

#[async_trait]
impl SnapshotStore for MemoryKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Anomaly> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), Anomaly> {
        self.entries.write().await.insert(key.to_vec(), value);
        Ok(())
    }
}

//─────────────────────────────
//  Sled driver
//─────────────────────────────

/// Persistent driver backed by the sled embedded database.
///
/// Keeps one tree for snapshot entries. Writes go through sled's pagecache;
/// call [`SledKv::flush`] when durability against power loss matters more
/// than latency.
#[derive(Debug)]
pub struct SledKv {
    _db: Db, // keeps the database open for the tree's lifetime
    tree: Tree,
}

impl SledKv {
    /// Open or create the database described by `config`.
    pub fn open(config: &KvConfig) -> Result<Self, Anomaly> {
        let path = config.storage_dir.join(&config.db_name);
        let db = sled::open(&path)
            .map_err(|e| Anomaly::fault(format!("failed to open snapshot store: {e}")))?;
        Self::from_db(db)
    }

    /// Create a driver from an existing sled instance.
    pub fn from_db(db: Db) -> Result<Self, Anomaly> {
        let tree = db
            .open_tree("snapshots")
            .map_err(|e| Anomaly::fault(format!("failed to open snapshot tree: {e}")))?;
        Ok(Self { _db: db, tree })
    }

    /// Open a temporary database that is discarded on drop. Testing helper.
    pub fn temporary() -> Result<Self, Anomaly> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| Anomaly::fault(format!("failed to open snapshot store: {e}")))?;
        Self::from_db(db)
    }

    /// Flush all pending writes to disk.
    pub async fn flush(&self) -> Result<(), Anomaly> {
        self.tree
            .flush_async()
            .await
            .map_err(|e| Anomaly::fault(format!("failed to flush snapshot store: {e}")))?;
        Ok(())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for SledKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Anomaly> {
        let value = self
            .tree
            .get(key)
            .map_err(|e| Anomaly::fault(format!("snapshot read failed: {e}")))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), Anomaly> {
        self.tree
            .insert(key, value)
            .map_err(|e| Anomaly::fault(format!("snapshot write failed: {e}")))?;
        debug!(key_len = key.len(), "snapshot stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_get_put_roundtrip() {
        let kv = MemoryKv::new();
        assert!(kv.get(b"missing").await.unwrap().is_none());

        kv.put(b"counters@v1", b"state".to_vec()).await.unwrap();
        assert_eq!(kv.get(b"counters@v1").await.unwrap().unwrap(), b"state");

        kv.put(b"counters@v1", b"newer".to_vec()).await.unwrap();
        assert_eq!(kv.get(b"counters@v1").await.unwrap().unwrap(), b"newer");
        assert_eq!(kv.len().await, 1);
    }

    #[tokio::test]
    async fn test_sled_get_put_roundtrip() {
        let kv = SledKv::temporary().unwrap();
        assert!(kv.get(b"missing").await.unwrap().is_none());

        kv.put(b"counters@v1", b"state".to_vec()).await.unwrap();
        assert_eq!(kv.get(b"counters@v1").await.unwrap().unwrap(), b"state");
    }

    #[tokio::test]
    async fn test_sled_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = KvConfig {
            storage_dir: dir.path().to_path_buf(),
            db_name: "snapshots.db".to_string(),
        };

        {
            let kv = SledKv::open(&config).unwrap();
            kv.put(b"k", b"v".to_vec()).await.unwrap();
            kv.flush().await.unwrap();
        }

        {
            let kv = SledKv::open(&config).unwrap();
            assert_eq!(kv.get(b"k").await.unwrap().unwrap(), b"v");
        }
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let kv = MemoryKv::new();
        kv.put(b"a", vec![1]).await.unwrap();
        kv.put(b"b", vec![2]).await.unwrap();
        kv.remove(b"a").await;
        assert!(kv.get(b"a").await.unwrap().is_none());
        assert_eq!(kv.get(b"b").await.unwrap().unwrap(), vec![2]);
    }
}
