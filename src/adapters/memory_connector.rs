//! In-Memory Storage Connector
//!
//! DashMap-backed virtual disk with failure injection and operation
//! counters. Shards are read from the split staging directory on upload,
//! exactly like a remote backend would.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::domain::ports::{ContentHash, ShardHead, ShardIndex, StorageConnector};

/// Injectable failure switches.
#[derive(Debug, Default)]
struct Faults {
    connect: AtomicBool,
    upload: AtomicBool,
    update: AtomicBool,
    delete: AtomicBool,
    get: AtomicBool,
}

/// In-memory connector for tests and demos.
#[derive(Debug)]
pub struct InMemoryConnector {
    index: ShardIndex,
    name: String,
    staging: PathBuf,
    /// object name -> (data, stored at)
    objects: DashMap<String, (Bytes, DateTime<Utc>)>,
    faults: Faults,
    uploads: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    gets: AtomicU64,
}

impl InMemoryConnector {
    /// Create a connector for `index` reading shards from `staging`.
    pub fn new(index: ShardIndex, staging: impl Into<PathBuf>) -> Self {
        Self {
            index,
            name: format!("memory-{}", index),
            staging: staging.into(),
            objects: DashMap::new(),
            faults: Faults::default(),
            uploads: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            gets: AtomicU64::new(0),
        }
    }

    pub fn fail_connect(&self, fail: bool) {
        self.faults.connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.faults.upload.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.faults.update.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.faults.delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.faults.get.store(fail, Ordering::SeqCst);
    }

    /// Whether this connector currently holds its shard for `id`.
    pub fn holds_shard(&self, id: &ContentHash) -> bool {
        self.objects.contains_key(&id.shard_file_name(self.index))
    }

    /// Drop the shard for `id` behind the engine's back.
    pub fn lose_shard(&self, id: &ContentHash) {
        self.objects.remove(&id.shard_file_name(self.index));
    }

    /// Number of stored objects, metadata shards included.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    async fn store(&self, id: &ContentHash) -> bool {
        for name in [id.shard_file_name(self.index), id.metadata_file_name()] {
            match tokio::fs::read(self.staging.join(&name)).await {
                Ok(data) => {
                    self.objects.insert(name, (Bytes::from(data), Utc::now()));
                }
                Err(e) => {
                    warn!(connector = %self.name, "Reading staged {} failed: {}", name, e);
                    return false;
                }
            }
        }
        true
    }
}

#[async_trait]
impl StorageConnector for InMemoryConnector {
    fn shard_index(&self) -> ShardIndex {
        self.index
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> bool {
        !self.faults.connect.load(Ordering::SeqCst)
    }

    async fn upload(&self, id: &ContentHash) -> bool {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        if self.faults.upload.load(Ordering::SeqCst) {
            warn!(connector = %self.name, hash = %id, "Injected upload failure");
            return false;
        }
        self.store(id).await
    }

    async fn update(&self, id: &ContentHash) -> bool {
        self.updates.fetch_add(1, Ordering::Relaxed);
        if self.faults.update.load(Ordering::SeqCst) {
            warn!(connector = %self.name, hash = %id, "Injected update failure");
            return false;
        }
        if self.holds_shard(id) {
            debug!(connector = %self.name, hash = %id, "Replacing shard");
        }
        self.store(id).await
    }

    async fn delete(&self, id: &ContentHash) -> bool {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        if self.faults.delete.load(Ordering::SeqCst) {
            warn!(connector = %self.name, hash = %id, "Injected delete failure");
            return false;
        }
        self.objects.remove(&id.shard_file_name(self.index));
        self.objects.remove(&id.metadata_file_name());
        true
    }

    async fn get(&self, id: &ContentHash) -> Option<Bytes> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if self.faults.get.load(Ordering::SeqCst) {
            return None;
        }
        self.objects
            .get(&id.shard_file_name(self.index))
            .map(|entry| entry.0.clone())
    }

    async fn get_metadata(&self, id: &ContentHash, expected_size: usize) -> Option<Bytes> {
        if self.faults.get.load(Ordering::SeqCst) {
            return None;
        }
        self.objects
            .get(&id.metadata_file_name())
            .map(|entry| entry.0.clone())
            .filter(|data| data.len() == expected_size)
    }

    async fn head(&self, id: &ContentHash) -> Option<ShardHead> {
        self.objects
            .get(&id.shard_file_name(self.index))
            .map(|entry| ShardHead {
                size_bytes: entry.0.len() as u64,
                modified: Some(entry.1),
            })
    }

    async fn options(&self, id: &ContentHash) -> Vec<String> {
        let ops: &[&str] = if self.holds_shard(id) {
            &["GET", "HEAD", "PUT", "DELETE", "OPTIONS"]
        } else {
            &["PUT", "OPTIONS"]
        };
        ops.iter().map(|s| s.to_string()).collect()
    }
}
