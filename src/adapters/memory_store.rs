//! In-Memory Metadata Store
//!
//! Implements the `MetadataStore` port with a `parking_lot` guarded map.
//! Paths are unique per owner, ids come from a counter, and every status
//! change is kept in a per-record history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::ports::{ContentHash, FileId, FileRecord, FileStatus, MetadataStore, UserId};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<FileId, FileRecord>,
    history: HashMap<FileId, Vec<FileStatus>>,
}

/// Metadata store held in process memory.
#[derive(Debug)]
pub struct InMemoryMetadataStore {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
    available: AtomicBool,
    fail_deletes: AtomicBool,
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            fail_deletes: AtomicBool::new(false),
        }
    }
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going away; every call fails with a data-access error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make only `file_delete` fail with a data-access error.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Statuses a record has been in, oldest first.
    pub fn status_history(&self, id: FileId) -> Vec<FileStatus> {
        self.tables
            .read()
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.tables.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::DataAccess("metadata store unavailable".to_string()))
        }
    }

    fn path_taken(tables: &Tables, path: &str, owner: UserId, except: Option<FileId>) -> bool {
        tables
            .records
            .values()
            .any(|r| r.owner_id == owner && r.path == path && Some(r.id) != except)
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn file_by_id(&self, id: FileId) -> Result<Option<FileRecord>> {
        self.check_available()?;
        Ok(self.tables.read().records.get(&id).cloned())
    }

    async fn file_new(
        &self,
        path: &str,
        hash: Option<&ContentHash>,
        last_modified: DateTime<Utc>,
        owner: UserId,
    ) -> Result<FileId> {
        self.check_available()?;
        let mut tables = self.tables.write();
        if Self::path_taken(&tables, path, owner, None) {
            return Err(Error::DataAccess(format!(
                "path {} already exists for user {}",
                path, owner
            )));
        }

        let id = FileId(self.next_id.fetch_add(1, Ordering::SeqCst));
        tables.records.insert(
            id,
            FileRecord {
                id,
                path: path.to_string(),
                content_hash: hash.cloned(),
                last_modified,
                owner_id: owner,
                status: FileStatus::Uploading,
            },
        );
        tables.history.insert(id, vec![FileStatus::Uploading]);
        Ok(id)
    }

    async fn file_update(
        &self,
        id: FileId,
        path: &str,
        hash: &ContentHash,
        last_modified: DateTime<Utc>,
        owner: UserId,
    ) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write();
        if Self::path_taken(&tables, path, owner, Some(id)) {
            return Err(Error::DataAccess(format!(
                "path {} already exists for user {}",
                path, owner
            )));
        }

        let record = tables
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::DataAccess(format!("no record with id {}", id)))?;
        record.path = path.to_string();
        record.content_hash = Some(hash.clone());
        record.last_modified = last_modified;
        record.owner_id = owner;
        Ok(())
    }

    async fn file_update_state(&self, id: FileId, status: FileStatus) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write();
        let record = tables
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::DataAccess(format!("no record with id {}", id)))?;
        record.status = status;
        tables.history.entry(id).or_default().push(status);
        Ok(())
    }

    async fn file_delete(&self, id: FileId) -> Result<()> {
        self.check_available()?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::DataAccess(format!("record {} could not be removed", id)));
        }
        let mut tables = self.tables.write();
        if tables.records.remove(&id).is_none() {
            return Err(Error::DataAccess(format!("no record with id {}", id)));
        }
        Ok(())
    }

    async fn file_get(&self, path: &str, owner: UserId) -> Result<Option<FileRecord>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .records
            .values()
            .find(|r| r.owner_id == owner && r.path == path)
            .cloned())
    }

    async fn file_list(&self, owner: UserId) -> Result<Vec<FileRecord>> {
        self.check_available()?;
        let mut records: Vec<FileRecord> = self
            .tables
            .read()
            .records
            .values()
            .filter(|r| r.owner_id == owner)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}
