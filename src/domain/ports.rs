//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! This module defines the collaborators the distribution engine depends on.
//! Infrastructure adapters implement these traits to provide concrete
//! backends, codecs and metadata stores.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │ StorageConnector │ ErasureCodec │ MetadataStore     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │ LocalDirConnector │ Raid5Codec │ InMemoryMetadata   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of redundant backends ("virtual disks") in the array.
pub const SHARD_COUNT: usize = 3;

/// Minimum number of shards needed to rebuild a file.
pub const MIN_SHARDS: usize = 2;

/// Extension of the metadata side-channel shard.
pub const METADATA_EXTENSION: &str = "m";

// =============================================================================
// Value Objects
// =============================================================================

/// File identifier assigned by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owning user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned to a successfully split file. Shards are stored
/// remotely under this key, so it must be unique per stored file; equal
/// content under two paths gets two keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the data/parity shard for one device: `{hash}.{index}`.
    pub fn shard_file_name(&self, index: ShardIndex) -> String {
        format!("{}.{}", self.0, index)
    }

    /// File name of the metadata shard: `{hash}.m`.
    pub fn metadata_file_name(&self) -> String {
        format!("{}.{}", self.0, METADATA_EXTENSION)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContentHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Shard position of a connector in the array (0, 1 or 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardIndex(u8);

impl ShardIndex {
    /// Create a shard index, rejecting anything outside `0..SHARD_COUNT`.
    pub fn new(index: usize) -> Result<Self> {
        if index >= SHARD_COUNT {
            return Err(Error::Config(format!(
                "shard index {} out of range 0..{}",
                index, SHARD_COUNT
            )));
        }
        Ok(Self(index as u8))
    }

    pub fn get(&self) -> usize {
        self.0 as usize
    }

    /// All shard indices in array order.
    pub fn all() -> [ShardIndex; SHARD_COUNT] {
        [ShardIndex(0), ShardIndex(1), ShardIndex(2)]
    }
}

impl std::fmt::Display for ShardIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted status of a file record.
///
/// Variants are declared in lifecycle order so that `status >= Splitted`
/// means "a content hash has been assigned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Uploading,
    Uploaded,
    Splitting,
    Splitted,
    Distributing,
    Distributed,
    Ready,
    Deleting,
    Deleted,
}

impl FileStatus {
    /// Whether this status belongs to the delete path.
    pub fn is_deletion(&self) -> bool {
        matches!(self, FileStatus::Deleting | FileStatus::Deleted)
    }

    /// Whether a record in this status carries a content hash.
    pub fn has_content_hash(&self) -> bool {
        *self >= FileStatus::Splitted
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileStatus::Uploading => "UPLOADING",
            FileStatus::Uploaded => "UPLOADED",
            FileStatus::Splitting => "SPLITTING",
            FileStatus::Splitted => "SPLITTED",
            FileStatus::Distributing => "DISTRIBUTING",
            FileStatus::Distributed => "DISTRIBUTED",
            FileStatus::Ready => "READY",
            FileStatus::Deleting => "DELETING",
            FileStatus::Deleted => "DELETED",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for FileStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UPLOADING" => Ok(FileStatus::Uploading),
            "UPLOADED" => Ok(FileStatus::Uploaded),
            "SPLITTING" => Ok(FileStatus::Splitting),
            "SPLITTED" => Ok(FileStatus::Splitted),
            "DISTRIBUTING" => Ok(FileStatus::Distributing),
            "DISTRIBUTED" => Ok(FileStatus::Distributed),
            "READY" => Ok(FileStatus::Ready),
            "DELETING" => Ok(FileStatus::Deleting),
            "DELETED" => Ok(FileStatus::Deleted),
            other => Err(Error::DataAccess(format!("unknown file status {}", other))),
        }
    }
}

/// One logical file owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    /// User-visible logical path, unique per owner
    pub path: String,
    /// Set once the file has been split
    pub content_hash: Option<ContentHash>,
    pub last_modified: DateTime<Utc>,
    pub owner_id: UserId,
    pub status: FileStatus,
}

/// Remote object information returned by `head`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardHead {
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

// =============================================================================
// Storage Connector Port
// =============================================================================

/// One cloud-storage backend holding one shard index of every file.
///
/// Backend failures are reported through the boolean/optional results and
/// are never raised as errors; implementations log the cause themselves.
#[async_trait]
pub trait StorageConnector: Send + Sync {
    /// The shard index this connector was constructed for.
    fn shard_index(&self) -> ShardIndex;

    /// Human readable backend name for logs.
    fn name(&self) -> &str;

    /// Establish or refresh credentials. Idempotent.
    async fn connect(&self) -> bool;

    /// Upload the local shard (and metadata shard) for `id`.
    async fn upload(&self, id: &ContentHash) -> bool;

    /// Replace the remote shard (and metadata shard) for `id`.
    async fn update(&self, id: &ContentHash) -> bool;

    /// Remove the remote shard. An already absent object counts as success.
    async fn delete(&self, id: &ContentHash) -> bool;

    /// Fetch this connector's shard for `id`.
    async fn get(&self, id: &ContentHash) -> Option<Bytes>;

    /// Fetch the metadata shard. `None` if absent or not `expected_size` bytes.
    async fn get_metadata(&self, id: &ContentHash, expected_size: usize) -> Option<Bytes>;

    /// Remote object information for this connector's shard.
    async fn head(&self, id: &ContentHash) -> Option<ShardHead>;

    /// Operations the backend currently allows on the resource.
    async fn options(&self, id: &ContentHash) -> Vec<String>;
}

// =============================================================================
// Erasure Codec Port
// =============================================================================

/// Split/merge collaborator. Synchronous and potentially slow; callers run
/// it on a blocking thread.
pub trait ErasureCodec: Send + Sync {
    /// Split `input` into `{hash}.0`, `{hash}.1`, `{hash}.2` and `{hash}.m`
    /// inside `output_dir` and return the hash naming them. The hash depends
    /// on the input path, not only on its bytes, so every staged file owns
    /// its shards.
    fn split(&self, input: &Path, output_dir: &Path, passphrase: &str) -> Result<ContentHash>;

    /// Rebuild the original file from the shard files in `input_dir`.
    fn merge(
        &self,
        input_dir: &Path,
        hash: &ContentHash,
        output: &Path,
        passphrase: &str,
    ) -> Result<()>;

    /// Exact size in bytes of the metadata shard this codec writes.
    fn metadata_size(&self) -> usize;
}

// =============================================================================
// Metadata Store Port
// =============================================================================

/// Port for file record persistence.
///
/// All failures surface as [`Error::DataAccess`].
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn file_by_id(&self, id: FileId) -> Result<Option<FileRecord>>;

    /// Create a record in `UPLOADING` status and return its id.
    async fn file_new(
        &self,
        path: &str,
        hash: Option<&ContentHash>,
        last_modified: DateTime<Utc>,
        owner: UserId,
    ) -> Result<FileId>;

    async fn file_update(
        &self,
        id: FileId,
        path: &str,
        hash: &ContentHash,
        last_modified: DateTime<Utc>,
        owner: UserId,
    ) -> Result<()>;

    async fn file_update_state(&self, id: FileId, status: FileStatus) -> Result<()>;

    async fn file_delete(&self, id: FileId) -> Result<()>;

    async fn file_get(&self, path: &str, owner: UserId) -> Result<Option<FileRecord>>;

    async fn file_list(&self, owner: UserId) -> Result<Vec<FileRecord>>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

use super::events::DomainEvent;

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================
