//! Domain Layer
//!
//! Value objects, collaborator ports and domain events for the
//! distribution engine.
//!
//! # Architecture
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for connectors, the codec,
//!   the metadata store and event publishing
//! - **Events** (`events.rs`) - Domain events for audit and decoupling
//!
//! # Usage
//!
//! ```ignore
//! use cloudraid::domain::ports::{MetadataStore, StorageConnector};
//!
//! async fn is_ready<M: MetadataStore>(store: &M, id: FileId) -> Result<bool> {
//!     Ok(store
//!         .file_by_id(id)
//!         .await?
//!         .map(|r| r.status == FileStatus::Ready)
//!         .unwrap_or(false))
//! }
//! ```

pub mod events;
pub mod ports;

// Re-export commonly used types
pub use events::DomainEvent;
pub use ports::{
    ContentHash, ErasureCodec, EventPublisher, FileId, FileRecord, FileStatus, MetadataStore,
    ShardHead, ShardIndex, StorageConnector, UserId, MIN_SHARDS, SHARD_COUNT,
};
