//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │ StorageConnector │ ErasureCodec │ MetadataStore │ Events   │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ LocalDirConnector │ InMemoryConnector │ Raid5Codec         │ │
//! │  │ InMemoryMetadataStore │ Logging/JsonLines event publishers │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cloudraid::adapters::{LocalDirConnector, Raid5Codec};
//! use cloudraid::domain::ports::{ErasureCodec, ShardIndex, StorageConnector};
//!
//! let codec = Raid5Codec::with_default_block_size()?;
//! let hash = codec.split(&input, &staging, "passphrase")?;
//!
//! let disk = LocalDirConnector::new(ShardIndex::new(0)?, "/mnt/disk0", &staging);
//! assert!(disk.upload(&hash).await);
//! ```

mod local_dir;
mod memory_connector;
mod memory_store;
mod raid5;

pub use local_dir::{local_dir_connectors, LocalDirConnector};
pub use memory_connector::InMemoryConnector;
pub use memory_store::InMemoryMetadataStore;
pub use raid5::Raid5Codec;

mod event_publisher;
pub use event_publisher::{
    CompositeEventPublisher, InMemoryEventCollector, JsonLinesEventPublisher, LoggingEventPublisher,
};
