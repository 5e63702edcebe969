//! CloudRAID - RAID5 distribution of files across three cloud backends
//!
//! Every stored file is split by a 2+1 erasure codec into three device
//! shards plus a small metadata shard. Each backend holds one device shard
//! and a copy of the metadata shard, so any one backend can be lost
//! without losing data.
//!
//! # Architecture
//!
//! ```text
//! DirectoryScanner → FileQueue → IntakeWorkers ─┐
//!                                               ▼
//!                  CloudRaidService → CoreAccessPool → CoreAccess
//!                                                        │
//!                          ┌─────────────┬───────────────┼──────────────┐
//!                          ▼             ▼               ▼              ▼
//!                    ErasureCodec  MetadataStore  StorageConnector x3  Events
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Implementations of the domain ports
//! - [`config`] - Settings file and typed configuration
//! - [`domain`] - Value objects, ports and domain events
//! - [`ec`] - RAID5 stripe codec and shard manifest
//! - [`engine`] - File distribution state machine and access pool
//! - [`error`] - Error types
//! - [`intake`] - Filesystem change intake
//! - [`metrics`] - Prometheus metrics

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ec;
pub mod engine;
pub mod error;
pub mod intake;
pub mod metrics;

// Re-export commonly used types
pub use config::{CoreConfig, IntakeConfig, Settings};
pub use engine::{CloudRaidService, JobOutcome};
pub use error::{Error, Result};
pub use metrics::CoreMetrics;
