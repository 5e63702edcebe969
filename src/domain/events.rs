//! Domain Events
//!
//! Immutable records of things that happened to a file or to the intake
//! pipeline. The state machine publishes one `FileStatusChanged` per
//! persisted transition, which gives an audit trail independent of the
//! metadata store.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::status_changed(id, "docs/a.txt", None, FileStatus::Uploading);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ports::{FileId, FileStatus};

/// Domain event representing a significant occurrence in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // =========================================================================
    // File Lifecycle Events
    // =========================================================================
    /// A record's persisted status changed.
    FileStatusChanged {
        file_id: u64,
        path: String,
        from: Option<FileStatus>,
        to: FileStatus,
        timestamp: DateTime<Utc>,
    },

    /// All three shards were stored and the record is READY.
    DistributionCompleted {
        file_id: u64,
        content_hash: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A distribution job stopped before READY.
    DistributionFailed {
        file_id: u64,
        status: FileStatus,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A file was reassembled for a reader.
    FileRetrieved {
        file_id: u64,
        shards_available: usize,
        timestamp: DateTime<Utc>,
    },

    /// A file and its shards were removed.
    FileDeleted {
        file_id: u64,
        content_hash: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Intake Events
    // =========================================================================
    /// A worker dispatched a queued change.
    IntakeDispatched {
        path: String,
        action: String,
        worker: String,
        timestamp: DateTime<Utc>,
    },

    /// A worker dropped a change because another worker held the path.
    PathLockContended {
        path: String,
        worker: String,
        timestamp: DateTime<Utc>,
    },

    /// A local file disappeared and its remote copy should be deleted.
    DeletionRequested {
        path: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::FileStatusChanged { .. } => "FileStatusChanged",
            DomainEvent::DistributionCompleted { .. } => "DistributionCompleted",
            DomainEvent::DistributionFailed { .. } => "DistributionFailed",
            DomainEvent::FileRetrieved { .. } => "FileRetrieved",
            DomainEvent::FileDeleted { .. } => "FileDeleted",
            DomainEvent::IntakeDispatched { .. } => "IntakeDispatched",
            DomainEvent::PathLockContended { .. } => "PathLockContended",
            DomainEvent::DeletionRequested { .. } => "DeletionRequested",
        }
    }

    /// Get the event timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::FileStatusChanged { timestamp, .. }
            | DomainEvent::DistributionCompleted { timestamp, .. }
            | DomainEvent::DistributionFailed { timestamp, .. }
            | DomainEvent::FileRetrieved { timestamp, .. }
            | DomainEvent::FileDeleted { timestamp, .. }
            | DomainEvent::IntakeDispatched { timestamp, .. }
            | DomainEvent::PathLockContended { timestamp, .. }
            | DomainEvent::DeletionRequested { timestamp, .. } => *timestamp,
        }
    }

    /// The file id this event refers to, if any.
    pub fn file_id(&self) -> Option<FileId> {
        match self {
            DomainEvent::FileStatusChanged { file_id, .. }
            | DomainEvent::DistributionCompleted { file_id, .. }
            | DomainEvent::DistributionFailed { file_id, .. }
            | DomainEvent::FileRetrieved { file_id, .. }
            | DomainEvent::FileDeleted { file_id, .. } => Some(FileId(*file_id)),
            _ => None,
        }
    }

    // =========================================================================
    // Factory Methods
    // =========================================================================

    pub fn status_changed(
        file_id: FileId,
        path: impl Into<String>,
        from: Option<FileStatus>,
        to: FileStatus,
    ) -> Self {
        DomainEvent::FileStatusChanged {
            file_id: file_id.0,
            path: path.into(),
            from,
            to,
            timestamp: Utc::now(),
        }
    }

    pub fn distribution_completed(
        file_id: FileId,
        content_hash: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        DomainEvent::DistributionCompleted {
            file_id: file_id.0,
            content_hash: content_hash.into(),
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn distribution_failed(
        file_id: FileId,
        status: FileStatus,
        reason: impl Into<String>,
    ) -> Self {
        DomainEvent::DistributionFailed {
            file_id: file_id.0,
            status,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn file_retrieved(file_id: FileId, shards_available: usize) -> Self {
        DomainEvent::FileRetrieved {
            file_id: file_id.0,
            shards_available,
            timestamp: Utc::now(),
        }
    }

    pub fn file_deleted(file_id: FileId, content_hash: impl Into<String>) -> Self {
        DomainEvent::FileDeleted {
            file_id: file_id.0,
            content_hash: content_hash.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn intake_dispatched(
        path: impl Into<String>,
        action: impl Into<String>,
        worker: impl Into<String>,
    ) -> Self {
        DomainEvent::IntakeDispatched {
            path: path.into(),
            action: action.into(),
            worker: worker.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn path_lock_contended(path: impl Into<String>, worker: impl Into<String>) -> Self {
        DomainEvent::PathLockContended {
            path: path.into(),
            worker: worker.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn deletion_requested(path: impl Into<String>) -> Self {
        DomainEvent::DeletionRequested {
            path: path.into(),
            timestamp: Utc::now(),
        }
    }
}
