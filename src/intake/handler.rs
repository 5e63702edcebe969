//! Intake Handlers
//!
//! What a worker does with a dequeued change once it holds the path lock.
//!
//! - [`ValidationHandler`] splits and merges the file in a scratch directory
//!   and throws the result away, checking the codec end to end.
//! - [`DistributionHandler`] routes the change into the distribution engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::events::DomainEvent;
use crate::domain::ports::{ErasureCodec, EventPublisher, FileRecord, FileStatus, UserId};
use crate::engine::CloudRaidService;
use crate::error::{Error, Result};
use crate::intake::queue::{FileAction, FileQueueEntry};

/// Dispatch target for intake workers.
#[async_trait]
pub trait IntakeHandler: Send + Sync {
    async fn handle(&self, entry: &FileQueueEntry) -> Result<()>;
}

// =============================================================================
// Validation Handler
// =============================================================================

/// Split, merge and clean up locally.
pub struct ValidationHandler {
    codec: Arc<dyn ErasureCodec>,
    scratch: PathBuf,
    passphrase: String,
    events: Arc<dyn EventPublisher>,
}

impl ValidationHandler {
    pub fn new(
        codec: Arc<dyn ErasureCodec>,
        scratch: impl Into<PathBuf>,
        passphrase: impl Into<String>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            codec,
            scratch: scratch.into(),
            passphrase: passphrase.into(),
            events,
        }
    }

    fn split_merge_cleanup(
        codec: &dyn ErasureCodec,
        file: &Path,
        scratch: &Path,
        passphrase: &str,
    ) -> Result<()> {
        std::fs::create_dir_all(scratch)?;
        let result = Self::split_merge(codec, file, scratch, passphrase);
        if let Err(e) = std::fs::remove_dir_all(scratch) {
            warn!("Removing scratch dir {} failed: {}", scratch.display(), e);
        }
        result
    }

    fn split_merge(
        codec: &dyn ErasureCodec,
        file: &Path,
        scratch: &Path,
        passphrase: &str,
    ) -> Result<()> {
        let hash = codec.split(file, scratch, passphrase)?;
        let name = file
            .file_name()
            .ok_or_else(|| Error::Internal(format!("{} has no file name", file.display())))?;
        codec.merge(scratch, &hash, &scratch.join(name), passphrase)?;
        debug!(file = %file.display(), hash = %hash, "Split and merge succeeded");
        Ok(())
    }
}

#[async_trait]
impl IntakeHandler for ValidationHandler {
    #[instrument(skip(self, entry), fields(path = %entry.path().display(), action = %entry.action()))]
    async fn handle(&self, entry: &FileQueueEntry) -> Result<()> {
        match entry.action() {
            FileAction::Create | FileAction::Modify => {
                if !tokio::fs::try_exists(entry.path()).await? {
                    warn!("File no longer exists, skipping");
                    return Ok(());
                }
                info!("Validating file");
                let codec = Arc::clone(&self.codec);
                let file = entry.path().to_path_buf();
                let scratch = self.scratch.join(Uuid::new_v4().to_string());
                let passphrase = self.passphrase.clone();
                tokio::task::spawn_blocking(move || {
                    Self::split_merge_cleanup(codec.as_ref(), &file, &scratch, &passphrase)
                })
                .await
                .map_err(|e| Error::Internal(format!("validation task failed: {}", e)))?
            }
            FileAction::Delete => {
                info!("Sending delete order");
                let event = DomainEvent::deletion_requested(entry.path().to_string_lossy());
                if let Err(e) = self.events.publish(event).await {
                    warn!("Publishing deletion request failed: {}", e);
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// Distribution Handler
// =============================================================================

/// Mirror a watched directory into the array.
pub struct DistributionHandler {
    service: CloudRaidService,
    root: PathBuf,
    owner: UserId,
}

impl DistributionHandler {
    pub fn new(service: CloudRaidService, root: impl Into<PathBuf>, owner: UserId) -> Self {
        Self {
            service,
            root: root.into(),
            owner,
        }
    }

    /// Logical record path of a watched file, `/` separated.
    fn logical_path(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.root).map_err(|_| {
            Error::Config(format!(
                "{} is outside the watched directory {}",
                path.display(),
                self.root.display()
            ))
        })?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }

    async fn upload(&self, local: &Path, logical: &str) -> Result<()> {
        let existing = self.service.metadata().file_get(logical, self.owner).await?;
        let file = match tokio::fs::File::open(local).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %local.display(), "File no longer exists, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let modified: DateTime<Utc> = file.metadata().await?.modified()?.into();

        let (id, update) = match existing {
            None => {
                let id = self
                    .service
                    .metadata()
                    .file_new(logical, None, modified, self.owner)
                    .await?;
                (id, false)
            }
            Some(FileRecord {
                id,
                status: FileStatus::Ready,
                ..
            }) => {
                self.service
                    .metadata()
                    .file_update_state(id, FileStatus::Uploading)
                    .await?;
                (id, true)
            }
            Some(record) => {
                return Err(Error::illegal_state(
                    &record.path,
                    record.status,
                    FileStatus::Ready,
                ))
            }
        };

        // The worker's path lock must outlive the job
        self.service
            .put_data_inline(file, id, update)
            .await
            .into_result("put")?;
        Ok(())
    }
}

#[async_trait]
impl IntakeHandler for DistributionHandler {
    #[instrument(skip(self, entry), fields(path = %entry.path().display(), action = %entry.action()))]
    async fn handle(&self, entry: &FileQueueEntry) -> Result<()> {
        let logical = self.logical_path(entry.path())?;
        match entry.action() {
            FileAction::Create | FileAction::Modify => {
                info!(logical = %logical, "Uploading file");
                self.upload(entry.path(), &logical).await
            }
            FileAction::Delete => {
                match self.service.metadata().file_get(&logical, self.owner).await? {
                    Some(record) => {
                        info!(logical = %logical, file_id = %record.id, "Deleting file");
                        self.service
                            .delete_data(record.id)
                            .await
                            .into_result("delete")?;
                    }
                    None => debug!(logical = %logical, "Deleted file was never stored"),
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, Raid5Codec};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_validation_round_trip_cleans_up() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("note.txt");
        std::fs::write(&file, vec![7u8; 5000]).unwrap();
        let scratch = dir.path().join("scratch");

        let events = Arc::new(InMemoryEventCollector::new());
        let handler = ValidationHandler::new(
            Arc::new(Raid5Codec::new(256).unwrap()),
            &scratch,
            "key",
            events.clone(),
        );

        handler
            .handle(&FileQueueEntry::new(&file, FileAction::Create))
            .await
            .unwrap();

        // Only the (now empty) scratch root remains
        let leftovers = std::fs::read_dir(&scratch).unwrap().count();
        assert_eq!(leftovers, 0);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_validation_skips_vanished_file() {
        let dir = TempDir::new().unwrap();
        let events = Arc::new(InMemoryEventCollector::new());
        let handler = ValidationHandler::new(
            Arc::new(Raid5Codec::new(256).unwrap()),
            dir.path().join("scratch"),
            "key",
            events,
        );

        let entry = FileQueueEntry::new(dir.path().join("gone.txt"), FileAction::Modify);
        assert!(handler.handle(&entry).await.is_ok());
    }

    #[tokio::test]
    async fn test_validation_delete_publishes_request() {
        let dir = TempDir::new().unwrap();
        let events = Arc::new(InMemoryEventCollector::new());
        let handler = ValidationHandler::new(
            Arc::new(Raid5Codec::new(256).unwrap()),
            dir.path().join("scratch"),
            "key",
            events.clone(),
        );

        handler
            .handle(&FileQueueEntry::new("/watched/old.txt", FileAction::Delete))
            .await
            .unwrap();
        assert_eq!(events.events_of_type("DeletionRequested").len(), 1);
    }
}
