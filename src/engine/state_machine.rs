//! File Distribution State Machine
//!
//! A [`CoreAccess`] is one execution slot. It drives a single file through
//!
//! ```text
//! UPLOADING → UPLOADED → SPLITTING → SPLITTED → DISTRIBUTING → DISTRIBUTED → READY
//!                                                                           │
//!                                                   READY → DELETING → DELETED
//! ```
//!
//! persisting every transition in the metadata store and publishing a
//! `FileStatusChanged` event for it. A failing step leaves the record at the
//! last persisted status; nothing is rolled back.
//!
//! Connector failures arrive as `false`/`None` and are turned into
//! [`Error::BackendFailed`] here, so the caller sees one error per job.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::RetrievalPolicy;
use crate::engine::context::CoreContext;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{
    ContentHash, FileId, FileRecord, FileStatus, ShardIndex, UserId, MIN_SHARDS,
};
use crate::error::{Error, Result};

/// Buffer size for staging streams.
const IO_BUFFER: usize = 64 * 1024;

/// Connector call issued for every shard of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorOp {
    Upload,
    Update,
    Delete,
}

impl ConnectorOp {
    fn as_str(&self) -> &'static str {
        match self {
            ConnectorOp::Upload => "upload",
            ConnectorOp::Update => "update",
            ConnectorOp::Delete => "delete",
        }
    }
}

// =============================================================================
// Slot State
// =============================================================================

/// Transient per-job state of a slot. Empty between jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotState {
    pub path: Option<String>,
    pub user_id: Option<UserId>,
    pub file_id: Option<FileId>,
    /// Staged upload or merged output
    pub file: Option<PathBuf>,
    pub hash: Option<ContentHash>,
    /// Content hash the record had before an update
    pub previous_hash: Option<ContentHash>,
    /// Last status this slot persisted or observed
    pub status: Option<FileStatus>,
    pub update: bool,
    pub outcome: Option<bool>,
}

impl SlotState {
    pub fn is_empty(&self) -> bool {
        *self == SlotState::default()
    }
}

// =============================================================================
// Core Access Slot
// =============================================================================

/// One reusable execution slot.
pub struct CoreAccess {
    id: usize,
    ctx: Arc<CoreContext>,
    state: SlotState,
}

impl std::fmt::Debug for CoreAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreAccess")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl CoreAccess {
    pub fn new(id: usize, ctx: Arc<CoreContext>) -> Self {
        Self {
            id,
            ctx,
            state: SlotState::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> &SlotState {
        &self.state
    }

    /// Record the job's outcome flag.
    pub fn set_outcome(&mut self, success: bool) {
        self.state.outcome = Some(success);
    }

    /// Clear all transient state.
    pub fn reset(&mut self) {
        self.state = SlotState::default();
    }

    // =========================================================================
    // Ingest
    // =========================================================================

    /// Stream `reader` into the staging file of an UPLOADING record and
    /// advance it to UPLOADED.
    #[instrument(skip(self, reader), fields(slot = self.id))]
    pub async fn ingest<R>(&mut self, mut reader: R, file_id: FileId, update: bool) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.state.update = update;
        let record = self.load(file_id, FileStatus::Uploading).await?;
        self.state.previous_hash = record.content_hash.clone();

        let staged = staging_path(
            &self.ctx.config.split_input_dir,
            record.owner_id,
            &record.path,
        )?;
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.state.file = Some(staged.clone());

        let mut writer = BufWriter::with_capacity(IO_BUFFER, File::create(&staged).await?);
        let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
        if let Err(e) = writer.shutdown().await {
            error!("Closing staged file {} failed: {}", staged.display(), e);
            return Err(e.into());
        }
        writer.get_ref().sync_all().await?;

        debug!(bytes, staged = %staged.display(), "Upload staged");
        self.transition(FileStatus::Uploaded).await
    }

    // =========================================================================
    // Split + Distribute
    // =========================================================================

    /// Split the staged file and store its shards on all three connectors.
    #[instrument(skip(self), fields(slot = self.id, file_id = ?self.state.file_id))]
    pub async fn split_and_distribute(&mut self) -> Result<()> {
        let result = self.split_and_distribute_inner().await;
        if let Err(e) = &result {
            self.distribution_failed(e).await;
        }
        result
    }

    async fn split_and_distribute_inner(&mut self) -> Result<()> {
        let started = Instant::now();
        let file_id = self.file_id()?;
        let input = self
            .state
            .file
            .clone()
            .ok_or_else(|| Error::Internal("no staged upload in slot".to_string()))?;
        if self.state.status != Some(FileStatus::Uploaded) {
            let path = self.state.path.clone().unwrap_or_default();
            let actual = self
                .state
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(Error::illegal_state(path, actual, FileStatus::Uploaded));
        }

        self.transition(FileStatus::Splitting).await?;
        let hash = self.split(input.clone()).await?;
        self.state.hash = Some(hash.clone());

        let (path, owner) = self.owner_path()?;
        self.ctx
            .metadata
            .file_update(file_id, &path, &hash, Utc::now(), owner)
            .await?;
        self.transition(FileStatus::Splitted).await?;

        self.transition(FileStatus::Distributing).await?;
        let op = if self.state.update {
            ConnectorOp::Update
        } else {
            ConnectorOp::Upload
        };
        self.for_each_connector(&hash, op).await?;
        self.transition(FileStatus::Distributed).await?;
        self.transition(FileStatus::Ready).await?;

        self.finish_distribution(file_id, &hash, started, Some(&input))
            .await;
        if self.state.update {
            self.drop_superseded(&hash).await;
        }
        Ok(())
    }

    /// Push the local shards of a record left at DISTRIBUTING again.
    #[instrument(skip(self), fields(slot = self.id))]
    pub async fn retry_distribution(&mut self, file_id: FileId) -> Result<()> {
        let result = self.retry_distribution_inner(file_id).await;
        if let Err(e) = &result {
            if self.state.file_id.is_some() {
                self.distribution_failed(e).await;
            }
        }
        result
    }

    async fn retry_distribution_inner(&mut self, file_id: FileId) -> Result<()> {
        let started = Instant::now();
        let record = self.load(file_id, FileStatus::Distributing).await?;
        let hash = Self::content_hash_of(&record)?;
        self.state.hash = Some(hash.clone());

        info!(hash = %hash, "Retrying distribution");
        // Some connectors may already hold their shard
        self.for_each_connector(&hash, ConnectorOp::Update).await?;
        self.transition(FileStatus::Distributed).await?;
        self.transition(FileStatus::Ready).await?;

        let staged = staging_path(
            &self.ctx.config.split_input_dir,
            record.owner_id,
            &record.path,
        )?;
        self.finish_distribution(file_id, &hash, started, Some(&staged))
            .await;
        Ok(())
    }

    async fn split(&self, input: PathBuf) -> Result<ContentHash> {
        let codec = Arc::clone(&self.ctx.codec);
        let output_dir = self.ctx.config.split_output_dir.clone();
        let passphrase = self.ctx.config.passphrase.clone();
        tokio::task::spawn_blocking(move || codec.split(&input, &output_dir, &passphrase))
            .await
            .map_err(|e| Error::Internal(format!("split task failed: {}", e)))?
    }

    async fn finish_distribution(
        &self,
        file_id: FileId,
        hash: &ContentHash,
        started: Instant,
        staged: Option<&Path>,
    ) {
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(file_id = %file_id, hash = %hash, duration_ms, "File ready");
        self.publish(DomainEvent::distribution_completed(
            file_id,
            hash.as_str(),
            duration_ms,
        ))
        .await;

        if self.ctx.config.cleanup {
            self.cleanup_split_staging(hash, staged).await;
        }
    }

    /// Best-effort removal of shards an update replaced.
    async fn drop_superseded(&self, hash: &ContentHash) {
        let Some(previous) = self.state.previous_hash.as_ref().filter(|p| *p != hash) else {
            return;
        };
        match self.for_each_connector(previous, ConnectorOp::Delete).await {
            Ok(()) => debug!(previous = %previous, "Removed superseded shards"),
            Err(e) => warn!(previous = %previous, "Superseded shards not fully removed: {}", e),
        }
    }

    async fn cleanup_split_staging(&self, hash: &ContentHash, staged: Option<&Path>) {
        let dir = &self.ctx.config.split_output_dir;
        let mut files: Vec<PathBuf> = ShardIndex::all()
            .iter()
            .map(|index| dir.join(hash.shard_file_name(*index)))
            .collect();
        files.push(dir.join(hash.metadata_file_name()));
        files.extend(staged.map(Path::to_path_buf));

        for file in files {
            remove_logged(&file).await;
        }
    }

    // =========================================================================
    // Retrieve
    // =========================================================================

    /// Fetch the shards of a READY record, merge them and open the result.
    #[instrument(skip(self), fields(slot = self.id))]
    pub async fn retrieve(&mut self, file_id: FileId) -> Result<File> {
        let record = self.load(file_id, FileStatus::Ready).await?;
        let hash = Self::content_hash_of(&record)?;
        self.state.hash = Some(hash.clone());

        let job_dir = self
            .ctx
            .config
            .merge_input_dir
            .join(Uuid::new_v4().to_string());
        fs::create_dir_all(&job_dir).await?;

        let result = self.merge_from_connectors(&record, &hash, &job_dir).await;
        if let Err(e) = fs::remove_dir_all(&job_dir).await {
            warn!("Removing merge staging {} failed: {}", job_dir.display(), e);
        }

        let output = result?;
        self.state.file = Some(output.clone());
        // The open handle keeps the content readable; no plaintext copy
        // stays on disk once the caller drops it.
        let opened = File::open(&output).await;
        remove_logged(&output).await;
        Ok(opened?)
    }

    async fn merge_from_connectors(
        &self,
        record: &FileRecord,
        hash: &ContentHash,
        job_dir: &Path,
    ) -> Result<PathBuf> {
        let mut available = 0;
        for connector in self.ctx.connectors.iter() {
            let index = connector.shard_index();
            match connector.get(hash).await {
                Some(data) => {
                    fs::write(job_dir.join(hash.shard_file_name(index)), &data).await?;
                    available += 1;
                }
                None => {
                    warn!(connector = %connector.name(), hash = %hash, "Shard not retrievable");
                    self.ctx.metrics.record_backend_failure(index.get(), "get");
                    if self.ctx.config.retrieval == RetrievalPolicy::RequireAll {
                        return Err(Error::backend(index.get(), "get", hash.as_str()));
                    }
                }
            }
        }
        if available < MIN_SHARDS {
            return Err(Error::InsufficientShards {
                available,
                required: MIN_SHARDS,
            });
        }

        let metadata = self.fetch_metadata(hash).await?;
        fs::write(job_dir.join(hash.metadata_file_name()), &metadata).await?;

        let output = staging_path(
            &self.ctx.config.merge_output_dir,
            record.owner_id,
            &record.path,
        )?;
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Every retrieval gets its own output file, so concurrent readers of
        // the same record never share one.
        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = output.with_file_name(format!(".{}.{}", file_name, Uuid::new_v4()));

        let codec = Arc::clone(&self.ctx.codec);
        let passphrase = self.ctx.config.passphrase.clone();
        let (input_dir, merge_hash, merge_out) =
            (job_dir.to_path_buf(), hash.clone(), output.clone());
        tokio::task::spawn_blocking(move || {
            codec.merge(&input_dir, &merge_hash, &merge_out, &passphrase)
        })
        .await
        .map_err(|e| Error::Internal(format!("merge task failed: {}", e)))??;

        debug!(hash = %hash, available, output = %output.display(), "File merged");
        self.publish(DomainEvent::file_retrieved(record.id, available))
            .await;
        Ok(output)
    }

    /// First metadata shard of the right size from any connector.
    async fn fetch_metadata(&self, hash: &ContentHash) -> Result<bytes::Bytes> {
        let expected = self.ctx.codec.metadata_size();
        let mut last_index = 0;
        for connector in self.ctx.connectors.iter() {
            if let Some(data) = connector.get_metadata(hash, expected).await {
                return Ok(data);
            }
            last_index = connector.shard_index().get();
            self.ctx
                .metrics
                .record_backend_failure(last_index, "get_metadata");
        }
        Err(Error::backend(last_index, "get_metadata", hash.as_str()))
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Remove all shards of a READY record, then the record itself.
    ///
    /// A record left at DELETED by a failed removal is accepted again; its
    /// shards are already gone, so only the record is removed.
    #[instrument(skip(self), fields(slot = self.id))]
    pub async fn delete(&mut self, file_id: FileId) -> Result<()> {
        let record = self
            .load_any(file_id, &[FileStatus::Ready, FileStatus::Deleted])
            .await?;
        let hash = Self::content_hash_of(&record)?;
        self.state.hash = Some(hash.clone());

        if record.status == FileStatus::Ready {
            self.transition(FileStatus::Deleting).await?;
            self.for_each_connector(&hash, ConnectorOp::Delete).await?;
            self.transition(FileStatus::Deleted).await?;
        } else {
            info!(file_id = %file_id, "Finishing removal of a deleted record");
        }
        self.ctx.metadata.file_delete(file_id).await?;

        info!(file_id = %file_id, hash = %hash, "File deleted");
        self.publish(DomainEvent::file_deleted(file_id, hash.as_str()))
            .await;
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Load a record into the slot and check its status.
    async fn load(&mut self, file_id: FileId, expected: FileStatus) -> Result<FileRecord> {
        self.load_any(file_id, &[expected]).await
    }

    async fn load_any(&mut self, file_id: FileId, expected: &[FileStatus]) -> Result<FileRecord> {
        let record = self
            .ctx
            .metadata
            .file_by_id(file_id)
            .await?
            .ok_or(Error::FileNotFound(file_id.0))?;

        self.state.file_id = Some(file_id);
        self.state.path = Some(record.path.clone());
        self.state.user_id = Some(record.owner_id);
        self.state.status = Some(record.status);

        if !expected.contains(&record.status) {
            let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
            return Err(Error::illegal_state(
                &record.path,
                record.status,
                expected.join(" or "),
            ));
        }
        Ok(record)
    }

    fn content_hash_of(record: &FileRecord) -> Result<ContentHash> {
        record.content_hash.clone().ok_or_else(|| {
            Error::illegal_state(&record.path, "no content hash", "a split file")
        })
    }

    fn file_id(&self) -> Result<FileId> {
        self.state
            .file_id
            .ok_or_else(|| Error::Internal("slot holds no file".to_string()))
    }

    fn owner_path(&self) -> Result<(String, UserId)> {
        match (&self.state.path, self.state.user_id) {
            (Some(path), Some(owner)) => Ok((path.clone(), owner)),
            _ => Err(Error::Internal("slot holds no file".to_string())),
        }
    }

    /// Persist a status change and publish it.
    async fn transition(&mut self, to: FileStatus) -> Result<()> {
        let file_id = self.file_id()?;
        self.ctx.metadata.file_update_state(file_id, to).await?;
        let from = self.state.status.replace(to);

        debug!(slot = self.id, file_id = %file_id, from = ?from, to = %to, "Status changed");
        let path = self.state.path.clone().unwrap_or_default();
        self.publish(DomainEvent::status_changed(file_id, path, from, to))
            .await;
        Ok(())
    }

    /// Issue `op` on every connector in index order. All three are always
    /// called; any failure fails the step.
    async fn for_each_connector(&self, hash: &ContentHash, op: ConnectorOp) -> Result<()> {
        let mut first_failure = None;
        for connector in self.ctx.connectors.iter() {
            let ok = match op {
                ConnectorOp::Upload => connector.upload(hash).await,
                ConnectorOp::Update => connector.update(hash).await,
                ConnectorOp::Delete => connector.delete(hash).await,
            };
            if !ok {
                let index = connector.shard_index().get();
                warn!(
                    connector = %connector.name(),
                    hash = %hash,
                    "Connector {} failed",
                    op.as_str()
                );
                self.ctx.metrics.record_backend_failure(index, op.as_str());
                first_failure.get_or_insert(index);
            }
        }

        match first_failure {
            None => Ok(()),
            Some(index) => Err(Error::backend(index, op.as_str(), hash.as_str())),
        }
    }

    async fn distribution_failed(&self, e: &Error) {
        let (Some(file_id), Some(status)) = (self.state.file_id, self.state.status) else {
            return;
        };
        error!(file_id = %file_id, status = %status, "Distribution failed: {}", e);
        self.publish(DomainEvent::distribution_failed(file_id, status, e.to_string()))
            .await;
    }

    async fn publish(&self, event: DomainEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.ctx.events.publish(event).await {
            warn!(event_type, "Publishing event failed: {}", e);
        }
    }
}

/// Location of a user's file below a staging directory:
/// `{base}/{owner}/{path}`.
pub(crate) fn staging_path(base: &Path, owner: UserId, path: &str) -> Result<PathBuf> {
    let mut out = base.join(owner.to_string());
    let mut has_name = false;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                has_name = true;
            }
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::DataAccess(format!(
                    "record path {} leaves the staging area",
                    path
                )))
            }
        }
    }
    if !has_name {
        return Err(Error::DataAccess(format!("record path {:?} is empty", path)));
    }
    Ok(out)
}

async fn remove_logged(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Removing {} failed: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_layout() {
        let base = Path::new("/stage");
        assert_eq!(
            staging_path(base, UserId(42), "docs/report.pdf").unwrap(),
            PathBuf::from("/stage/42/docs/report.pdf")
        );
        assert_eq!(
            staging_path(base, UserId(1), "/abs/./a.txt").unwrap(),
            PathBuf::from("/stage/1/abs/a.txt")
        );
    }

    #[test]
    fn test_staging_path_rejects_escape() {
        let base = Path::new("/stage");
        assert!(staging_path(base, UserId(1), "../etc/passwd").is_err());
        assert!(staging_path(base, UserId(1), "").is_err());
        assert!(staging_path(base, UserId(1), "/").is_err());
    }

    #[test]
    fn test_slot_state_empty() {
        let mut state = SlotState::default();
        assert!(state.is_empty());
        state.update = true;
        assert!(!state.is_empty());
    }
}
