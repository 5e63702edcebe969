//! CloudRAID Service
//!
//! Caller-facing entry points. Each operation borrows one pool slot, runs
//! one job and returns its [`JobOutcome`]; failures never escape as errors.

use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncRead;
use tracing::instrument;

use crate::config::CoreConfig;
use crate::engine::connectors::ConnectorSet;
use crate::engine::context::CoreContext;
use crate::engine::outcome::JobOutcome;
use crate::engine::pool::{CoreAccessPool, PooledSlot};
use crate::domain::ports::{FileId, MetadataStore};
use crate::error::Result;
use crate::metrics::CoreMetrics;

/// The distribution engine behind a small facade.
#[derive(Debug, Clone)]
pub struct CloudRaidService {
    ctx: Arc<CoreContext>,
    pool: CoreAccessPool,
}

impl CloudRaidService {
    pub fn new(ctx: CoreContext) -> Self {
        let ctx = Arc::new(ctx);
        let pool = CoreAccessPool::new(Arc::clone(&ctx));
        Self { ctx, pool }
    }

    pub fn name(&self) -> &'static str {
        "CloudRAID"
    }

    pub fn vendor(&self) -> &'static str {
        "CloudRAID Project"
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Borrow a slot according to the configured acquire mode.
    pub async fn get_slot(&self) -> Result<PooledSlot> {
        self.pool.acquire().await
    }

    pub fn storage_connectors(&self) -> &ConnectorSet {
        &self.ctx.connectors
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.ctx.metadata
    }

    pub fn config(&self) -> &CoreConfig {
        &self.ctx.config
    }

    pub fn metrics(&self) -> &CoreMetrics {
        &self.ctx.metrics
    }

    pub fn pool(&self) -> &CoreAccessPool {
        &self.pool
    }

    /// Connect all storage connectors and create the staging directories.
    pub async fn connect_all(&self) -> Result<bool> {
        self.ctx.config.ensure_dirs().await?;
        Ok(self.ctx.connectors.connect_all().await)
    }

    /// Store new content for an UPLOADING record.
    #[instrument(skip(self, reader))]
    pub async fn put_data<R>(&self, reader: R, file_id: FileId, update: bool) -> JobOutcome<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        match self.get_slot().await {
            Ok(slot) => slot.put_data(reader, file_id, update).await,
            Err(e) => self.rejected("put", e),
        }
    }

    /// Store new content and wait for distribution to finish, even in
    /// asynchronous mode. Callers holding a per-path lock use this so the
    /// lock covers the whole job.
    #[instrument(skip(self, reader))]
    pub async fn put_data_inline<R>(
        &self,
        reader: R,
        file_id: FileId,
        update: bool,
    ) -> JobOutcome<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        match self.get_slot().await {
            Ok(slot) => slot.put_data_inline(reader, file_id, update).await,
            Err(e) => self.rejected("put", e),
        }
    }

    /// Reassemble a READY file.
    #[instrument(skip(self))]
    pub async fn get_data(&self, file_id: FileId) -> JobOutcome<File> {
        match self.get_slot().await {
            Ok(slot) => slot.get_data(file_id).await,
            Err(e) => self.rejected("get", e),
        }
    }

    /// Delete a READY file everywhere.
    #[instrument(skip(self))]
    pub async fn delete_data(&self, file_id: FileId) -> JobOutcome<()> {
        match self.get_slot().await {
            Ok(slot) => slot.delete_data(file_id).await,
            Err(e) => self.rejected("delete", e),
        }
    }

    /// Administrative retry for a record left at DISTRIBUTING.
    #[instrument(skip(self))]
    pub async fn retry_distribution(&self, file_id: FileId) -> JobOutcome<()> {
        match self.get_slot().await {
            Ok(slot) => slot.retry_distribution(file_id).await,
            Err(e) => self.rejected("retry", e),
        }
    }

    /// Wait for background jobs to hand their slots back.
    pub async fn wait_idle(&self) {
        self.pool.drain().await;
    }

    fn rejected<T>(&self, operation: &str, e: crate::error::Error) -> JobOutcome<T> {
        tracing::warn!(operation, "No slot for job: {}", e);
        let outcome = JobOutcome::from_result(Err(e));
        self.ctx.metrics.record_job(operation, outcome.label());
        outcome
    }
}
