//! Core Access Pool
//!
//! A fixed set of [`CoreAccess`] slots guarded by a semaphore. Borrowing a
//! slot yields a [`PooledSlot`]; dropping it resets the slot and hands it
//! back, whichever task finishes the job.
//!
//! In asynchronous mode `put_data` returns as soon as the upload is staged
//! and the distribution continues in a spawned task that owns the guard.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, error, info, warn};

use crate::config::AcquireMode;
use crate::engine::context::CoreContext;
use crate::engine::outcome::JobOutcome;
use crate::engine::state_machine::{CoreAccess, SlotState};
use crate::domain::ports::FileId;
use crate::error::{Error, Result};

/// Bounded pool of execution slots.
#[derive(Clone)]
pub struct CoreAccessPool {
    ctx: Arc<CoreContext>,
    semaphore: Arc<Semaphore>,
    free: Arc<Mutex<Vec<CoreAccess>>>,
    capacity: usize,
}

impl std::fmt::Debug for CoreAccessPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreAccessPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl CoreAccessPool {
    /// Create `ctx.config.slots` slots.
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        let capacity = ctx.config.slots.max(1);
        let free = (0..capacity)
            .map(|id| CoreAccess::new(id, Arc::clone(&ctx)))
            .collect();
        Self {
            ctx,
            semaphore: Arc::new(Semaphore::new(capacity)),
            free: Arc::new(Mutex::new(free)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently borrowed.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Borrow a slot according to the configured acquire mode.
    pub async fn acquire(&self) -> Result<PooledSlot> {
        match self.ctx.config.acquire_mode {
            AcquireMode::Blocking => self.acquire_blocking().await,
            AcquireMode::FailFast => self.try_acquire(),
        }
    }

    /// Wait until a slot is free.
    pub async fn acquire_blocking(&self) -> Result<PooledSlot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("core access pool closed".to_string()))?;
        self.checkout(permit)
    }

    /// Borrow a slot or fail immediately.
    pub fn try_acquire(&self) -> Result<PooledSlot> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => self.checkout(permit),
            Err(TryAcquireError::NoPermits) => Err(Error::SlotUnavailable {
                capacity: self.capacity,
            }),
            Err(TryAcquireError::Closed) => {
                Err(Error::Internal("core access pool closed".to_string()))
            }
        }
    }

    fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledSlot> {
        let slot = self
            .free
            .lock()
            .pop()
            .ok_or_else(|| Error::Internal("permit granted without a free slot".to_string()))?;
        self.ctx.metrics.slot_acquired();
        debug!(slot = slot.id(), "Slot acquired");
        Ok(PooledSlot {
            slot: Some(slot),
            free: Arc::clone(&self.free),
            ctx: Arc::clone(&self.ctx),
            _permit: permit,
        })
    }

    /// Wait until every slot has been returned.
    pub async fn drain(&self) {
        match self.semaphore.acquire_many(self.capacity as u32).await {
            Ok(_all) => info!(capacity = self.capacity, "Core access pool idle"),
            Err(_) => warn!("Core access pool closed while draining"),
        }
    }
}

// =============================================================================
// Pooled Slot
// =============================================================================

/// A borrowed slot. Released exactly once, on drop.
pub struct PooledSlot {
    slot: Option<CoreAccess>,
    free: Arc<Mutex<Vec<CoreAccess>>>,
    ctx: Arc<CoreContext>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSlot").field("slot", &self.slot).finish()
    }
}

impl PooledSlot {
    /// Transient state of the borrowed slot.
    pub fn state(&self) -> Option<&SlotState> {
        self.slot.as_ref().map(CoreAccess::state)
    }

    fn inner(&mut self) -> Result<&mut CoreAccess> {
        self.slot
            .as_mut()
            .ok_or_else(|| Error::Internal("slot already released".to_string()))
    }

    fn finish<T>(&mut self, operation: &str, result: Result<T>) -> JobOutcome<T> {
        let outcome = JobOutcome::from_result(result);
        if let Some(slot) = self.slot.as_mut() {
            slot.set_outcome(outcome.is_success());
        }
        if let Some(failure) = outcome.failure() {
            error!(operation, kind = %failure.kind, "Job failed: {}", failure.message);
        }
        self.ctx.metrics.record_job(operation, outcome.label());
        outcome
    }

    /// Ingest `reader` for an UPLOADING record, then split and distribute it
    /// inline or in the background depending on `upload.asynchronous`.
    pub async fn put_data<R>(self, reader: R, file_id: FileId, update: bool) -> JobOutcome<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let asynchronous = self.ctx.config.asynchronous;
        self.put_data_with(reader, file_id, update, asynchronous)
            .await
    }

    /// Like [`put_data`](Self::put_data) but always finishes the whole job
    /// before returning, whatever `upload.asynchronous` says.
    pub async fn put_data_inline<R>(
        self,
        reader: R,
        file_id: FileId,
        update: bool,
    ) -> JobOutcome<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.put_data_with(reader, file_id, update, false).await
    }

    async fn put_data_with<R>(
        mut self,
        reader: R,
        file_id: FileId,
        update: bool,
        asynchronous: bool,
    ) -> JobOutcome<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let ingested = match self.inner() {
            Ok(slot) => slot.ingest(reader, file_id, update).await,
            Err(e) => Err(e),
        };
        if let Err(e) = ingested {
            return self.finish("put", Err(e));
        }

        if asynchronous {
            let outcome: JobOutcome<()> = JobOutcome::Dispatched;
            self.ctx.metrics.record_job("put", outcome.label());
            tokio::spawn(async move {
                let result = self.distribute().await;
                self.finish("distribute", result);
            });
            return outcome;
        }

        let result = self.distribute().await;
        self.finish("put", result)
    }

    async fn distribute(&mut self) -> Result<()> {
        self.inner()?.split_and_distribute().await
    }

    /// Reassemble a READY file and open it for reading.
    pub async fn get_data(mut self, file_id: FileId) -> JobOutcome<File> {
        let result = match self.inner() {
            Ok(slot) => slot.retrieve(file_id).await,
            Err(e) => Err(e),
        };
        self.finish("get", result)
    }

    /// Remove a READY file from all connectors and the metadata store.
    pub async fn delete_data(mut self, file_id: FileId) -> JobOutcome<()> {
        let result = match self.inner() {
            Ok(slot) => slot.delete(file_id).await,
            Err(e) => Err(e),
        };
        self.finish("delete", result)
    }

    /// Push the shards of a DISTRIBUTING record again.
    pub async fn retry_distribution(mut self, file_id: FileId) -> JobOutcome<()> {
        let result = match self.inner() {
            Ok(slot) => slot.retry_distribution(file_id).await,
            Err(e) => Err(e),
        };
        self.finish("retry", result)
    }
}

impl Drop for PooledSlot {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slot.take() {
            debug!(slot = slot.id(), outcome = ?slot.state().outcome, "Slot released");
            slot.reset();
            self.free.lock().push(slot);
            self.ctx.metrics.slot_released();
        }
    }
}
