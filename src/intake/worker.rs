//! Intake Workers
//!
//! Each worker polls the shared queue, takes the path lock for the entry it
//! dequeued and hands the entry to the configured handler. Workers poll at
//! staggered intervals so they do not wake in lockstep.
//!
//! An entry whose path is locked by another worker is dropped. The
//! contention is logged, counted and published as an event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::intake::handler::IntakeHandler;
use crate::intake::lock::{PathLockTable, WorkerId};
use crate::intake::queue::{FileQueue, FileQueueEntry};
use crate::metrics::CoreMetrics;

/// What happened to one dequeued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The handler ran (successfully or not).
    Handled,
    /// Another worker held the path; the entry was dropped.
    Contended,
}

/// One polling worker.
pub struct IntakeWorker {
    id: WorkerId,
    interval: Duration,
    queue: Arc<FileQueue>,
    locks: Arc<PathLockTable>,
    handler: Arc<dyn IntakeHandler>,
    events: Arc<dyn EventPublisher>,
    metrics: CoreMetrics,
}

impl IntakeWorker {
    /// Worker `index` polls every `(index + 1) * base_interval`.
    pub fn new(
        index: usize,
        base_interval: Duration,
        queue: Arc<FileQueue>,
        locks: Arc<PathLockTable>,
        handler: Arc<dyn IntakeHandler>,
        events: Arc<dyn EventPublisher>,
        metrics: CoreMetrics,
    ) -> Self {
        let factor = u32::try_from(index + 1).unwrap_or(u32::MAX);
        Self {
            id: WorkerId::new(format!("intake-worker-{}", index)),
            interval: base_interval.saturating_mul(factor),
            queue,
            locks,
            handler,
            events,
            metrics,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until `shutdown` is cancelled.
    #[instrument(skip(self, shutdown), fields(worker = %self.id))]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Intake worker started");
        let mut burst: Option<(Instant, usize)> = None;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.queue.get() {
                Ok(entry) => {
                    let (_, handled) = burst.get_or_insert_with(|| (Instant::now(), 0));
                    *handled += 1;
                    if self.process(entry).await == Dispatch::Contended {
                        self.pause(&shutdown).await;
                    }
                }
                Err(_) => {
                    if let Some((started, handled)) = burst.take() {
                        debug!(
                            handled,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Queue drained"
                        );
                    }
                    self.pause(&shutdown).await;
                }
            }
        }

        info!("Intake worker stopped");
    }

    /// Handle one entry under its path lock.
    pub async fn process(&self, entry: FileQueueEntry) -> Dispatch {
        let path = entry.path().to_string_lossy().into_owned();

        let Some(_guard) = self.locks.try_guard(entry.path(), &self.id) else {
            warn!(
                worker = %self.id,
                path = %path,
                action = %entry.action(),
                "Path is locked by another worker, dropping entry"
            );
            self.metrics.record_lock_contention();
            self.publish(DomainEvent::path_lock_contended(&path, self.id.as_str()))
                .await;
            return Dispatch::Contended;
        };

        self.metrics.record_intake(entry.action().as_str());
        self.publish(DomainEvent::intake_dispatched(
            &path,
            entry.action().as_str(),
            self.id.as_str(),
        ))
        .await;

        if let Err(e) = self.handler.handle(&entry).await {
            error!(
                worker = %self.id,
                path = %path,
                action = %entry.action(),
                "Intake handler failed: {}",
                e
            );
        }
        Dispatch::Handled
    }

    async fn pause(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(self.interval) => {}
            _ = shutdown.cancelled() => {}
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!(worker = %self.id, "Publishing intake event failed: {}", e);
        }
    }
}

/// A running set of intake workers sharing one queue and lock table.
pub struct IntakePool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl IntakePool {
    /// Start `workers` workers.
    pub fn spawn(
        workers: usize,
        base_interval: Duration,
        queue: Arc<FileQueue>,
        locks: Arc<PathLockTable>,
        handler: Arc<dyn IntakeHandler>,
        events: Arc<dyn EventPublisher>,
        metrics: CoreMetrics,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let handles = (0..workers)
            .map(|index| {
                let worker = IntakeWorker::new(
                    index,
                    base_interval,
                    Arc::clone(&queue),
                    Arc::clone(&locks),
                    Arc::clone(&handler),
                    Arc::clone(&events),
                    metrics.clone(),
                );
                tokio::spawn(worker.run(shutdown.child_token()))
            })
            .collect();

        info!(workers, "Intake pool started");
        Self { shutdown, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every worker and wait for them to finish their current entry.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!("Intake worker panicked: {}", e);
            }
        }
        info!("Intake pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryEventCollector;
    use crate::error::Result;
    use crate::intake::queue::FileAction;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<(PathBuf, FileAction)>>,
    }

    #[async_trait]
    impl IntakeHandler for RecordingHandler {
        async fn handle(&self, entry: &FileQueueEntry) -> Result<()> {
            self.seen
                .lock()
                .push((entry.path().to_path_buf(), entry.action()));
            Ok(())
        }
    }

    fn worker(
        index: usize,
        queue: Arc<FileQueue>,
        locks: Arc<PathLockTable>,
        handler: Arc<RecordingHandler>,
        events: Arc<InMemoryEventCollector>,
        metrics: CoreMetrics,
    ) -> IntakeWorker {
        IntakeWorker::new(
            index,
            Duration::from_millis(10),
            queue,
            locks,
            handler,
            events,
            metrics,
        )
    }

    #[test]
    fn test_intervals_are_staggered() {
        let queue = Arc::new(FileQueue::new());
        let locks = Arc::new(PathLockTable::new());
        let handler = Arc::new(RecordingHandler::default());
        let events = Arc::new(InMemoryEventCollector::new());
        let metrics = CoreMetrics::new().unwrap();

        let w0 = worker(0, queue.clone(), locks.clone(), handler.clone(), events.clone(), metrics.clone());
        let w2 = worker(2, queue, locks, handler, events, metrics);
        assert_eq!(w0.interval(), Duration::from_millis(10));
        assert_eq!(w2.interval(), Duration::from_millis(30));
        assert_eq!(w2.id().as_str(), "intake-worker-2");
    }

    #[tokio::test]
    async fn test_process_dispatches_and_unlocks() {
        let queue = Arc::new(FileQueue::new());
        let locks = Arc::new(PathLockTable::new());
        let handler = Arc::new(RecordingHandler::default());
        let events = Arc::new(InMemoryEventCollector::new());
        let metrics = CoreMetrics::new().unwrap();
        let w = worker(0, queue, locks.clone(), handler.clone(), events.clone(), metrics.clone());

        let entry = FileQueueEntry::new("/watch/a.txt", FileAction::Create);
        assert_eq!(w.process(entry).await, Dispatch::Handled);

        assert_eq!(handler.seen.lock().len(), 1);
        assert!(!locks.is_locked(std::path::Path::new("/watch/a.txt")));
        assert_eq!(metrics.intake_count("CREATE"), 1);
        assert_eq!(events.events_of_type("IntakeDispatched").len(), 1);
    }

    #[tokio::test]
    async fn test_contended_entry_is_dropped() {
        let queue = Arc::new(FileQueue::new());
        let locks = Arc::new(PathLockTable::new());
        let handler = Arc::new(RecordingHandler::default());
        let events = Arc::new(InMemoryEventCollector::new());
        let metrics = CoreMetrics::new().unwrap();
        let w = worker(1, queue, locks.clone(), handler.clone(), events.clone(), metrics.clone());

        let path = std::path::Path::new("/watch/busy.txt");
        assert!(locks.lock(path, &WorkerId::new("intake-worker-0")));

        let entry = FileQueueEntry::new(path, FileAction::Modify);
        assert_eq!(w.process(entry).await, Dispatch::Contended);

        assert!(handler.seen.lock().is_empty());
        assert_eq!(metrics.lock_contention(), 1);
        assert_eq!(events.events_of_type("PathLockContended").len(), 1);
        // The original holder keeps its lock
        assert_eq!(locks.holder(path), Some(WorkerId::new("intake-worker-0")));
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops() {
        let queue = Arc::new(FileQueue::new());
        for i in 0..20 {
            queue.add(FileQueueEntry::new(
                format!("/watch/file-{}.txt", i),
                FileAction::Create,
            ));
        }
        let handler = Arc::new(RecordingHandler::default());
        let metrics = CoreMetrics::new().unwrap();

        let pool = IntakePool::spawn(
            3,
            Duration::from_millis(5),
            queue.clone(),
            Arc::new(PathLockTable::new()),
            handler.clone(),
            Arc::new(InMemoryEventCollector::new()),
            metrics.clone(),
        );
        assert_eq!(pool.len(), 3);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !queue.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.stop().await;

        // Distinct paths never contend, so every entry was handled once
        assert!(queue.is_empty());
        assert_eq!(handler.seen.lock().len(), 20);
        assert_eq!(metrics.intake_count("CREATE"), 20);
    }
}
