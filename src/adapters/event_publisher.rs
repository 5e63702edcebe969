//! Event Publisher Adapters
//!
//! - [`LoggingEventPublisher`] writes each event to `tracing`.
//! - [`JsonLinesEventPublisher`] appends each event as one JSON line to an
//!   audit file.
//! - [`InMemoryEventCollector`] keeps events for inspection in tests.
//! - [`CompositeEventPublisher`] fans out to several of the above.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Level};

use crate::domain::events::DomainEvent;
use crate::domain::ports::{EventPublisher, FileId, FileStatus};
use crate::error::Result;

// =============================================================================
// Logging
// =============================================================================

/// Publishes events as structured log lines.
#[derive(Debug, Clone)]
pub struct LoggingEventPublisher {
    level: Level,
}

impl Default for LoggingEventPublisher {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log events at debug level only.
    pub fn quiet() -> Self {
        Self { level: Level::DEBUG }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let event_type = event.event_type();
        let file_id = event.file_id().map(|id| id.0);
        let body = serde_json::to_string(&event)?;

        if self.level == Level::DEBUG {
            debug!(event_type, file_id, event = %body, "Domain event");
        } else {
            info!(event_type, file_id, event = %body, "Domain event");
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

// =============================================================================
// JSON Lines Audit File
// =============================================================================

/// Appends every event to a file, one JSON document per line.
#[derive(Debug)]
pub struct JsonLinesEventPublisher {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesEventPublisher {
    /// Open `path` for appending, creating it and its parent directory.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, events: &[DomainEvent]) -> Result<()> {
        let mut buffer = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buffer, event)?;
            buffer.push(b'\n');
        }
        let mut file = self.file.lock().await;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for JsonLinesEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.append(std::slice::from_ref(&event)).await
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.append(&events).await
    }
}

// =============================================================================
// In-Memory Collector
// =============================================================================

/// Keeps every published event.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Statuses a file passed through, in publication order.
    pub fn status_trail(&self, file_id: FileId) -> Vec<FileStatus> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                DomainEvent::FileStatusChanged { file_id: id, to, .. } if *id == file_id.0 => {
                    Some(*to)
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}

// =============================================================================
// Fan-out
// =============================================================================

/// Publishes to every inner publisher. A failing publisher does not stop
/// the others; the first error is returned once all have been tried.
#[derive(Default, Clone)]
pub struct CompositeEventPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl std::fmt::Debug for CompositeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeEventPublisher")
            .field("publishers", &self.publishers.len())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let mut first_error = None;
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish(event.clone()).await {
                warn!("Event publisher failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        let mut first_error = None;
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish_all(events.clone()).await {
                warn!("Event publisher failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
