//! Directory Scanner
//!
//! Polling watcher for one directory tree. Each scan walks the tree, diffs
//! it against the previous snapshot and queues CREATE, MODIFY and DELETE
//! entries for what changed. Directories themselves are never queued.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::intake::queue::{FileAction, FileQueue, FileQueueEntry};

/// What identifies one version of a file between scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

/// Polls `root` and feeds changes into a [`FileQueue`].
#[derive(Debug)]
pub struct DirectoryScanner {
    root: PathBuf,
    queue: Arc<FileQueue>,
    snapshot: Mutex<HashMap<PathBuf, Fingerprint>>,
}

impl DirectoryScanner {
    pub fn new(root: impl Into<PathBuf>, queue: Arc<FileQueue>) -> Self {
        Self {
            root: root.into(),
            queue,
            snapshot: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record the current tree without queueing anything, so only later
    /// changes are reported.
    pub fn prime(&self) -> Result<usize> {
        let current = self.walk()?;
        let count = current.len();
        *self.snapshot.lock() = current;
        Ok(count)
    }

    /// Walk the tree once and queue every difference. Returns the number of
    /// queued entries.
    pub fn scan(&self) -> Result<usize> {
        let current = self.walk()?;
        let mut snapshot = self.snapshot.lock();
        let mut queued = 0;

        for (path, print) in &current {
            let action = match snapshot.get(path) {
                None => Some(FileAction::Create),
                Some(previous) if previous != print => Some(FileAction::Modify),
                Some(_) => None,
            };
            if let Some(action) = action {
                debug!(path = %path.display(), action = %action, "Change detected");
                self.queue.add(FileQueueEntry::new(path.clone(), action));
                queued += 1;
            }
        }

        for path in snapshot.keys().filter(|p| !current.contains_key(*p)) {
            debug!(path = %path.display(), "Deletion detected");
            self.queue
                .add(FileQueueEntry::new(path.clone(), FileAction::Delete));
            queued += 1;
        }

        *snapshot = current;
        Ok(queued)
    }

    /// Scan every `interval` on a blocking thread until `shutdown` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!(root = %self.root.display(), "Directory scanner started");
        let mut tick = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let scanner = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || scanner.scan()).await {
                        Ok(Ok(0)) => {}
                        Ok(Ok(queued)) => info!(queued, "Queued filesystem changes"),
                        Ok(Err(e)) => error!("Directory scan failed: {}", e),
                        Err(e) => error!("Directory scan task failed: {}", e),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Directory scanner stopped");
    }

    fn walk(&self) -> Result<HashMap<PathBuf, Fingerprint>> {
        if !self.root.is_dir() {
            return Err(Error::Config(format!(
                "watch directory {} does not exist",
                self.root.display()
            )));
        }

        let mut files = HashMap::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            // Hidden partial files belong to in-flight writers
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => {
                    files.insert(
                        entry.into_path(),
                        Fingerprint {
                            modified: meta.modified().ok(),
                            len: meta.len(),
                        },
                    );
                }
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }
        Ok(files)
    }
}
