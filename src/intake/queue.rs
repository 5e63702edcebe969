//! File Queue
//!
//! FIFO of pending filesystem changes shared between the watcher and the
//! intake workers. Dequeuing never blocks; an empty queue is an error.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileAction {
    Create,
    Modify,
    Delete,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Create => "CREATE",
            FileAction::Modify => "MODIFY",
            FileAction::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for FileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending change. Consumed exactly once, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQueueEntry {
    path: PathBuf,
    action: FileAction,
}

impl FileQueueEntry {
    pub fn new(path: impl Into<PathBuf>, action: FileAction) -> Self {
        Self {
            path: path.into(),
            action,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn action(&self) -> FileAction {
        self.action
    }
}

/// Shared, explicitly owned change queue.
#[derive(Debug, Default)]
pub struct FileQueue {
    entries: Mutex<VecDeque<FileQueueEntry>>,
}

impl FileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, entry: FileQueueEntry) {
        self.entries.lock().push_back(entry);
    }

    /// Take the oldest entry, failing with `Error::QueueEmpty` if there is none.
    pub fn get(&self) -> Result<FileQueueEntry> {
        self.entries.lock().pop_front().ok_or(Error::QueueEmpty)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
