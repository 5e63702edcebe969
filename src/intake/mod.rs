//! Filesystem Change Intake
//!
//! Turns changes in a watched directory into work for the engine.
//!
//! ```text
//! DirectoryScanner ──▶ FileQueue ──▶ IntakeWorker x N ──▶ IntakeHandler
//!                                        │
//!                                   PathLockTable
//! ```
//!
//! Workers share one queue and one lock table. A path is processed by at
//! most one worker at a time; contended entries are dropped.

pub mod handler;
pub mod lock;
pub mod queue;
pub mod scanner;
pub mod worker;

pub use handler::{DistributionHandler, IntakeHandler, ValidationHandler};
pub use lock::{PathLockGuard, PathLockTable, WorkerId};
pub use queue::{FileAction, FileQueue, FileQueueEntry};
pub use scanner::DirectoryScanner;
pub use worker::{Dispatch, IntakePool, IntakeWorker};
