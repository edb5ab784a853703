//! File intake pipeline.
//!
//! This module provides:
//! - `watcher`: the watch controller that turns create notifications into intake events
//! - `queue`: the closeable FIFO between notification delivery and processing
//! - `worker`: the single sequential consumer of the queue
//! - `stability`: write-completion detection by size polling

pub mod queue;
pub mod stability;
pub mod watcher;
pub mod worker;

pub use queue::{IntakeEvent, IntakeOrigin, IntakeQueue, QueueClosed};
pub use stability::{FsProbe, SizeProbe, StabilityDetector, StabilityResult};
pub use watcher::{
    normalize_extension, CreateRouter, ShutdownReport, WatchController, WatchTarget, WatcherError,
};
pub use worker::{IntakeError, IntakeWorker, ProcessedFile, WorkerStats};
