//! Structured diagnostics emitted by the intake pipeline.
//!
//! Components receive a [`Diagnostics`] handle instead of printing or logging
//! ad hoc. Each notice is logged through `tracing` and broadcast to any
//! subscribers (the console reporter, tests).

use crate::intake::queue::IntakeOrigin;
use crate::intake::stability::StabilityResult;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// Why an incoming path was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The path is a directory.
    Directory,
    /// The extension is not in the configured filter.
    Extension,
    /// The path was produced by one of our own renames.
    OwnRename,
    /// The intake queue was already closed.
    QueueClosed,
}

/// A single observable step or failure in the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeNotice {
    /// A file was accepted and queued.
    Detected { path: PathBuf, origin: IntakeOrigin },
    /// A notification was dropped before queueing.
    Skipped { path: PathBuf, reason: SkipReason },
    /// The worker dequeued a file.
    Processing { path: PathBuf },
    /// Stability check finished without seeing two equal samples.
    Unsettled { path: PathBuf, result: StabilityResult },
    /// The marker was moved onto a new file.
    Rotated {
        source: PathBuf,
        latest: PathBuf,
        demoted: Vec<(PathBuf, PathBuf)>,
    },
    /// The external trigger is about to run.
    TriggerStarted {
        path: PathBuf,
        argument: String,
        dry_run: bool,
    },
    /// Captured output of the external trigger.
    TriggerOutput {
        path: PathBuf,
        stdout: String,
        stderr: String,
    },
    /// The external trigger finished successfully.
    TriggerCompleted { path: PathBuf },
    /// Processing of a file failed; the worker moves on.
    Failed { path: PathBuf, error: String },
    /// A queued file was dropped because the pipeline shut down.
    Abandoned { path: PathBuf },
    /// The worker finished a file and is waiting for the next one.
    Idle,
}

impl IntakeNotice {
    /// The file this notice concerns, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            IntakeNotice::Detected { path, .. }
            | IntakeNotice::Skipped { path, .. }
            | IntakeNotice::Processing { path }
            | IntakeNotice::Unsettled { path, .. }
            | IntakeNotice::TriggerStarted { path, .. }
            | IntakeNotice::TriggerOutput { path, .. }
            | IntakeNotice::TriggerCompleted { path }
            | IntakeNotice::Failed { path, .. }
            | IntakeNotice::Abandoned { path } => Some(path),
            IntakeNotice::Rotated { source, .. } => Some(source),
            IntakeNotice::Idle => None,
        }
    }

    fn log(&self) {
        match self {
            IntakeNotice::Detected { path, origin } => {
                tracing::info!(?origin, "New file detected: {}", path.display())
            }
            IntakeNotice::Skipped { path, reason } => match reason {
                SkipReason::Directory => {
                    tracing::debug!("Ignoring directory: {}", path.display())
                }
                SkipReason::Extension => {
                    tracing::info!("Skipping file (extension not watched): {}", path.display())
                }
                SkipReason::OwnRename => {
                    tracing::debug!("Ignoring our own rename: {}", path.display())
                }
                SkipReason::QueueClosed => {
                    tracing::warn!("Dropping file, intake is shutting down: {}", path.display())
                }
            },
            IntakeNotice::Processing { path } => {
                tracing::info!("Processing file from queue: {}", path.display())
            }
            IntakeNotice::Unsettled { path, result } => {
                tracing::warn!("File did not settle ({}), proceeding: {}", result, path.display())
            }
            IntakeNotice::Rotated {
                source,
                latest,
                demoted,
            } => tracing::info!(
                demoted = demoted.len(),
                "Rotated {} -> {}",
                source.display(),
                latest.display()
            ),
            IntakeNotice::TriggerStarted {
                path,
                argument,
                dry_run,
            } => tracing::info!(dry_run, "Running trigger for {}: {}", path.display(), argument),
            IntakeNotice::TriggerOutput { path, stdout, stderr } => tracing::debug!(
                stdout_len = stdout.len(),
                stderr_len = stderr.len(),
                "Trigger output captured for {}",
                path.display()
            ),
            IntakeNotice::TriggerCompleted { path } => {
                tracing::info!("Trigger completed for {}", path.display())
            }
            IntakeNotice::Failed { path, error } => {
                tracing::error!("Error processing {}: {}", path.display(), error)
            }
            IntakeNotice::Abandoned { path } => {
                tracing::warn!("Abandoned queued file at shutdown: {}", path.display())
            }
            IntakeNotice::Idle => tracing::debug!("Waiting for next file"),
        }
    }
}

/// Cloneable diagnostics sink backed by a broadcast channel.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    sender: broadcast::Sender<IntakeNotice>,
}

impl Diagnostics {
    /// Create a sink and its first subscriber.
    ///
    /// # Arguments
    /// * `buffer_size` - Notices retained for slow subscribers before they lag
    pub fn new(buffer_size: usize) -> (Self, broadcast::Receiver<IntakeNotice>) {
        let (sender, receiver) = broadcast::channel(buffer_size.max(1));
        (Self { sender }, receiver)
    }

    /// A sink that only logs. Notices sent while nobody subscribes are dropped.
    pub fn detached() -> Self {
        Self::new(16).0
    }

    /// Subscribe to notices emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<IntakeNotice> {
        self.sender.subscribe()
    }

    /// Log the notice and publish it to subscribers.
    pub fn emit(&self, notice: IntakeNotice) {
        notice.log();
        // No subscribers is fine; the notice has already been logged.
        let _ = self.sender.send(notice);
    }
}
