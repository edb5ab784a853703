//! The single intake worker.
//!
//! Exactly one worker drains the intake queue, taking each file through the
//! stability check, the rotation and the external trigger before dequeuing
//! the next. Because rotations are never concurrent, the directory's marker
//! invariant needs no lock. Running more than one worker against the same
//! directory would break that.

use crate::diagnostics::{Diagnostics, IntakeNotice};
use crate::intake::queue::{IntakeEvent, IntakeQueue};
use crate::intake::stability::{StabilityDetector, StabilityResult};
use crate::rotation::{LatestRotator, Rotation, RotationError};
use crate::trigger::{ActionTrigger, TriggerError, TriggerOutcome};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Per-file failures. None of these stop the worker.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("File disappeared before it could be processed: {0}")]
    Vanished(PathBuf),

    #[error("Failed to check stability of {path}: {source}")]
    Stability { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),
}

/// A file that made it through the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFile {
    pub stability: StabilityResult,
    pub rotation: Rotation,
    pub outcome: TriggerOutcome,
}

/// Counters returned when the worker exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Files that completed every step.
    pub processed: u64,
    /// Files abandoned because a step failed.
    pub failed: u64,
}

/// Sequential consumer of the intake queue.
pub struct IntakeWorker {
    queue: IntakeQueue,
    stability: StabilityDetector,
    rotator: LatestRotator,
    trigger: Arc<dyn ActionTrigger>,
    diagnostics: Diagnostics,
}

impl IntakeWorker {
    /// Create a worker. Nothing runs until [`spawn`](Self::spawn) or [`run`](Self::run).
    pub fn new(
        queue: IntakeQueue,
        stability: StabilityDetector,
        rotator: LatestRotator,
        trigger: Arc<dyn ActionTrigger>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            queue,
            stability,
            rotator,
            trigger,
            diagnostics,
        }
    }

    /// Run the worker on its own task.
    pub fn spawn(self) -> JoinHandle<WorkerStats> {
        tokio::spawn(self.run())
    }

    /// Process events until the queue is closed.
    pub async fn run(self) -> WorkerStats {
        let mut stats = WorkerStats::default();

        while let Some(event) = self.queue.pop().await {
            match self.process(&event).await {
                Ok(_) => stats.processed += 1,
                Err(e) => {
                    stats.failed += 1;
                    self.diagnostics.emit(IntakeNotice::Failed {
                        path: event.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
            self.diagnostics.emit(IntakeNotice::Idle);
        }

        tracing::info!(
            processed = stats.processed,
            failed = stats.failed,
            "Intake queue closed, worker stopping"
        );
        stats
    }

    /// Take one file through stability, rotation and trigger.
    pub async fn process(&self, event: &IntakeEvent) -> Result<ProcessedFile, IntakeError> {
        let path = event.path();
        tracing::debug!(
            queued_ms = event.detected_at.elapsed().as_millis() as u64,
            origin = ?event.origin,
            "Dequeued {}",
            path.display()
        );
        self.diagnostics.emit(IntakeNotice::Processing {
            path: path.to_path_buf(),
        });

        let stability = self
            .stability
            .check(path)
            .await
            .map_err(|source| IntakeError::Stability {
                path: path.to_path_buf(),
                source,
            })?;

        match stability {
            StabilityResult::Vanished => return Err(IntakeError::Vanished(path.to_path_buf())),
            StabilityResult::TimedOutAssumeStable => {
                self.diagnostics.emit(IntakeNotice::Unsettled {
                    path: path.to_path_buf(),
                    result: stability,
                });
            }
            StabilityResult::Stable => {}
        }

        // The last sample may be a poll interval old.
        if !path.exists() {
            return Err(IntakeError::Vanished(path.to_path_buf()));
        }

        let rotation = self.rotator.rotate(path)?;
        self.diagnostics.emit(IntakeNotice::Rotated {
            source: rotation.source.clone(),
            latest: rotation.latest.clone(),
            demoted: rotation.demoted.clone(),
        });

        let latest = rotation.latest.clone();
        self.diagnostics.emit(IntakeNotice::TriggerStarted {
            path: latest.clone(),
            argument: self.trigger.argument_for(&latest),
            dry_run: self.trigger.is_dry_run(),
        });

        let outcome = match self.trigger.trigger(&latest).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let TriggerError::Failed { stdout, stderr, .. } = &e {
                    self.emit_output(&latest, stdout, stderr);
                }
                return Err(e.into());
            }
        };

        match &outcome {
            TriggerOutcome::Completed { stdout, stderr } => {
                self.emit_output(&latest, stdout, stderr)
            }
            TriggerOutcome::DryRun => self.emit_output(&latest, outcome.stdout(), ""),
        }
        self.diagnostics
            .emit(IntakeNotice::TriggerCompleted { path: latest });

        Ok(ProcessedFile {
            stability,
            rotation,
            outcome,
        })
    }

    fn emit_output(&self, path: &std::path::Path, stdout: &str, stderr: &str) {
        if stdout.is_empty() && stderr.is_empty() {
            return;
        }
        self.diagnostics.emit(IntakeNotice::TriggerOutput {
            path: path.to_path_buf(),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        });
    }
}
