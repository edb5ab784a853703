//! Service wiring: configuration in, running pipeline out.

use crate::config::ServiceConfig;
use crate::diagnostics::{Diagnostics, IntakeNotice};
use crate::intake::{
    IntakeEvent, IntakeQueue, IntakeWorker, ShutdownReport, StabilityDetector, WatchController,
    WatchTarget, WatcherError,
};
use crate::rotation::timestamp::looks_like_timestamp;
use crate::rotation::{LatestMarker, LatestRotator};
use crate::trigger::{ActionTrigger, CommandTrigger};
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;

/// How often the run loop checks that the watch directory still exists.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Notices buffered for slow diagnostics subscribers.
const DIAGNOSTICS_BUFFER: usize = 256;

/// Why [`IntakeService::run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown future completed.
    Requested,
    /// The watch directory disappeared.
    WatchDirectoryGone,
}

/// The assembled intake pipeline for one watch directory.
pub struct IntakeService {
    config: ServiceConfig,
    diagnostics: Diagnostics,
    controller: WatchController,
    worker: Option<IntakeWorker>,
    command: Option<CommandTrigger>,
}

impl IntakeService {
    /// Build the pipeline with the configured external command as trigger.
    pub fn new(config: ServiceConfig) -> Self {
        let command = CommandTrigger::new(
            config.trigger_command.clone(),
            config.trigger_args.clone(),
            config.claude_prompt.clone(),
        )
        .timeout(config.trigger_timeout())
        .dry_run(config.dry_run);

        let mut service = Self::with_trigger(config, Arc::new(command.clone()));
        service.command = Some(command);
        service
    }

    /// Build the pipeline with a custom trigger.
    pub fn with_trigger(config: ServiceConfig, trigger: Arc<dyn ActionTrigger>) -> Self {
        let (diagnostics, _) = Diagnostics::new(DIAGNOSTICS_BUFFER);
        let queue = IntakeQueue::new();

        let target = WatchTarget::new(&config.watch_path, &config.file_extensions);
        let controller = WatchController::new(target, queue.clone(), diagnostics.clone())
            .shutdown_timeout(config.shutdown_timeout());

        let rotator = LatestRotator::new(&config.watch_path, config.timestamp_format)
            .with_echoes(controller.echoes().clone());
        let worker = IntakeWorker::new(
            queue,
            StabilityDetector::new(config.stability_timeout(), config.stability_interval()),
            rotator,
            trigger,
            diagnostics.clone(),
        );

        Self {
            config,
            diagnostics,
            controller,
            worker: Some(worker),
            command: None,
        }
    }

    /// The effective configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The diagnostics sink shared by every component.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Subscribe to pipeline notices.
    pub fn subscribe(&self) -> broadcast::Receiver<IntakeNotice> {
        self.diagnostics.subscribe()
    }

    /// Whether the native watcher could not be used and polling is in effect.
    pub fn is_using_polling(&self) -> bool {
        self.controller.is_using_polling()
    }

    /// Check that the external command can be run. Always true in dry-run
    /// mode or with a custom trigger.
    pub async fn trigger_available(&self) -> bool {
        match &self.command {
            Some(command) if !self.config.dry_run => command.check_available().await,
            _ => true,
        }
    }

    /// Queue pre-existing files if configured, then start watching.
    pub fn start(&mut self) -> Result<(), WatcherError> {
        let worker = self.worker.take().ok_or(WatcherError::AlreadyStarted)?;

        if self.config.process_existing_files {
            match self.queue_existing_files() {
                Ok(0) => tracing::info!("No existing files to process"),
                Ok(count) => tracing::info!("Queued {} existing file(s)", count),
                Err(e) => tracing::error!("Failed to scan for existing files: {}", e),
            }
        }

        self.controller.start(worker)?;
        tracing::info!("Watching {}", self.config.watch_path.display());
        Ok(())
    }

    /// Queue files already in the watch directory, oldest first.
    pub fn queue_existing_files(&self) -> io::Result<usize> {
        let candidates = existing_candidates(self.controller.target(), &LatestMarker::default())?;
        let router = self.controller.router();
        Ok(candidates
            .into_iter()
            .filter(|path| router.enqueue(IntakeEvent::existing(path.clone())))
            .count())
    }

    /// Run until `shutdown` completes or the watch directory disappears, then stop.
    pub async fn run_until<F>(&mut self, shutdown: F) -> (StopReason, ShutdownReport)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);

        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break StopReason::Requested;
                }
                _ = liveness.tick() => {
                    if !self.config.watch_path.exists() {
                        tracing::error!(
                            "Watch directory no longer exists: {}",
                            self.config.watch_path.display()
                        );
                        break StopReason::WatchDirectoryGone;
                    }
                }
            }
        };

        (reason, self.stop().await)
    }

    /// Stop watching and wind down the worker.
    pub async fn stop(&mut self) -> ShutdownReport {
        tracing::info!("Stopping intake service...");
        let report = self.controller.stop().await;
        tracing::info!(
            abandoned = report.abandoned.len(),
            worker_joined = report.worker_joined,
            "Intake service stopped"
        );
        report
    }
}

/// Regular files in the target directory that pass the extension filter and
/// do not already look rotated, sorted by modification time.
fn existing_candidates(target: &WatchTarget, marker: &LatestMarker) -> io::Result<Vec<PathBuf>> {
    let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();

    for entry in fs::read_dir(target.dir())? {
        let path = entry?.path();
        if !path.is_file() || !target.should_process(&path) {
            continue;
        }
        if marker.is_marked(&path) || stem_looks_rotated(&path) {
            tracing::debug!("Skipping already processed file: {}", path.display());
            continue;
        }
        let modified = fs::metadata(&path)?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push((modified, path));
    }

    candidates.sort();
    Ok(candidates.into_iter().map(|(_, path)| path).collect())
}

fn stem_looks_rotated(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(looks_like_timestamp)
        .unwrap_or(false)
}
