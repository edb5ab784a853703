//! Watch controller: filesystem notifications in, intake events out.
//!
//! Notification callbacks run on the notify backend's own thread. The only
//! thing done there is filtering and pushing onto the intake queue, so slow
//! processing can never hold up notification delivery. If the native backend
//! cannot watch the directory (NFS, some WSL mounts) a polling watcher is used
//! instead.
//!
//! A file moved in from elsewhere counts as created. A rename inside the
//! directory does not.

use crate::diagnostics::{Diagnostics, IntakeNotice, SkipReason};
use crate::intake::queue::{IntakeEvent, IntakeQueue};
use crate::intake::worker::{IntakeWorker, WorkerStats};
use crate::rotation::RenameEchoes;
use notify::{
    event::{CreateKind, ModifyKind, RenameMode},
    Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors that can occur while subscribing to notifications.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Failed to create watcher: {0}")]
    WatcherCreation(#[from] notify::Error),

    #[error("Failed to watch path {path}: {source}")]
    WatchPath {
        path: PathBuf,
        source: notify::Error,
    },

    #[error("Watch controller already started")]
    AlreadyStarted,
}

/// The watched directory and which files in it are of interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    dir: PathBuf,
    extensions: BTreeSet<String>,
}

impl WatchTarget {
    /// Watch `dir`, accepting only the given extensions (empty = all files).
    ///
    /// Extensions are matched case-insensitively and may be given with or
    /// without the leading dot.
    pub fn new<I, S>(dir: impl Into<PathBuf>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            dir: dir.into(),
            extensions: extensions
                .into_iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .collect(),
        }
    }

    /// The watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Normalized extension filter (lowercase, leading dot).
    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    /// Always non-recursive: only the directory's immediate entries matter.
    pub fn recursive_mode(&self) -> RecursiveMode {
        RecursiveMode::NonRecursive
    }

    /// Whether a file at `path` passes the extension filter.
    pub fn should_process(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&normalize_extension(e)))
            .unwrap_or(false)
    }
}

/// `"TXT"` and `".txt"` both become `".txt"`.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// Rename cookies kept while waiting for the matching `To` half.
const MAX_PENDING_MOVES: usize = 1024;

/// Filters create notifications and feeds the intake queue.
#[derive(Debug, Clone)]
pub struct CreateRouter {
    target: Arc<WatchTarget>,
    queue: IntakeQueue,
    diagnostics: Diagnostics,
    echoes: RenameEchoes,
    pending_moves: Arc<Mutex<HashSet<usize>>>,
}

impl CreateRouter {
    /// Create a router pushing onto `queue`.
    pub fn new(target: Arc<WatchTarget>, queue: IntakeQueue, diagnostics: Diagnostics) -> Self {
        Self {
            target,
            queue,
            diagnostics,
            echoes: RenameEchoes::new(),
            pending_moves: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Rename destinations this router will not queue.
    pub fn echoes(&self) -> &RenameEchoes {
        &self.echoes
    }

    /// Handle a raw notify event.
    ///
    /// Creates are routed, and so is the arriving half of a move whose
    /// departing half was not seen here. Everything else is ignored.
    pub fn handle_event(&self, event: Event) {
        match event.kind {
            EventKind::Create(kind) => {
                for path in event.paths {
                    let is_dir = match kind {
                        CreateKind::Folder => true,
                        CreateKind::File => false,
                        _ => path.is_dir(),
                    };
                    self.route(path, is_dir);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                if let Some(cookie) = event.tracker() {
                    let mut pending = self
                        .pending_moves
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    if pending.len() >= MAX_PENDING_MOVES {
                        pending.clear();
                    }
                    pending.insert(cookie);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                if self.is_internal_move(&event) {
                    return;
                }
                for path in event.paths {
                    let is_dir = path.is_dir();
                    self.route(path, is_dir);
                }
            }
            _ => {}
        }
    }

    /// True if the departing half of this move happened in the watched directory.
    fn is_internal_move(&self, event: &Event) -> bool {
        let Some(cookie) = event.tracker() else {
            return false;
        };
        self.pending_moves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&cookie)
    }

    /// Queue `path` unless it is a directory or filtered out.
    ///
    /// Returns whether the path was queued.
    pub fn route(&self, path: PathBuf, is_dir: bool) -> bool {
        if is_dir {
            self.skip(path, SkipReason::Directory);
            return false;
        }
        if !self.target.should_process(&path) {
            self.skip(path, SkipReason::Extension);
            return false;
        }
        if self.echoes.take(&path) {
            self.skip(path, SkipReason::OwnRename);
            return false;
        }

        self.enqueue(IntakeEvent::created(path))
    }

    /// Push an already-built event, reporting if the queue is closed.
    pub fn enqueue(&self, event: IntakeEvent) -> bool {
        let path = event.path.clone();
        let origin = event.origin;
        match self.queue.push(event) {
            Ok(()) => {
                self.diagnostics
                    .emit(IntakeNotice::Detected { path, origin });
                true
            }
            Err(closed) => {
                self.skip(closed.0.path, SkipReason::QueueClosed);
                false
            }
        }
    }

    fn skip(&self, path: PathBuf, reason: SkipReason) {
        self.diagnostics.emit(IntakeNotice::Skipped { path, reason });
    }
}

/// What happened during [`WatchController::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Files that were still queued and will not be processed.
    pub abandoned: Vec<PathBuf>,
    /// Whether the worker finished within the shutdown timeout.
    pub worker_joined: bool,
    /// Worker counters, when it joined.
    pub stats: Option<WorkerStats>,
}

/// Owns the notification subscription and the worker lifecycle.
pub struct WatchController {
    router: CreateRouter,
    watcher: Option<Box<dyn Watcher + Send>>,
    using_polling: bool,
    worker: Option<JoinHandle<WorkerStats>>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
}

impl WatchController {
    /// Create a controller. Nothing is watched until [`start`](Self::start).
    pub fn new(target: WatchTarget, queue: IntakeQueue, diagnostics: Diagnostics) -> Self {
        Self {
            router: CreateRouter::new(Arc::new(target), queue, diagnostics),
            watcher: None,
            using_polling: false,
            worker: None,
            poll_interval: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Interval used if the polling fallback is needed.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long [`stop`](Self::stop) waits for the worker.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The router that feeds the queue. Also used to queue files found at startup.
    pub fn router(&self) -> &CreateRouter {
        &self.router
    }

    /// Rename destinations to hand to the rotator, so its renames are not
    /// picked up as new files.
    pub fn echoes(&self) -> &RenameEchoes {
        self.router.echoes()
    }

    /// The watch target.
    pub fn target(&self) -> &WatchTarget {
        &self.router.target
    }

    /// Whether the polling fallback is in use.
    pub fn is_using_polling(&self) -> bool {
        self.using_polling
    }

    /// Spawn the worker and subscribe to notifications.
    pub fn start(&mut self, worker: IntakeWorker) -> Result<(), WatcherError> {
        if self.watcher.is_some() || self.worker.is_some() {
            return Err(WatcherError::AlreadyStarted);
        }

        let watcher = self.subscribe()?;
        self.watcher = Some(watcher);
        self.worker = Some(worker.spawn());
        Ok(())
    }

    fn subscribe(&mut self) -> Result<Box<dyn Watcher + Send>, WatcherError> {
        let dir = self.router.target.dir().to_path_buf();
        let mode = self.router.target.recursive_mode();

        let router = self.router.clone();
        let native = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => router.handle_event(event),
                Err(e) => tracing::error!("Watch error: {}", e),
            },
            Config::default(),
        );

        match native {
            Ok(mut native) => match native.watch(&dir, mode) {
                Ok(()) => {
                    tracing::debug!("Using native watcher for {}", dir.display());
                    return Ok(Box::new(native));
                }
                Err(e) => tracing::warn!(
                    "Native watcher failed for {}: {}, falling back to polling",
                    dir.display(),
                    e
                ),
            },
            Err(e) => tracing::warn!("Native watcher unavailable: {}, falling back to polling", e),
        }

        let router = self.router.clone();
        let mut poll = PollWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => router.handle_event(event),
                Err(e) => tracing::error!("Watch error: {}", e),
            },
            Config::default()
                .with_poll_interval(self.poll_interval)
                .with_compare_contents(false),
        )?;
        poll.watch(&dir, mode)
            .map_err(|source| WatcherError::WatchPath {
                path: dir.clone(),
                source,
            })?;

        tracing::debug!("Using poll watcher for {}", dir.display());
        self.using_polling = true;
        Ok(Box::new(poll))
    }

    /// Whether the worker task is still running.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Unsubscribe, close the queue, and wait (bounded) for the worker.
    ///
    /// The file being processed when this is called is allowed to finish.
    /// Everything still queued behind it is abandoned and reported.
    pub async fn stop(&mut self) -> ShutdownReport {
        if let Some(mut watcher) = self.watcher.take() {
            let dir = self.router.target.dir();
            if let Err(e) = watcher.unwatch(dir) {
                tracing::debug!("Unwatch of {} failed: {}", dir.display(), e);
            }
        }

        let abandoned: Vec<PathBuf> = self
            .router
            .queue
            .close()
            .into_iter()
            .map(|event| event.path)
            .collect();
        for path in &abandoned {
            self.router
                .diagnostics
                .emit(IntakeNotice::Abandoned { path: path.clone() });
        }

        let (worker_joined, stats) = match self.worker.take() {
            None => (true, None),
            Some(mut handle) => {
                match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                    Ok(Ok(stats)) => (true, Some(stats)),
                    Ok(Err(e)) => {
                        tracing::error!("Intake worker ended abnormally: {}", e);
                        (false, None)
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Intake worker did not finish within {:?}, abandoning it",
                            self.shutdown_timeout
                        );
                        handle.abort();
                        (false, None)
                    }
                }
            }
        };

        ShutdownReport {
            abandoned,
            worker_joined,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(extensions: &[&str]) -> (CreateRouter, IntakeQueue) {
        let queue = IntakeQueue::new();
        let target = WatchTarget::new("/w", extensions.iter().copied());
        (
            CreateRouter::new(Arc::new(target), queue.clone(), Diagnostics::detached()),
            queue,
        )
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let target = WatchTarget::new("/w", Vec::<String>::new());
        assert!(target.should_process(Path::new("/w/a.txt")));
        assert!(target.should_process(Path::new("/w/no_extension")));
        assert!(target.should_process(Path::new("/w/IMAGE.PNG")));
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let target = WatchTarget::new("/w", ["txt", ".LOG"]);
        assert_eq!(
            target.extensions().iter().cloned().collect::<Vec<_>>(),
            vec![".log".to_string(), ".txt".to_string()]
        );
        assert!(target.should_process(Path::new("/w/a.TXT")));
        assert!(target.should_process(Path::new("/w/b.log")));
        assert!(!target.should_process(Path::new("/w/c.csv")));
        assert!(!target.should_process(Path::new("/w/no_extension")));
    }

    #[test]
    fn test_route_drops_directories_and_filtered_files() {
        let (router, queue) = router(&[".txt"]);

        assert!(!router.route(PathBuf::from("/w/sub.txt"), true));
        assert!(!router.route(PathBuf::from("/w/a.csv"), false));
        assert!(router.route(PathBuf::from("/w/a.txt"), false));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_only_create_events_are_routed() {
        let (router, queue) = router(&[]);

        router.handle_event(
            Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from("/w/a.txt")),
        );
        router.handle_event(
            Event::new(EventKind::Create(CreateKind::Folder)).add_path(PathBuf::from("/w/dir")),
        );
        router.handle_event(
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/w/b.txt")),
        );

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_move_into_directory_is_routed() {
        let (router, queue) = router(&[".txt"]);

        router.handle_event(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
                .add_path(PathBuf::from("/w/moved.txt"))
                .set_tracker(7),
        );

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_rename_within_directory_is_ignored() {
        let (router, queue) = router(&[".txt"]);

        router.handle_event(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
                .add_path(PathBuf::from("/w/a.txt"))
                .set_tracker(9),
        );
        router.handle_event(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
                .add_path(PathBuf::from("/w/b.txt"))
                .set_tracker(9),
        );
        router.handle_event(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(PathBuf::from("/w/a.txt"))
                .add_path(PathBuf::from("/w/b.txt"))
                .set_tracker(9),
        );

        assert!(queue.is_empty());

        // A later move in with a reused cookie is still seen.
        router.handle_event(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
                .add_path(PathBuf::from("/w/c.txt"))
                .set_tracker(9),
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_own_renames_are_not_requeued() {
        let (router, queue) = router(&[".txt"]);
        router
            .echoes()
            .record(Path::new("/w/030524-020709-PM-latest.txt"));

        assert!(!router.route(PathBuf::from("/w/030524-020709-PM-latest.txt"), false));
        assert!(queue.is_empty());

        // The entry is consumed; a genuinely new file at that path is queued.
        assert!(router.route(PathBuf::from("/w/030524-020709-PM-latest.txt"), false));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_route_after_close_reports_skip() {
        let (router, queue) = router(&[]);
        let (diagnostics, mut rx) = Diagnostics::new(8);
        let router = CreateRouter::new(router.target.clone(), queue.clone(), diagnostics);
        queue.close();

        assert!(!router.route(PathBuf::from("/w/late.txt"), false));
        assert_eq!(
            rx.try_recv().unwrap(),
            IntakeNotice::Skipped {
                path: PathBuf::from("/w/late.txt"),
                reason: SkipReason::QueueClosed,
            }
        );
    }
}
