//! Queue, worker and controller working together, without a live watcher.

use file_intake::diagnostics::{Diagnostics, IntakeNotice};
use file_intake::intake::{
    IntakeEvent, IntakeQueue, IntakeWorker, StabilityDetector, WatchController, WatchTarget,
};
use file_intake::rotation::{LatestMarker, LatestRotator, TimestampLayout};
use file_intake::trigger::{ActionTrigger, RecordingTrigger, TriggerError, TriggerOutcome};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::broadcast;

/// Takes `delay` per file, so a shutdown can land mid-trigger.
struct SlowTrigger {
    delay: Duration,
}

#[async_trait::async_trait]
impl ActionTrigger for SlowTrigger {
    fn argument_for(&self, path: &Path) -> String {
        path.display().to_string()
    }

    async fn trigger(&self, _path: &Path) -> Result<TriggerOutcome, TriggerError> {
        tokio::time::sleep(self.delay).await;
        Ok(TriggerOutcome::Completed {
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// A controller and worker over `files`, all queued before the worker starts.
fn slow_pipeline(
    dir: &Path,
    files: &[PathBuf],
    delay: Duration,
    shutdown_timeout: Duration,
) -> (WatchController, IntakeWorker, broadcast::Receiver<IntakeNotice>) {
    let queue = IntakeQueue::new();
    let (diagnostics, rx) = Diagnostics::new(64);
    let controller = WatchController::new(
        WatchTarget::new(dir, ["txt"]),
        queue.clone(),
        diagnostics.clone(),
    )
    .shutdown_timeout(shutdown_timeout);

    let worker = IntakeWorker::new(
        queue,
        StabilityDetector::new(Duration::from_secs(1), Duration::from_millis(20)),
        LatestRotator::new(dir, TimestampLayout::Hyphenated)
            .with_echoes(controller.echoes().clone()),
        Arc::new(SlowTrigger { delay }),
        diagnostics,
    );

    for path in files {
        fs::write(path, "data").unwrap();
        assert!(controller.router().route(path.clone(), false));
    }
    (controller, worker, rx)
}

async fn wait_for_trigger_start(rx: &mut broadcast::Receiver<IntakeNotice>) {
    loop {
        let notice = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for the trigger to start")
            .expect("diagnostics channel closed");
        if matches!(notice, IntakeNotice::TriggerStarted { .. }) {
            return;
        }
    }
}

fn marked_files(dir: &Path) -> Vec<PathBuf> {
    let marker = LatestMarker::default();
    let mut marked: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_file() && marker.is_marked(path))
        .collect();
    marked.sort();
    marked
}

async fn collect_until_completed(
    rx: &mut broadcast::Receiver<IntakeNotice>,
    expected: usize,
) -> Vec<IntakeNotice> {
    let mut notices = Vec::new();
    let mut completed = 0;
    while completed < expected {
        let notice = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for notices")
            .expect("diagnostics channel closed");
        if matches!(notice, IntakeNotice::TriggerCompleted { .. }) {
            completed += 1;
        }
        notices.push(notice);
    }
    notices
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_files_processed_in_arrival_order_while_first_is_still_growing() {
    let temp = tempdir().unwrap();
    let dir = temp.path().to_path_buf();
    let p1 = dir.join("p1.txt");
    let p2 = dir.join("p2.txt");
    let p3 = dir.join("p3.txt");
    for path in [&p1, &p2, &p3] {
        fs::write(path, "start").unwrap();
    }

    let growing = p1.clone();
    let writer = tokio::spawn(async move {
        for _ in 0..25 {
            if let Ok(mut file) = OpenOptions::new().append(true).open(&growing) {
                let _ = file.write_all(b"more data");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let queue = IntakeQueue::new();
    let (diagnostics, mut rx) = Diagnostics::new(64);
    let trigger = Arc::new(RecordingTrigger::new());
    let worker = IntakeWorker::new(
        queue.clone(),
        StabilityDetector::new(Duration::from_secs(3), Duration::from_millis(50)),
        LatestRotator::new(&dir, TimestampLayout::Compact),
        trigger.clone(),
        diagnostics.clone(),
    );

    queue.push(IntakeEvent::created(p1.clone())).unwrap();
    let handle = worker.spawn();

    // P2 and P3 arrive while P1 is still being checked for stability.
    let mut notices = Vec::new();
    loop {
        let notice = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for p1 to be dequeued")
            .expect("diagnostics channel closed");
        let started = matches!(&notice, IntakeNotice::Processing { path } if path == &p1);
        notices.push(notice);
        if started {
            break;
        }
    }
    queue.push(IntakeEvent::created(p2.clone())).unwrap();
    queue.push(IntakeEvent::created(p3.clone())).unwrap();
    assert!(!writer.is_finished());

    notices.extend(collect_until_completed(&mut rx, 3).await);
    writer.await.unwrap();

    let rotated_sources: Vec<PathBuf> = notices
        .iter()
        .filter_map(|notice| match notice {
            IntakeNotice::Rotated { source, .. } => Some(source.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(rotated_sources, vec![p1.clone(), p2.clone(), p3.clone()]);
    assert!(!notices
        .iter()
        .any(|n| matches!(n, IntakeNotice::Failed { .. })));

    assert!(queue.close().is_empty());
    let stats = handle.await.unwrap();
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.failed, 0);

    // The last arrival holds the marker and nothing else does.
    let triggered = trigger.triggered();
    assert_eq!(triggered.len(), 3);
    let marked = marked_files(&dir);
    assert_eq!(marked, vec![triggered[2].clone()]);
    assert_eq!(fs::read_dir(&dir).unwrap().count(), 3);
}

#[tokio::test]
async fn test_one_marker_after_every_rotation() {
    let temp = tempdir().unwrap();
    let rotator = LatestRotator::new(temp.path(), TimestampLayout::Hyphenated);

    for i in 0..5 {
        let incoming = temp.path().join(format!("incoming-{i}.log"));
        fs::write(&incoming, format!("file {i}")).unwrap();

        let rotation = rotator.rotate(&incoming).unwrap();
        assert_eq!(marked_files(temp.path()), vec![rotation.latest.clone()]);
        assert_eq!(fs::read_to_string(&rotation.latest).unwrap(), format!("file {i}"));
    }

    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 5);
}

#[tokio::test]
async fn test_vanished_file_does_not_block_the_next() {
    let temp = tempdir().unwrap();
    let gone = temp.path().join("gone.txt");
    let kept = temp.path().join("kept.txt");
    fs::write(&kept, "data").unwrap();

    let queue = IntakeQueue::new();
    let (diagnostics, mut rx) = Diagnostics::new(64);
    let trigger = Arc::new(RecordingTrigger::new());
    let worker = IntakeWorker::new(
        queue.clone(),
        StabilityDetector::new(Duration::from_secs(1), Duration::from_millis(20)),
        LatestRotator::new(temp.path(), TimestampLayout::Hyphenated),
        trigger.clone(),
        diagnostics,
    );

    queue.push(IntakeEvent::created(gone.clone())).unwrap();
    queue.push(IntakeEvent::created(kept)).unwrap();
    let handle = worker.spawn();

    let notices = collect_until_completed(&mut rx, 1).await;
    assert!(notices.iter().any(|n| matches!(
        n,
        IntakeNotice::Failed { path, .. } if path == &gone
    )));

    queue.close();
    let stats = handle.await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(trigger.triggered().len(), 1);
}

#[tokio::test]
async fn test_stop_reports_abandoned_files() {
    let temp = tempdir().unwrap();
    let queue = IntakeQueue::new();
    let (diagnostics, mut rx) = Diagnostics::new(64);
    let target = WatchTarget::new(temp.path(), ["txt"]);
    let mut controller = WatchController::new(target, queue.clone(), diagnostics)
        .shutdown_timeout(Duration::from_millis(200));

    let a = temp.path().join("a.txt");
    let b = temp.path().join("b.txt");
    assert!(controller.router().route(a.clone(), false));
    assert!(controller.router().route(b.clone(), false));
    assert_eq!(queue.len(), 2);

    let report = controller.stop().await;
    assert_eq!(report.abandoned, vec![a.clone(), b.clone()]);
    assert!(report.worker_joined);
    assert!(report.stats.is_none());
    assert!(queue.is_closed());

    // Arrivals after shutdown are refused rather than queued.
    assert!(!controller.router().route(temp.path().join("c.txt"), false));

    let mut abandoned = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        if let IntakeNotice::Abandoned { path } = notice {
            abandoned.push(path);
        }
    }
    assert_eq!(abandoned, vec![a, b]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_lets_in_flight_file_finish() {
    let temp = tempdir().unwrap();
    let a = temp.path().join("a.txt");
    let b = temp.path().join("b.txt");
    let (mut controller, worker, mut rx) = slow_pipeline(
        temp.path(),
        &[a.clone(), b.clone()],
        Duration::from_millis(300),
        Duration::from_secs(5),
    );

    controller.start(worker).unwrap();
    assert!(controller.is_running());
    wait_for_trigger_start(&mut rx).await;

    let report = controller.stop().await;

    assert!(report.worker_joined);
    assert_eq!(report.abandoned, vec![b.clone()]);
    let stats = report.stats.expect("worker joined with stats");
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);
    assert!(!controller.is_running());

    // The in-flight file was rotated; the abandoned one was left alone.
    assert_eq!(marked_files(temp.path()).len(), 1);
    assert!(!a.exists());
    assert!(b.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_abandons_worker_after_join_timeout() {
    let temp = tempdir().unwrap();
    let a = temp.path().join("a.txt");
    let b = temp.path().join("b.txt");
    let c = temp.path().join("c.txt");
    let (mut controller, worker, mut rx) = slow_pipeline(
        temp.path(),
        &[a.clone(), b.clone(), c.clone()],
        Duration::from_secs(30),
        Duration::from_millis(200),
    );

    controller.start(worker).unwrap();
    wait_for_trigger_start(&mut rx).await;

    let report = tokio::time::timeout(Duration::from_secs(5), controller.stop())
        .await
        .expect("stop did not honor its join timeout");

    assert!(!report.worker_joined);
    assert!(report.stats.is_none());
    assert_eq!(report.abandoned, vec![b, c]);
}
