//! Unbounded FIFO between notification delivery and the intake worker.
//!
//! Pushing never blocks on processing, so it is safe to call from the
//! notification callback thread. The queue has an explicit closed state:
//! once closed it rejects new events, wakes the consumer, and hands the
//! remaining backlog back to whoever closed it.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Notify;

/// Where an intake event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOrigin {
    /// A create notification from the watch subscription.
    Notification,
    /// A file already present in the directory at startup.
    Existing,
}

/// A file path captured when its creation was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeEvent {
    pub path: PathBuf,
    pub origin: IntakeOrigin,
    pub detected_at: Instant,
}

impl IntakeEvent {
    /// Event for a freshly created file.
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            origin: IntakeOrigin::Notification,
            detected_at: Instant::now(),
        }
    }

    /// Event for a file found at startup.
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            origin: IntakeOrigin::Existing,
            detected_at: Instant::now(),
        }
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returned by [`IntakeQueue::push`] after the queue has been closed.
#[derive(Error)]
#[error("Intake queue is closed")]
pub struct QueueClosed(pub IntakeEvent);

impl fmt::Debug for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueueClosed").field(&self.0.path).finish()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<IntakeEvent>,
    closed: bool,
}

/// Closeable unbounded FIFO of intake events. Cloning shares the queue.
#[derive(Debug, Clone, Default)]
pub struct IntakeQueue {
    state: Arc<Mutex<QueueState>>,
    ready: Arc<Notify>,
}

impl IntakeQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event. Never blocks; fails only when the queue is closed.
    pub fn push(&self, event: IntakeEvent) -> Result<(), QueueClosed> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueClosed(event));
            }
            state.items.push_back(event);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Wait for the next event in FIFO order.
    ///
    /// Returns `None` once the queue is closed, even if events were queued
    /// before the close: those belong to the closer.
    pub async fn pop(&self) -> Option<IntakeEvent> {
        loop {
            let notified = self.ready.notified();
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(event) = state.items.pop_front() {
                    return Some(event);
                }
            }
            notified.await;
        }
    }

    /// Close the queue and take every event still waiting in it.
    ///
    /// Closing twice returns an empty backlog the second time.
    pub fn close(&self) -> Vec<IntakeEvent> {
        let backlog = {
            let mut state = self.lock();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.ready.notify_waiters();
        backlog
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of events waiting.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether no events are waiting.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = IntakeQueue::new();
        for name in ["p1", "p2", "p3"] {
            queue.push(IntakeEvent::created(name)).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(queue.pop().await.unwrap().path);
        }
        assert_eq!(seen, vec![PathBuf::from("p1"), PathBuf::from("p2"), PathBuf::from("p3")]);
    }

    #[tokio::test]
    async fn test_same_path_is_not_deduplicated() {
        let queue = IntakeQueue::new();
        queue.push(IntakeEvent::created("dup.txt")).unwrap();
        queue.push(IntakeEvent::created("dup.txt")).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = IntakeQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(IntakeEvent::created("late.txt")).unwrap();

        let event = consumer.await.unwrap().unwrap();
        assert_eq!(event.path, PathBuf::from("late.txt"));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue = IntakeQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.close().is_empty());

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_close_returns_backlog_and_rejects_pushes() {
        let queue = IntakeQueue::new();
        queue.push(IntakeEvent::created("a")).unwrap();
        queue.push(IntakeEvent::created("b")).unwrap();

        let backlog = queue.close();
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].path, PathBuf::from("a"));
        assert!(queue.is_closed());
        assert!(queue.pop().await.is_none());

        let rejected = queue.push(IntakeEvent::created("c")).unwrap_err();
        assert_eq!(rejected.0.path, PathBuf::from("c"));
        assert!(queue.close().is_empty());
    }
}
