//! Write-completion detection by size polling.
//!
//! There is no portable "writer closed the file" notification, so a file is
//! considered fully written once two consecutive size samples agree.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a stability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityResult {
    /// Two consecutive samples returned the same size.
    Stable,
    /// The file disappeared before it stabilized.
    Vanished,
    /// The timeout elapsed while the size was still changing. Processing
    /// continues as if the file were stable.
    TimedOutAssumeStable,
}

impl StabilityResult {
    /// Whether processing should continue with this file.
    pub fn should_proceed(self) -> bool {
        !matches!(self, StabilityResult::Vanished)
    }
}

impl fmt::Display for StabilityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StabilityResult::Stable => "stable",
            StabilityResult::Vanished => "vanished",
            StabilityResult::TimedOutAssumeStable => "timed-out-assume-stable",
        })
    }
}

/// Source of file size samples.
pub trait SizeProbe {
    /// Current size of `path`, or `None` if it no longer exists.
    fn size(&mut self, path: &Path) -> io::Result<Option<u64>>;
}

/// Samples sizes from the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl SizeProbe for FsProbe {
    fn size(&mut self, path: &Path) -> io::Result<Option<u64>> {
        match fs::metadata(path) {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Polls a file's size until it stops changing or a timeout elapses.
#[derive(Debug, Clone, Copy)]
pub struct StabilityDetector {
    timeout: Duration,
    poll_interval: Duration,
}

impl StabilityDetector {
    /// Create a detector.
    ///
    /// # Arguments
    /// * `timeout` - Total time to wait for the size to settle
    /// * `poll_interval` - Time between size samples
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Check `path` against the filesystem.
    pub async fn check(&self, path: &Path) -> io::Result<StabilityResult> {
        self.check_with(&mut FsProbe, path).await
    }

    /// Check `path` using the given size source.
    ///
    /// The first sample has nothing to compare against, so at least one poll
    /// interval always elapses before `Stable` can be returned.
    pub async fn check_with<P>(&self, probe: &mut P, path: &Path) -> io::Result<StabilityResult>
    where
        P: SizeProbe + Send,
    {
        tracing::debug!("Waiting for file stability: {}", path.display());
        let start = Instant::now();
        let mut previous: Option<u64> = None;

        while start.elapsed() < self.timeout {
            let Some(size) = probe.size(path)? else {
                tracing::warn!(
                    "File disappeared during stability check: {}",
                    path.display()
                );
                return Ok(StabilityResult::Vanished);
            };

            if previous == Some(size) {
                tracing::debug!("File stable at {} bytes: {}", size, path.display());
                return Ok(StabilityResult::Stable);
            }

            previous = Some(size);
            tokio::time::sleep(self.poll_interval).await;
        }

        tracing::warn!(
            "File stability check timeout after {:?}: {}",
            self.timeout,
            path.display()
        );
        Ok(StabilityResult::TimedOutAssumeStable)
    }
}

impl Default for StabilityDetector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_millis(100))
    }
}
