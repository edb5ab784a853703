//! Paths created by the rotator's own renames.
//!
//! Native backends report a rename as a name change, but the polling backend
//! only sees a path disappear and another appear, which arrives as a create.
//! The rotator records each destination here before renaming, and the watch
//! side consumes the entry so the file is not queued a second time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How long a recorded rename stays claimable.
const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Shared record of recent rename destinations.
#[derive(Debug, Clone)]
pub struct RenameEchoes {
    recent: Arc<Mutex<HashMap<PathBuf, Instant>>>,
    ttl: Duration,
}

impl RenameEchoes {
    /// Create an empty record with the default expiry.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create an empty record whose entries expire after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            recent: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Note that `path` is about to be produced by a rename.
    pub fn record(&self, path: &Path) {
        let now = Instant::now();
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        recent.retain(|_, at| now.duration_since(*at) < self.ttl);
        recent.insert(path.to_path_buf(), now);
    }

    /// Consume the entry for `path`. True if it was a live rename echo.
    pub fn take(&self, path: &Path) -> bool {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        match recent.remove(path) {
            Some(at) => at.elapsed() < self.ttl,
            None => false,
        }
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        recent.values().filter(|at| at.elapsed() < self.ttl).count()
    }

    /// True if no unexpired entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RenameEchoes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_consumes_once() {
        let echoes = RenameEchoes::new();
        let path = Path::new("/w/030524-020709-PM-latest.txt");
        echoes.record(path);

        assert!(echoes.take(path));
        assert!(!echoes.take(path));
        assert!(!echoes.take(Path::new("/w/other.txt")));
    }

    #[test]
    fn test_clones_share_entries() {
        let echoes = RenameEchoes::new();
        let other = echoes.clone();
        echoes.record(Path::new("/w/a.txt"));

        assert_eq!(other.len(), 1);
        assert!(other.take(Path::new("/w/a.txt")));
        assert!(echoes.is_empty());
    }

    #[test]
    fn test_expired_entries_are_ignored() {
        let echoes = RenameEchoes::with_ttl(Duration::ZERO);
        echoes.record(Path::new("/w/a.txt"));

        assert!(echoes.is_empty());
        assert!(!echoes.take(Path::new("/w/a.txt")));
    }
}
