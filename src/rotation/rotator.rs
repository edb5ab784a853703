//! Latest-file rotation.
//!
//! Moves the `-latest` marker from whatever file currently carries it onto an
//! incoming file. The rotator holds no lock: callers must serialize rotations
//! for a directory (the intake worker does this by processing one file at a
//! time).

use crate::rotation::echoes::RenameEchoes;
use crate::rotation::marker::{with_counter, LatestMarker};
use crate::rotation::timestamp::TimestampLayout;
use chrono::{Local, NaiveDateTime};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on `-N` suffixes tried when a demoted name is already taken.
const MAX_NAME_COUNTER: u32 = 1000;

/// Errors raised while rotating the marker.
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("Failed to scan directory {path}: {source}")]
    Scan { path: PathBuf, source: io::Error },

    #[error("Failed to rename {from} -> {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("No free name for {0}")]
    NameExhausted(PathBuf),
}

/// Outcome of a completed rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    /// The incoming file as it was named before rotation.
    pub source: PathBuf,
    /// Where the incoming file now lives, carrying the marker.
    pub latest: PathBuf,
    /// Previously marked files and their new, unmarked paths.
    pub demoted: Vec<(PathBuf, PathBuf)>,
}

/// Maintains the "at most one marked file" invariant for one directory.
#[derive(Debug, Clone)]
pub struct LatestRotator {
    dir: PathBuf,
    layout: TimestampLayout,
    marker: LatestMarker,
    echoes: Option<RenameEchoes>,
}

impl LatestRotator {
    /// Create a rotator for `dir` using the default `-latest` marker.
    pub fn new(dir: impl Into<PathBuf>, layout: TimestampLayout) -> Self {
        Self {
            dir: dir.into(),
            layout,
            marker: LatestMarker::default(),
            echoes: None,
        }
    }

    /// Record every rename destination in `echoes` before renaming.
    pub fn with_echoes(mut self, echoes: RenameEchoes) -> Self {
        self.echoes = Some(echoes);
        self
    }

    /// Files in the directory whose stem carries the marker, sorted by name.
    pub fn find_marked(&self) -> Result<Vec<PathBuf>, RotationError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| RotationError::Scan {
            path: self.dir.clone(),
            source,
        })?;

        let mut marked: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && self.marker.is_marked(p))
            .collect();
        marked.sort();
        Ok(marked)
    }

    /// Rotate the marker onto `new_path`, stamping it with the current local time.
    pub fn rotate(&self, new_path: &Path) -> Result<Rotation, RotationError> {
        self.rotate_at(new_path, &Local::now().naive_local())
    }

    /// Rotate the marker onto `new_path`, stamping it with `at`.
    ///
    /// Any marked file other than `new_path` is demoted first. A failed rename
    /// aborts the rotation; renames already performed are not undone.
    pub fn rotate_at(
        &self,
        new_path: &Path,
        at: &NaiveDateTime,
    ) -> Result<Rotation, RotationError> {
        let marked = self.find_marked()?;
        if marked.len() > 1 {
            tracing::warn!(
                "Found {} marked files in {}, demoting all of them",
                marked.len(),
                self.dir.display()
            );
        }

        let mut demoted = Vec::new();
        for existing in marked.into_iter().filter(|p| p != new_path) {
            let target = self.demote(&existing)?;
            demoted.push((existing, target));
        }

        let timestamp = self.layout.format(at);
        let latest = self.marker.marked(new_path, &timestamp);

        tracing::info!(
            "Renaming new file: {} -> {}",
            display_name(new_path),
            display_name(&latest)
        );
        self.rename(new_path, &latest)?;

        Ok(Rotation {
            source: new_path.to_path_buf(),
            latest,
            demoted,
        })
    }

    fn demote(&self, existing: &Path) -> Result<PathBuf, RotationError> {
        let stripped = self
            .marker
            .stripped(existing)
            .ok_or_else(|| RotationError::NameExhausted(existing.to_path_buf()))?;
        let target = free_name(&stripped)?;

        tracing::info!(
            "Removing {} suffix: {} -> {}",
            self.marker.token(),
            display_name(existing),
            display_name(&target)
        );
        self.rename(existing, &target)?;
        Ok(target)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), RotationError> {
        if let Some(echoes) = &self.echoes {
            echoes.record(to);
        }
        fs::rename(from, to).map_err(|source| {
            if let Some(echoes) = &self.echoes {
                echoes.take(to);
            }
            RotationError::Rename {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            }
        })
    }
}

/// `path` itself if nothing exists there, otherwise the first free `-N` variant.
fn free_name(path: &Path) -> Result<PathBuf, RotationError> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    (1..=MAX_NAME_COUNTER)
        .map(|n| with_counter(path, n))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| RotationError::NameExhausted(path.to_path_buf()))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
