//! The `-latest` naming convention.
//!
//! The marker is not stored anywhere: a file "is latest" when its name stem
//! contains the marker token. These helpers are pure path manipulation and
//! never touch the filesystem.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Token appended to (and stripped from) a file's name stem.
pub const LATEST_TOKEN: &str = "-latest";

/// Naming convention identifying the single "current" file in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestMarker {
    token: String,
}

impl LatestMarker {
    /// Create a marker with a custom token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The marker token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the path's stem contains the marker token.
    ///
    /// Stems that are not valid UTF-8 are never considered marked.
    pub fn is_marked(&self, path: &Path) -> bool {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(|stem| stem.contains(&self.token))
            .unwrap_or(false)
    }

    /// Path the file would have with every marker occurrence removed from its stem.
    ///
    /// Parent directory and extension are preserved. Returns `None` when the
    /// stem is not UTF-8 or does not carry the marker.
    pub fn stripped(&self, path: &Path) -> Option<PathBuf> {
        let stem = path.file_stem()?.to_str()?;
        if !stem.contains(&self.token) {
            return None;
        }

        let mut name = OsString::from(stem.replace(&self.token, ""));
        if let Some(ext) = path.extension() {
            name.push(".");
            name.push(ext);
        }
        Some(with_file_name(path, name))
    }

    /// Path for a freshly marked file: `<timestamp><token><original extension>`
    /// in the same directory as `path`.
    pub fn marked(&self, path: &Path, timestamp: &str) -> PathBuf {
        let mut name = OsString::from(format!("{}{}", timestamp, self.token));
        if let Some(ext) = path.extension() {
            name.push(".");
            name.push(ext);
        }
        with_file_name(path, name)
    }
}

impl Default for LatestMarker {
    fn default() -> Self {
        Self::new(LATEST_TOKEN)
    }
}

/// Insert `-N` between stem and extension: `a.txt` -> `a-2.txt`.
pub(crate) fn with_counter(path: &Path, counter: u32) -> PathBuf {
    let mut name = path.file_stem().map(OsString::from).unwrap_or_default();
    name.push(format!("-{}", counter));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    with_file_name(path, name)
}

fn with_file_name(path: &Path, name: OsString) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}
