//! Per-request bookkeeping of every path a request creates.
//!
//! Each request owns one tracker. A path leaves the tracker either by
//! `release` (it became part of the result) or by `sweep` (it is deleted).

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TempStage {
    Scratch,
    Upload,
    Scan,
    Language,
    Image,
    Split,
    Ocr,
    /// Moved into the output directory, pending the final response.
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TempResource {
    pub path: PathBuf,
    pub stage: TempStage,
}

#[derive(Debug, Default)]
pub struct TempTracker {
    entries: Vec<TempResource>,
    swept: bool,
}

impl TempTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `path`. Registering a tracked path again is a no-op.
    pub fn register(&mut self, path: impl Into<PathBuf>, stage: TempStage) {
        let path = path.into();
        if self.contains(&path) {
            return;
        }
        debug!(path = %path.display(), ?stage, "tracking temp resource");
        self.entries.push(TempResource { path, stage });
    }

    /// Stops tracking `path` without touching the filesystem.
    pub fn release(&mut self, path: &Path) -> Option<TempResource> {
        let idx = self.entries.iter().position(|e| e.path == path)?;
        Some(self.entries.remove(idx))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    pub fn tracked(&self) -> &[TempResource] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_swept(&self) -> bool {
        self.swept
    }

    /// Deletes every tracked path, newest first. Failures are logged and
    /// swallowed. Returns how many paths could not be removed.
    pub fn sweep(&mut self) -> usize {
        self.swept = true;
        let mut failures = 0;
        while let Some(entry) = self.entries.pop() {
            if let Err(err) = remove_path(&entry.path) {
                failures += 1;
                warn!(
                    path = %entry.path.display(),
                    stage = ?entry.stage,
                    "failed to remove temp resource: {err}"
                );
            }
        }
        failures
    }
}

impl Drop for TempTracker {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            self.sweep();
        }
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
