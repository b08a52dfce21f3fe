//! Diagnostic page snapshots.
//!
//! When a login step fails, the current page markup is written to disk so the
//! failure can be inspected after the fact. Snapshots never influence control
//! flow; callers log write errors and move on.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Writes page markup under a stable, human-readable label.
///
/// One file per label, overwritten on repeated failures of the same kind.
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    dir: PathBuf,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save page markup under `<dir>/<label>.html`, returning the path.
    pub fn save(&self, label: &str, html: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create snapshot dir: {}", self.dir.display()))?;

        let path = self.dir.join(format!("{label}.html"));
        std::fs::write(&path, html)
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;

        Ok(path)
    }
}
