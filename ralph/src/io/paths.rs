//! Canonical paths inside `.ralph/` for a working directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// All loop-owned paths for a project root.
#[derive(Debug, Clone)]
pub struct RalphPaths {
    pub root: PathBuf,
    pub ralph_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub notes_path: PathBuf,
    pub lock_path: PathBuf,
}

impl RalphPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let ralph_dir = root.join(".ralph");
        Self {
            root: root.clone(),
            ralph_dir: ralph_dir.clone(),
            config_path: ralph_dir.join("config.toml"),
            state_path: ralph_dir.join("state.json"),
            notes_path: ralph_dir.join("notes.md"),
            lock_path: ralph_dir.join("lock"),
        }
    }

    /// Resolve a user-supplied input file against the root (absolute paths pass through).
    pub fn resolve(&self, file: impl AsRef<Path>) -> PathBuf {
        self.root.join(file)
    }

    /// Create `.ralph/` if it does not exist yet.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.ralph_dir)
            .with_context(|| format!("create directory {}", self.ralph_dir.display()))
    }
}
