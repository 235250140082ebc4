//! Iteration history persisted in `.ralph/state.json`.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::rate_limit;

/// Persisted bookkeeping shared by every run in a working directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunState {
    /// Lifetime iteration counter. Never reset by a run.
    pub total_iterations: u64,
    /// Completion instants (unix seconds) of non-terminal iterations.
    pub timestamps: Vec<i64>,
    /// When the last iteration was recorded.
    pub last_run: Option<DateTime<Utc>>,
}

impl RunState {
    /// Record a finished iteration at `now` and drop history older than a day.
    pub fn record_iteration(&mut self, now: DateTime<Utc>) {
        let secs = now.timestamp();
        self.timestamps.push(secs);
        self.last_run = Some(now);
        rate_limit::prune(&mut self.timestamps, secs);
    }
}

/// Load run state, falling back to the default when it is missing or unreadable.
///
/// A corrupt file is not fatal: rate limiting is advisory, so losing the
/// history only loosens the limiter until new timestamps accumulate.
pub fn load_or_default(path: &Path) -> RunState {
    debug!(path = %path.display(), "loading run state");
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return RunState::default(),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "unreadable run state, starting fresh");
            return RunState::default();
        }
    };
    match serde_json::from_str::<RunState>(&contents) {
        Ok(state) => {
            debug!(
                total_iterations = state.total_iterations,
                timestamps = state.timestamps.len(),
                "run state loaded"
            );
            state
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "corrupt run state, starting fresh");
            RunState::default()
        }
    }
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(
        path = %path.display(),
        total_iterations = state.total_iterations,
        "writing run state"
    );
    let mut buf = serde_json::to_string_pretty(state).context("serialize run state")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run state {}", path.display()))?;
    Ok(())
}
