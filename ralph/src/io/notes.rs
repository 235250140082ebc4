//! Append-only notes journal (`.ralph/notes.md`).

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, warn};

/// Journal content handed to the agent before anything has been recorded.
pub const NO_NOTES: &str = "No notes yet.";

const HEADER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append one section for `iteration`. Prior content is never touched.
pub fn append_notes(path: &Path, text: &str, iteration: u64) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open notes {}", path.display()))?;
    let timestamp = Local::now().format(HEADER_TIME_FORMAT).to_string();
    let entry = format_entry(text, iteration, &timestamp);
    file.write_all(entry.as_bytes())
        .with_context(|| format!("write notes {}", path.display()))?;
    debug!(iteration, bytes = entry.len(), "notes appended");
    Ok(())
}

fn format_entry(text: &str, iteration: u64, timestamp: &str) -> String {
    format!("\n## Iteration {iteration} ({timestamp})\n{text}\n")
}

/// Current journal content, or [`NO_NOTES`] when there is none to show.
///
/// An unreadable journal only costs the agent its history, so it degrades to
/// the placeholder with a warning.
pub fn read_notes_or_default(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => NO_NOTES.to_string(),
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => NO_NOTES.to_string(),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "unreadable notes journal");
            NO_NOTES.to_string()
        }
    }
}
