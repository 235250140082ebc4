//! Per-iteration prompt assembly.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::io::notes::read_notes_or_default;

const ITERATION_TEMPLATE: &str = include_str!("prompts/iteration.md");

/// Everything an iteration prompt is built from.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub prompt: String,
    pub conventions: String,
    pub specs: String,
    /// File name of the specs input, as the agent should refer to it.
    pub specs_name: String,
    pub notes: String,
    /// Lifetime iteration number.
    pub iteration: u64,
    pub max_iterations: u32,
}

impl PromptInputs {
    /// Read the three required inputs and the notes journal.
    ///
    /// Any unreadable input is fatal; the error names the file.
    pub fn load(
        prompt_path: &Path,
        conventions_path: &Path,
        specs_path: &Path,
        notes_path: &Path,
        iteration: u64,
        max_iterations: u32,
    ) -> Result<Self> {
        Ok(Self {
            prompt: read_input(prompt_path)?,
            conventions: read_input(conventions_path)?,
            specs: read_input(specs_path)?,
            specs_name: specs_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| specs_path.display().to_string()),
            notes: read_notes_or_default(notes_path),
            iteration,
            max_iterations,
        })
    }
}

fn read_input(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Render the iteration prompt.
pub fn render_prompt(inputs: &PromptInputs) -> Result<String> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_template("iteration", ITERATION_TEMPLATE)
        .context("load iteration template")?;
    let template = env.get_template("iteration")?;
    let rendered = template
        .render(context! {
            prompt => inputs.prompt.as_str(),
            conventions => inputs.conventions.as_str(),
            specs => inputs.specs.as_str(),
            specs_name => inputs.specs_name.as_str(),
            notes => inputs.notes.as_str(),
            iteration => inputs.iteration,
            max_iterations => inputs.max_iterations,
        })
        .context("render iteration prompt")?;
    debug!(
        iteration = inputs.iteration,
        bytes = rendered.len(),
        "rendered prompt"
    );
    Ok(rendered)
}
