//! Loop configuration stored under `.ralph/config.toml`.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Loop configuration (TOML).
///
/// Missing fields take their defaults so a partially written file stays usable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RalphConfig {
    /// Instructions handed to the agent every iteration.
    pub prompt_file: String,
    /// Project conventions the agent must follow.
    pub conventions_file: String,
    /// Task list the agent works through.
    pub specs_file: String,
    /// Iterations per run.
    pub max_iterations: u32,
    /// Iterations allowed in any trailing hour (0 = unlimited).
    pub max_per_hour: u32,
    /// Iterations allowed in any trailing day (0 = unlimited).
    pub max_per_day: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Pause between iterations, in seconds.
    pub delay_secs: f64,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            prompt_file: "PROMPT.md".to_string(),
            conventions_file: "CONVENTIONS.md".to_string(),
            specs_file: "SPECS.md".to_string(),
            max_iterations: 50,
            max_per_hour: 0,
            max_per_day: 0,
            model: None,
            delay_secs: 2.0,
        }
    }
}

/// Keys accepted by `ralph config set`.
pub const CONFIG_KEYS: &[&str] = &[
    "prompt_file",
    "conventions_file",
    "specs_file",
    "max_iterations",
    "max_per_hour",
    "max_per_day",
    "model",
    "delay_secs",
];

impl RalphConfig {
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("prompt_file", &self.prompt_file),
            ("conventions_file", &self.conventions_file),
            ("specs_file", &self.specs_file),
        ] {
            if value.trim().is_empty() {
                bail!("{key} must not be empty");
            }
        }
        if self.max_iterations == 0 {
            bail!("max_iterations must be > 0");
        }
        if !self.delay_secs.is_finite() || self.delay_secs < 0.0 {
            bail!("delay_secs must be a non-negative number");
        }
        Ok(())
    }

    /// Update one key from its textual form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "prompt_file" => self.prompt_file = value.to_string(),
            "conventions_file" => self.conventions_file = value.to_string(),
            "specs_file" => self.specs_file = value.to_string(),
            "max_iterations" => self.max_iterations = parse_value(key, value)?,
            "max_per_hour" => self.max_per_hour = parse_value(key, value)?,
            "max_per_day" => self.max_per_day = parse_value(key, value)?,
            "model" => {
                self.model = (!value.trim().is_empty()).then(|| value.to_string());
            }
            "delay_secs" => self.delay_secs = parse_value(key, value)?,
            other => {
                return Err(anyhow!(
                    "unknown config key: {other} (expected one of: {})",
                    CONFIG_KEYS.join(", ")
                ));
            }
        }
        self.validate()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serialize config toml")
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("parse {key} value {value:?}"))
}

/// Load config from a TOML file.
///
/// A missing file yields the defaults. A file that cannot be read, parsed or
/// validated also yields the defaults, with a warning, so a bad edit never
/// blocks a run.
pub fn load_config(path: &Path) -> RalphConfig {
    match try_load_config(path) {
        Ok(Some(cfg)) => cfg,
        Ok(None) => RalphConfig::default(),
        Err(err) => {
            warn!(
                path = %path.display(),
                err = %format!("{err:#}"),
                "ignoring invalid config, using defaults"
            );
            RalphConfig::default()
        }
    }
}

/// Strict variant of [`load_config`]: `Ok(None)` when missing, errors otherwise.
pub fn try_load_config(path: &Path) -> Result<Option<RalphConfig>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let cfg: RalphConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    debug!(path = %path.display(), "config loaded");
    Ok(Some(cfg))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RalphConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = cfg.to_toml()?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
