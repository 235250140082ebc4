//! Effective settings for one run: config file values plus per-run overrides.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::core::rate_limit::RateLimits;
use crate::io::agent::AgentOptions;
use crate::io::config::RalphConfig;
use crate::io::paths::RalphPaths;

/// Accepted values for `--format`.
pub const OUTPUT_FORMATS: &[&str] = &["default", "json"];

/// Per-run overrides. `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub max_iterations: Option<u32>,
    pub max_per_hour: Option<u32>,
    pub max_per_day: Option<u32>,
    pub prompt_file: Option<String>,
    pub conventions_file: Option<String>,
    pub specs_file: Option<String>,
    pub model: Option<String>,
    pub delay_secs: Option<f64>,
    pub agent: Option<String>,
    pub format: Option<String>,
    pub variant: Option<String>,
    pub attach: Option<String>,
    pub port: Option<u16>,
    pub continue_session: bool,
    pub session: Option<String>,
    pub files: Vec<String>,
    pub title: Option<String>,
    pub quiet: bool,
    pub verbose: bool,
    pub dry_run: bool,
}

/// Fully resolved inputs for [`crate::looping::run_loop`].
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub prompt_path: PathBuf,
    pub conventions_path: PathBuf,
    pub specs_path: PathBuf,
    pub max_iterations: u32,
    pub limits: RateLimits,
    pub delay: Duration,
    pub dry_run: bool,
    pub quiet: bool,
    pub verbose: bool,
    /// Release the lock and exit on SIGINT/SIGTERM. Off only in in-process tests.
    pub trap_signals: bool,
    pub agent: AgentOptions,
}

impl LoopSettings {
    /// Merge `overrides` over `config`, resolving input files against the root.
    pub fn resolve(
        paths: &RalphPaths,
        config: &RalphConfig,
        overrides: RunOverrides,
    ) -> Result<Self> {
        if overrides.continue_session && overrides.session.is_some() {
            bail!("--continue and --session cannot be used together");
        }
        if let Some(format) = overrides.format.as_deref()
            && !OUTPUT_FORMATS.contains(&format)
        {
            bail!(
                "invalid --format {format:?} (expected one of: {})",
                OUTPUT_FORMATS.join(", ")
            );
        }

        let mut cfg = config.clone();
        if let Some(value) = overrides.prompt_file {
            cfg.prompt_file = value;
        }
        if let Some(value) = overrides.conventions_file {
            cfg.conventions_file = value;
        }
        if let Some(value) = overrides.specs_file {
            cfg.specs_file = value;
        }
        if let Some(value) = overrides.max_iterations {
            cfg.max_iterations = value;
        }
        if let Some(value) = overrides.max_per_hour {
            cfg.max_per_hour = value;
        }
        if let Some(value) = overrides.max_per_day {
            cfg.max_per_day = value;
        }
        if let Some(value) = overrides.delay_secs {
            cfg.delay_secs = value;
        }
        if overrides.model.is_some() {
            cfg.model = overrides.model;
        }
        cfg.validate()?;

        // A dry run only prints the prompt.
        let quiet = overrides.quiet && !overrides.dry_run;
        let verbose = overrides.verbose && !overrides.dry_run;

        let delay = Duration::try_from_secs_f64(cfg.delay_secs)
            .with_context(|| format!("delay {} seconds out of range", cfg.delay_secs))?;

        Ok(Self {
            prompt_path: paths.resolve(&cfg.prompt_file),
            conventions_path: paths.resolve(&cfg.conventions_file),
            specs_path: paths.resolve(&cfg.specs_file),
            max_iterations: cfg.max_iterations,
            limits: RateLimits {
                max_per_hour: cfg.max_per_hour,
                max_per_day: cfg.max_per_day,
            },
            delay,
            dry_run: overrides.dry_run,
            quiet,
            verbose,
            trap_signals: true,
            agent: AgentOptions {
                model: cfg.model,
                agent: overrides.agent,
                format: overrides.format,
                variant: overrides.variant,
                attach: overrides.attach,
                port: overrides.port,
                continue_session: overrides.continue_session,
                session: overrides.session,
                files: overrides.files,
                title: overrides.title,
                stream_output: verbose || quiet,
            },
        })
    }
}
