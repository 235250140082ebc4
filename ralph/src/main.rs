//! `ralph`: run an agent over a task list, one fresh prompt per iteration,
//! until it reports completion.
//!
//! Per-directory state lives in `.ralph/` (config, run state, notes journal
//! and the single-run lock).

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use ralph::console::Console;
use ralph::core::types::LoopStop;
use ralph::exit_codes;
use ralph::io::agent::OpencodeRunner;
use ralph::io::config::{CONFIG_KEYS, RalphConfig, load_config, try_load_config, write_config};
use ralph::io::lock::SignalProbe;
use ralph::io::paths::RalphPaths;
use ralph::logging;
use ralph::looping::run_loop;
use ralph::settings::{LoopSettings, RunOverrides};

#[derive(Parser)]
#[command(
    name = "ralph",
    version,
    about = "Run an agent in a loop until it reports completion"
)]
struct Cli {
    /// Project directory holding the input files and `.ralph/` [default: current directory]
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run the loop (the default when no subcommand is given).
    Run(RunArgs),
    /// Run exactly one iteration.
    Manual(RunArgs),
    /// Show `.ralph/config.toml`, or change it.
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set one key.
    Set { key: String, value: String },
    /// Restore the defaults.
    Reset,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
struct RunArgs {
    /// Maximum iterations for this run.
    #[arg(long, value_name = "N")]
    max_iterations: Option<u32>,
    /// Maximum iterations per hour (0 = unlimited).
    #[arg(long, value_name = "N")]
    max_per_hour: Option<u32>,
    /// Maximum iterations per day (0 = unlimited).
    #[arg(long, value_name = "N")]
    max_per_day: Option<u32>,
    /// Override the prompt file.
    #[arg(long, value_name = "FILE")]
    prompt: Option<String>,
    /// Override the conventions file.
    #[arg(long, value_name = "FILE")]
    conventions: Option<String>,
    /// Override the specs file.
    #[arg(long, value_name = "FILE")]
    specs: Option<String>,
    /// Agent to use (passed to `opencode run --agent`).
    #[arg(long)]
    agent: Option<String>,
    /// Output format (passed to `opencode run --format`; default|json).
    #[arg(long)]
    format: Option<String>,
    /// Continue the previous session (passed to `opencode run --continue`).
    #[arg(long = "continue", conflicts_with = "session")]
    continue_session: bool,
    /// Session id (passed to `opencode run --session`).
    #[arg(long)]
    session: Option<String>,
    /// File to attach (repeatable; passed to `opencode run --file`).
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<String>,
    /// Message title (passed to `opencode run --title`).
    #[arg(long)]
    title: Option<String>,
    /// Model variant (passed to `opencode run --variant`).
    #[arg(long)]
    variant: Option<String>,
    /// Remote attach target (passed to `opencode run --attach`).
    #[arg(long)]
    attach: Option<String>,
    /// Remote attach port (passed to `opencode run --port`).
    #[arg(long)]
    port: Option<u16>,
    /// Hide banner and status output.
    #[arg(short, long)]
    quiet: bool,
    /// Model to use (e.g. ollama/qwen3-coder:30b).
    #[arg(short, long)]
    model: Option<String>,
    /// Stream agent output in real time.
    #[arg(short, long)]
    verbose: bool,
    /// Print the constructed prompt instead of invoking the agent.
    #[arg(long)]
    dry_run: bool,
    /// Delay between iterations, in seconds.
    #[arg(long, value_name = "SECONDS")]
    delay: Option<f64>,
}

impl RunArgs {
    /// Fold flags given before the subcommand into the subcommand's own.
    /// Values set after the subcommand win.
    fn merged_with(self, outer: RunArgs) -> RunArgs {
        RunArgs {
            max_iterations: self.max_iterations.or(outer.max_iterations),
            max_per_hour: self.max_per_hour.or(outer.max_per_hour),
            max_per_day: self.max_per_day.or(outer.max_per_day),
            prompt: self.prompt.or(outer.prompt),
            conventions: self.conventions.or(outer.conventions),
            specs: self.specs.or(outer.specs),
            agent: self.agent.or(outer.agent),
            format: self.format.or(outer.format),
            continue_session: self.continue_session || outer.continue_session,
            session: self.session.or(outer.session),
            files: [outer.files, self.files].concat(),
            title: self.title.or(outer.title),
            variant: self.variant.or(outer.variant),
            attach: self.attach.or(outer.attach),
            port: self.port.or(outer.port),
            quiet: self.quiet || outer.quiet,
            model: self.model.or(outer.model),
            verbose: self.verbose || outer.verbose,
            dry_run: self.dry_run || outer.dry_run,
            delay: self.delay.or(outer.delay),
        }
    }

    fn into_overrides(self) -> RunOverrides {
        RunOverrides {
            max_iterations: self.max_iterations,
            max_per_hour: self.max_per_hour,
            max_per_day: self.max_per_day,
            prompt_file: self.prompt,
            conventions_file: self.conventions,
            specs_file: self.specs,
            model: self.model,
            delay_secs: self.delay,
            agent: self.agent,
            format: self.format,
            variant: self.variant,
            attach: self.attach,
            port: self.port,
            continue_session: self.continue_session,
            session: self.session,
            files: self.files,
            title: self.title,
            quiet: self.quiet,
            verbose: self.verbose,
            dry_run: self.dry_run,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Keep clap's usage errors off exit code 2, which means max iterations here.
            let code = if err.use_stderr() {
                exit_codes::ERROR
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    logging::init();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let paths = RalphPaths::new(root);
    match cli.command {
        None => cmd_run(&paths, cli.run, None),
        Some(Command::Run(args)) => cmd_run(&paths, args.merged_with(cli.run), None),
        Some(Command::Manual(args)) => cmd_run(&paths, args.merged_with(cli.run), Some(1)),
        Some(Command::Config { action }) => {
            if cli.run != RunArgs::default() {
                bail!("run flags do not apply to `ralph config`");
            }
            cmd_config(&paths, action)
        }
    }
}

fn cmd_run(paths: &RalphPaths, args: RunArgs, fixed_iterations: Option<u32>) -> Result<i32> {
    let config = load_config(&paths.config_path);
    let mut overrides = args.into_overrides();
    if fixed_iterations.is_some() {
        overrides.max_iterations = fixed_iterations;
    }
    let settings = LoopSettings::resolve(paths, &config, overrides)?;
    let console = Console::detect(settings.quiet, settings.verbose);

    let outcome = run_loop(
        paths,
        &settings,
        &OpencodeRunner::default(),
        &SignalProbe,
        |event| console.emit(event),
    )?;
    if let Some(summary) = console.summary(&outcome) {
        println!("{summary}");
    }
    Ok(exit_code_for(&outcome.stop))
}

fn exit_code_for(stop: &LoopStop) -> i32 {
    match stop {
        LoopStop::Complete | LoopStop::DryRun => exit_codes::OK,
        LoopStop::MaxIterations { .. } => exit_codes::MAX_ITERATIONS,
        LoopStop::RateLimited { .. } => exit_codes::RATE_LIMITED,
    }
}

fn cmd_config(paths: &RalphPaths, action: Option<ConfigAction>) -> Result<i32> {
    match action {
        None => {
            // Show what a run would use, so an invalid file prints as the defaults.
            let cfg = load_config(&paths.config_path);
            print!("{}", cfg.to_toml()?);
        }
        Some(ConfigAction::Set { key, value }) => {
            let mut cfg = try_load_config(&paths.config_path)?.unwrap_or_default();
            cfg.set(&key, &value).with_context(|| {
                format!("config set {key} (keys: {})", CONFIG_KEYS.join(", "))
            })?;
            write_config(&paths.config_path, &cfg)?;
            println!("Set {key} = {value}");
        }
        Some(ConfigAction::Reset) => {
            write_config(&paths.config_path, &RalphConfig::default())?;
            println!("Reset {}", paths.config_path.display());
        }
    }
    Ok(exit_codes::OK)
}
