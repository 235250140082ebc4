//! Human-facing rendering of loop events for the `ralph` binary.

use std::io::IsTerminal;
use std::time::Duration;

use colored::{ColoredString, Colorize};

use crate::core::types::LoopStop;
use crate::looping::{LoopEvent, LoopOutcome};

const BANNER: &str = "ralph: iterative agent loop";

/// Where a rendered line goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Out(String),
    Err(String),
}

/// Renders events according to the run's quiet/verbose/color settings.
#[derive(Debug, Clone, Copy)]
pub struct Console {
    quiet: bool,
    verbose: bool,
    color: bool,
}

impl Console {
    /// Color only when stdout is a terminal, `NO_COLOR` is unset and the run is not quiet.
    pub fn detect(quiet: bool, verbose: bool) -> Self {
        let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        let color = !quiet && !no_color && std::io::stdout().is_terminal();
        colored::control::set_override(color);
        Self {
            quiet,
            verbose,
            color,
        }
    }

    pub fn plain(quiet: bool, verbose: bool) -> Self {
        Self {
            quiet,
            verbose,
            color: false,
        }
    }

    /// Print one event.
    pub fn emit(&self, event: &LoopEvent<'_>) {
        match self.render(event) {
            Some(Line::Out(text)) => println!("{text}"),
            Some(Line::Err(text)) => eprintln!("{text}"),
            None => {}
        }
    }

    pub fn render(&self, event: &LoopEvent<'_>) -> Option<Line> {
        if let LoopEvent::DryRunPrompt(prompt) = event {
            return Some(Line::Out(format!(
                "\n--- DRY RUN: Constructed Prompt ---\n{prompt}\n--- END DRY RUN ---"
            )));
        }
        if self.quiet {
            return None;
        }
        let line = match event {
            LoopEvent::Started {
                max_iterations,
                limits,
                total_iterations,
            } => {
                let mut text = format!(
                    "{}\nmax iterations: {max_iterations}, completed so far: {total_iterations}",
                    self.paint(BANNER, Style::Heading)
                );
                if limits.is_enabled() {
                    text.push_str(&format!(
                        "\nrate limits: {}/hour, {}/day",
                        describe_limit(limits.max_per_hour),
                        describe_limit(limits.max_per_day)
                    ));
                }
                Line::Out(text)
            }
            LoopEvent::StaleLockReclaimed { pid } => Line::Out(
                self.paint(
                    &format!("Removed stale lock left by pid {pid}"),
                    Style::Warning,
                )
                .to_string(),
            ),
            LoopEvent::IterationStarted {
                iteration,
                session,
                max_iterations,
            } => Line::Out(format!(
                "\n{}",
                self.paint(
                    &format!("=== Iteration {iteration} (session: {session}/{max_iterations}) ==="),
                    Style::Heading
                )
            )),
            LoopEvent::RateUsage(counts) => {
                Line::Out(format!("Rate: {}/hour, {}/day", counts.hour, counts.day))
            }
            LoopEvent::RateLimited(hit) => Line::Out(
                self.paint(
                    &format!(
                        "Rate limit reached: {} iterations in the past {} (max: {})",
                        hit.count, hit.window, hit.limit
                    ),
                    Style::Warning,
                )
                .to_string(),
            ),
            LoopEvent::AgentFailed(failure) => Line::Out(
                self.paint(&format!("Warning: {failure}"), Style::Warning)
                    .to_string(),
            ),
            LoopEvent::NotesRecorded { iteration } if self.verbose => {
                Line::Out(format!("Saved notes for iteration {iteration}"))
            }
            LoopEvent::NotesRecorded { .. } => return None,
            LoopEvent::Warning { action, error } => {
                Line::Err(format!("Warning: failed to {action}: {error:#}"))
            }
            LoopEvent::Completed { .. } => Line::Out(
                self.paint("Received COMPLETE signal from agent!", Style::Success)
                    .to_string(),
            ),
            LoopEvent::MaxIterationsReached { limit } => Line::Out(
                self.paint(
                    &format!("Reached maximum iterations ({limit})"),
                    Style::Warning,
                )
                .to_string(),
            ),
            LoopEvent::DryRunPrompt(_) => return None,
        };
        Some(line)
    }

    /// Closing summary, or `None` for quiet and dry runs.
    pub fn summary(&self, outcome: &LoopOutcome) -> Option<String> {
        if self.quiet || outcome.stop == LoopStop::DryRun {
            return None;
        }
        let label = outcome.stop.as_str().to_uppercase();
        let style = match outcome.stop {
            LoopStop::Complete => Style::Success,
            LoopStop::RateLimited { .. } | LoopStop::MaxIterations { .. } => Style::Warning,
            LoopStop::DryRun => Style::Heading,
        };
        Some(format!(
            "\n--- Summary ---\nIterations: {}\nDuration: {}\nStatus: {}",
            outcome.session_iterations,
            format_duration(outcome.duration),
            self.paint(&label, style)
        ))
    }

    fn paint(&self, text: &str, style: Style) -> ColoredString {
        if !self.color {
            return text.normal();
        }
        match style {
            Style::Heading => text.cyan().bold(),
            Style::Warning => text.yellow().bold(),
            Style::Success => text.green().bold(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Style {
    Heading,
    Warning,
    Success,
}

fn describe_limit(limit: u32) -> String {
    if limit == 0 {
        "unlimited".to_string()
    } else {
        limit.to_string()
    }
}

/// Seconds with millisecond precision, e.g. `1.234s`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    format!("{}.{:03}s", millis / 1000, millis % 1000)
}
