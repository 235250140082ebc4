//! The iteration loop behind `ralph run`.
//!
//! One run holds the working-directory lock for its whole duration. Each
//! iteration bumps the lifetime counter, passes the rate-limit admission
//! check, renders the prompt, invokes the agent, journals any notes and
//! either stops on a completion signal or records a timestamp and continues.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};

use crate::core::protocol::ProtocolOutput;
use crate::core::rate_limit::{RateLimitHit, RateLimits, WindowCounts, count_recent};
use crate::core::types::LoopStop;
use crate::io::agent::{AgentFailure, AgentRequest, AgentRunner};
use crate::io::lock::{LivenessProbe, acquire_lock};
use crate::io::notes::append_notes;
use crate::io::paths::RalphPaths;
use crate::io::prompt::{PromptInputs, render_prompt};
use crate::io::run_state::{self, RunState, write_run_state};
use crate::io::signals::{self, SignalGuard};
use crate::settings::LoopSettings;

/// Progress reported to the caller while the loop runs.
#[derive(Debug)]
pub enum LoopEvent<'a> {
    /// Lock held, state loaded; iterations are about to start.
    Started {
        max_iterations: u32,
        limits: RateLimits,
        total_iterations: u64,
    },
    /// A lock left behind by a dead process was replaced.
    StaleLockReclaimed { pid: u32 },
    IterationStarted {
        /// Lifetime iteration number.
        iteration: u64,
        /// 1-based position within this run.
        session: u32,
        max_iterations: u32,
    },
    RateUsage(WindowCounts),
    RateLimited(RateLimitHit),
    DryRunPrompt(&'a str),
    AgentFailed(&'a AgentFailure),
    NotesRecorded { iteration: u64 },
    /// A recoverable failure that did not stop the loop.
    Warning {
        action: &'static str,
        error: &'a anyhow::Error,
    },
    Completed { iteration: u64 },
    MaxIterationsReached { limit: u32 },
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Iterations that passed admission and invoked the agent.
    pub session_iterations: u32,
    /// Lifetime counter after the run.
    pub total_iterations: u64,
    pub stop: LoopStop,
    pub duration: Duration,
}

/// Run iterations until the agent completes, a limit is hit, or the run's budget is spent.
///
/// Unreadable inputs, an uncreatable `.ralph/` and a held lock are fatal.
/// Everything else inside an iteration is reported as an event and skipped.
pub fn run_loop<R, P, F>(
    paths: &RalphPaths,
    settings: &LoopSettings,
    runner: &R,
    probe: &P,
    mut on_event: F,
) -> Result<LoopOutcome>
where
    R: AgentRunner + ?Sized,
    P: LivenessProbe + ?Sized,
    F: FnMut(&LoopEvent<'_>),
{
    let started = Instant::now();
    paths.ensure_dir()?;
    let lock = acquire_lock(&paths.lock_path, probe).context("acquiring lock")?;
    if let Some(pid) = lock.reclaimed_from() {
        on_event(&LoopEvent::StaleLockReclaimed { pid });
    }
    let signal_guard = if settings.trap_signals {
        Some(signals::install(lock.path())?)
    } else {
        None
    };

    let result = iterate(paths, settings, runner, &mut on_event);

    if signal_guard.as_ref().is_none_or(SignalGuard::stop) {
        if let Err(err) = lock.release() {
            debug!(err = %format!("{err:#}"), "failed to release lock");
            on_event(&LoopEvent::Warning {
                action: "release lock",
                error: &err,
            });
        }
    } else {
        // The signal listener owns the lock file and the exit code.
        lock.disarm();
        signals::wait_for_exit();
    }

    let (stop, session_iterations, total_iterations) = result?;
    let outcome = LoopOutcome {
        session_iterations,
        total_iterations,
        stop,
        duration: started.elapsed(),
    };
    info!(
        stop = %outcome.stop,
        session_iterations,
        total_iterations,
        "loop finished"
    );
    Ok(outcome)
}

fn iterate<R, F>(
    paths: &RalphPaths,
    settings: &LoopSettings,
    runner: &R,
    on_event: &mut F,
) -> Result<(LoopStop, u32, u64)>
where
    R: AgentRunner + ?Sized,
    F: FnMut(&LoopEvent<'_>),
{
    let mut state = run_state::load_or_default(&paths.state_path);
    let mut session_iterations = 0u32;
    on_event(&LoopEvent::Started {
        max_iterations: settings.max_iterations,
        limits: settings.limits,
        total_iterations: state.total_iterations,
    });

    for index in 0..settings.max_iterations {
        state.total_iterations += 1;
        let iteration = state.total_iterations;
        debug!(iteration, session = index + 1, "iteration starting");
        on_event(&LoopEvent::IterationStarted {
            iteration,
            session: index + 1,
            max_iterations: settings.max_iterations,
        });

        if settings.limits.is_enabled() {
            let counts = count_recent(&state.timestamps, Utc::now().timestamp());
            if let Err(hit) = settings.limits.admit(counts) {
                info!(window = %hit.window, count = hit.count, limit = hit.limit, "rate limited");
                on_event(&LoopEvent::RateLimited(hit));
                save_state(paths, &state, on_event);
                let stop = LoopStop::RateLimited {
                    window: hit.window,
                    count: hit.count,
                    limit: hit.limit,
                };
                return Ok((stop, session_iterations, state.total_iterations));
            }
            on_event(&LoopEvent::RateUsage(counts));
        }

        let inputs = PromptInputs::load(
            &settings.prompt_path,
            &settings.conventions_path,
            &settings.specs_path,
            &paths.notes_path,
            iteration,
            settings.max_iterations,
        )?;
        let prompt = render_prompt(&inputs)?;
        if settings.dry_run {
            on_event(&LoopEvent::DryRunPrompt(&prompt));
            return Ok((LoopStop::DryRun, session_iterations, state.total_iterations));
        }

        let request = AgentRequest {
            workdir: paths.root.clone(),
            prompt,
            options: settings.agent.clone(),
        };
        session_iterations += 1;
        let output = match runner.invoke(&request) {
            Ok(output) => output,
            Err(failure) => {
                debug!(iteration, err = %failure, "agent invocation failed, continuing");
                on_event(&LoopEvent::AgentFailed(&failure));
                failure.captured
            }
        };

        let protocol = ProtocolOutput::parse(&output);
        if let Some(notes) = protocol.notes.as_deref() {
            match append_notes(&paths.notes_path, notes, iteration) {
                Ok(()) => on_event(&LoopEvent::NotesRecorded { iteration }),
                Err(err) => {
                    debug!(iteration, err = %format!("{err:#}"), "failed to save notes");
                    on_event(&LoopEvent::Warning {
                        action: "save notes",
                        error: &err,
                    });
                }
            }
        }

        if protocol.complete {
            // No timestamp for the terminal iteration; the counter still moves forward.
            state.last_run = Some(Utc::now());
            save_state(paths, &state, on_event);
            on_event(&LoopEvent::Completed { iteration });
            return Ok((LoopStop::Complete, session_iterations, state.total_iterations));
        }

        state.record_iteration(Utc::now());
        save_state(paths, &state, on_event);

        let is_last = index + 1 == settings.max_iterations;
        if !is_last && !settings.delay.is_zero() {
            debug!(delay_ms = settings.delay.as_millis(), "sleeping between iterations");
            thread::sleep(settings.delay);
        }
    }

    on_event(&LoopEvent::MaxIterationsReached {
        limit: settings.max_iterations,
    });
    let stop = LoopStop::MaxIterations {
        limit: settings.max_iterations,
    };
    Ok((stop, session_iterations, state.total_iterations))
}

fn save_state<F>(paths: &RalphPaths, state: &RunState, on_event: &mut F)
where
    F: FnMut(&LoopEvent<'_>),
{
    if let Err(err) = write_run_state(&paths.state_path, state) {
        debug!(err = %format!("{err:#}"), "failed to save run state");
        on_event(&LoopEvent::Warning {
            action: "save run state",
            error: &err,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rate_limit::RateWindow;
    use crate::io::config::RalphConfig;
    use crate::io::lock::SignalProbe;
    use crate::settings::RunOverrides;
    use crate::test_support::{ScriptedReply, ScriptedRunner, TestWorkspace};

    const COMPLETE: &str = "<ralph_status>COMPLETE</ralph_status>";

    fn settings(workspace: &TestWorkspace, overrides: RunOverrides) -> LoopSettings {
        let overrides = RunOverrides {
            delay_secs: Some(0.0),
            ..overrides
        };
        let mut settings =
            LoopSettings::resolve(&workspace.paths, &RalphConfig::default(), overrides)
                .expect("settings");
        settings.trap_signals = false;
        settings
    }

    fn run(
        workspace: &TestWorkspace,
        overrides: RunOverrides,
        runner: &ScriptedRunner,
    ) -> Result<LoopOutcome> {
        run_loop(
            &workspace.paths,
            &settings(workspace, overrides),
            runner,
            &SignalProbe,
            |_| {},
        )
    }

    #[test]
    fn stops_on_first_complete() {
        let workspace = TestWorkspace::new();
        let runner = ScriptedRunner::always(COMPLETE);
        let outcome = run(
            &workspace,
            RunOverrides {
                max_iterations: Some(3),
                ..RunOverrides::default()
            },
            &runner,
        )
        .expect("run");

        assert_eq!(outcome.stop, LoopStop::Complete);
        assert_eq!(outcome.session_iterations, 1);
        assert_eq!(runner.calls(), 1);

        let state = run_state::load_or_default(&workspace.paths.state_path);
        assert_eq!(state.total_iterations, 1);
        assert!(state.timestamps.is_empty());
        assert!(state.last_run.is_some());
        assert!(!workspace.paths.lock_path.exists());
    }

    #[test]
    fn exhausts_budget_and_records_timestamps() {
        let workspace = TestWorkspace::new();
        let runner = ScriptedRunner::always("still working");
        let outcome = run(
            &workspace,
            RunOverrides {
                max_iterations: Some(2),
                ..RunOverrides::default()
            },
            &runner,
        )
        .expect("run");

        assert_eq!(outcome.stop, LoopStop::MaxIterations { limit: 2 });
        assert_eq!(outcome.session_iterations, 2);
        assert_eq!(outcome.total_iterations, 2);
        let state = run_state::load_or_default(&workspace.paths.state_path);
        assert_eq!(state.timestamps.len(), 2);
    }

    #[test]
    fn counter_continues_across_runs_and_reaches_the_prompt() {
        let workspace = TestWorkspace::new();
        let overrides = RunOverrides {
            max_iterations: Some(1),
            ..RunOverrides::default()
        };
        run(&workspace, overrides.clone(), &ScriptedRunner::always("")).expect("first");

        let runner = ScriptedRunner::always("");
        let outcome = run(&workspace, overrides, &runner).expect("second");
        assert_eq!(outcome.total_iterations, 2);
        let requests = runner.requests();
        assert!(requests[0].prompt.ends_with("Iteration: 2 of 1\n"));
        assert_eq!(requests[0].workdir, workspace.root());
    }

    #[test]
    fn rate_limited_before_invoking_agent() {
        let workspace = TestWorkspace::new();
        write_run_state(
            &workspace.paths.state_path,
            &RunState {
                total_iterations: 4,
                timestamps: vec![Utc::now().timestamp() - 60],
                last_run: None,
            },
        )
        .expect("seed state");

        let runner = ScriptedRunner::always(COMPLETE);
        let mut events = Vec::new();
        let outcome = run_loop(
            &workspace.paths,
            &settings(
                &workspace,
                RunOverrides {
                    max_per_hour: Some(1),
                    ..RunOverrides::default()
                },
            ),
            &runner,
            &SignalProbe,
            |event| events.push(format!("{event:?}")),
        )
        .expect("run");

        assert_eq!(
            outcome.stop,
            LoopStop::RateLimited {
                window: RateWindow::Hour,
                count: 1,
                limit: 1
            }
        );
        assert_eq!(runner.calls(), 0);
        assert_eq!(outcome.session_iterations, 0);
        assert!(events.iter().any(|e| e.starts_with("RateLimited")));

        let state = run_state::load_or_default(&workspace.paths.state_path);
        assert_eq!(state.total_iterations, 5);
        assert_eq!(state.timestamps.len(), 1);
    }

    #[test]
    fn agent_failure_still_extracts_notes_and_continues() {
        let workspace = TestWorkspace::new();
        let runner = ScriptedRunner::new([
            ScriptedReply::Failure("<ralph_notes>\nhalf done\n</ralph_notes>".to_string()),
            ScriptedReply::Output(format!("<ralph_notes>done</ralph_notes>{COMPLETE}")),
        ]);
        let mut agent_failures = 0;
        let outcome = run_loop(
            &workspace.paths,
            &settings(&workspace, RunOverrides::default()),
            &runner,
            &SignalProbe,
            |event| {
                if matches!(event, LoopEvent::AgentFailed(_)) {
                    agent_failures += 1;
                }
            },
        )
        .expect("run");

        assert_eq!(outcome.stop, LoopStop::Complete);
        assert_eq!(runner.calls(), 2);
        assert_eq!(agent_failures, 1);

        let notes = workspace.read(".ralph/notes.md");
        assert!(notes.contains("## Iteration 1 ("));
        assert!(notes.contains("\nhalf done\n"));
        assert!(notes.contains("## Iteration 2 ("));
        assert!(notes.contains("\ndone\n"));

        // The second prompt carries the journal written by the first iteration.
        let second = &runner.requests()[1].prompt;
        assert!(second.contains("half done"));
        assert!(!second.contains("No notes yet."));
    }

    #[test]
    fn dry_run_prints_prompt_and_persists_nothing() {
        let workspace = TestWorkspace::new();
        let runner = ScriptedRunner::always(COMPLETE);
        let mut printed = None;
        let outcome = run_loop(
            &workspace.paths,
            &settings(
                &workspace,
                RunOverrides {
                    dry_run: true,
                    ..RunOverrides::default()
                },
            ),
            &runner,
            &SignalProbe,
            |event| {
                if let LoopEvent::DryRunPrompt(prompt) = event {
                    printed = Some(prompt.to_string());
                }
            },
        )
        .expect("run");

        assert_eq!(outcome.stop, LoopStop::DryRun);
        assert_eq!(runner.calls(), 0);
        let printed = printed.expect("prompt event");
        assert!(printed.contains("<specs>\n- [ ] first task"));
        assert!(printed.contains("No notes yet."));
        assert!(!workspace.paths.state_path.exists());
        assert!(!workspace.paths.lock_path.exists());
    }

    #[test]
    fn missing_input_is_fatal_and_releases_lock() {
        let workspace = TestWorkspace::new();
        std::fs::remove_file(workspace.root().join("CONVENTIONS.md")).expect("remove");
        let runner = ScriptedRunner::always(COMPLETE);

        let err = run(&workspace, RunOverrides::default(), &runner).unwrap_err();
        assert!(format!("{err:#}").contains("CONVENTIONS.md"));
        assert_eq!(runner.calls(), 0);
        assert!(!workspace.paths.lock_path.exists());
    }

    #[test]
    fn held_lock_is_fatal() {
        let workspace = TestWorkspace::new();
        workspace.paths.ensure_dir().expect("dir");
        workspace.write(".ralph/lock", &format!("{}\n", std::process::id()));
        let runner = ScriptedRunner::always(COMPLETE);

        let err = run(&workspace, RunOverrides::default(), &runner).unwrap_err();
        let rendered = format!("{err:#}");
        assert!(rendered.starts_with("acquiring lock"));
        assert!(rendered.contains("another run may be active"));
        assert_eq!(runner.calls(), 0);
        assert!(workspace.paths.lock_path.exists());
    }
}
