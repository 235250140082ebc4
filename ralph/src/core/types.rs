//! Shared types for loop outcomes and owner liveness.
//!
//! These stay free of I/O so both the orchestration layer and the binary can
//! reason about them without touching the filesystem.

use std::fmt;

use super::rate_limit::RateWindow;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The agent emitted `<ralph_status>COMPLETE</ralph_status>`.
    Complete,
    /// The admission check refused the next iteration.
    RateLimited {
        window: RateWindow,
        count: u32,
        limit: u32,
    },
    /// The configured number of iterations for this run was used up.
    MaxIterations { limit: u32 },
    /// The prompt was printed instead of invoking the agent.
    DryRun,
}

impl LoopStop {
    /// Stable lowercase label (`complete`, `rate_limited`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStop::Complete => "complete",
            LoopStop::RateLimited { .. } => "rate_limited",
            LoopStop::MaxIterations { .. } => "max_iterations",
            LoopStop::DryRun => "dry_run",
        }
    }
}

impl fmt::Display for LoopStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer from probing a lock owner's process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLiveness {
    Alive,
    Dead,
    /// The probe could not tell (e.g. the process belongs to another user).
    Unknown,
}

impl ProcessLiveness {
    /// Only a confirmed-dead owner may be evicted; `Unknown` counts as alive.
    pub fn counts_as_alive(self) -> bool {
        !matches!(self, ProcessLiveness::Dead)
    }
}
