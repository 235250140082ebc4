//! Stable exit codes for the `ralph` CLI.

/// Agent signaled completion, a dry run finished, or a config command succeeded.
pub const OK: i32 = 0;
/// Fatal setup error (unreadable inputs, lock held, invalid flags or config).
pub const ERROR: i32 = 1;
/// The run used up its iteration budget without a completion signal.
pub const MAX_ITERATIONS: i32 = 2;
/// The admission check refused to start another iteration.
pub const RATE_LIMITED: i32 = 3;
/// Terminated by SIGINT.
pub const INTERRUPTED: i32 = 130;
/// Terminated by SIGTERM.
pub const TERMINATED: i32 = 143;
