//! I/O helpers for the loop: persisted state, the run lock, signals and the agent process.

pub mod agent;
pub mod config;
pub mod lock;
pub mod notes;
pub mod paths;
pub mod prompt;
pub mod run_state;
pub mod signals;
