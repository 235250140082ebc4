//! Iterative agent loop driver.
//!
//! Each iteration hands an external agent a freshly assembled prompt, scans
//! its output for an in-band notes block and completion marker, and decides
//! whether to continue. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (protocol extraction, rate-limit windows, outcome types).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem state, the run lock,
//!   signal handling, agent processes). Isolated behind traits where tests
//!   need doubles.
//!
//! [`looping`] coordinates both to implement `ralph run`; [`console`] renders
//! its events for the CLI.

pub mod console;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
