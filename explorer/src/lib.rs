//! Coverage-driven exploration of mobile app UIs.
//!
//! A run plans what to cover, then alternates capture iterations against a
//! live device session with coverage evaluations until the plan is covered
//! or a limit is reached. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (UI tree cleaning, diffing and
//!   querying, coverage arithmetic, feedback). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (device driver, agent processes,
//!   prompts, trace and artifact files). Isolated to enable mocking in tests.
//!
//! [`agents`], [`commands`], [`snapshot`] and [`orchestrator`] coordinate
//! core logic with I/O to implement `explorer run`.

pub mod agents;
pub mod commands;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod snapshot;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
