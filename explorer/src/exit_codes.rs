//! Stable exit codes for explorer CLI commands.

/// Command succeeded, or the run reached complete coverage.
pub const OK: i32 = 0;
/// Invalid config or input, or a fatal run error (session, agent, artifacts).
pub const FATAL: i32 = 1;
/// `explorer run` stopped at `max_iterations` without complete coverage.
pub const INCOMPLETE: i32 = 2;
/// `explorer run` stopped because `run_timeout_secs` elapsed.
pub const DEADLINE: i32 = 3;
