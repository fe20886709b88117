//! Side-effecting operations: device sessions, agent processes, prompts,
//! artifacts and the action trace.

pub mod appium;
pub mod artifacts;
pub mod config;
pub mod driver;
pub mod executor;
pub mod process;
pub mod prompt;
pub mod trace;
