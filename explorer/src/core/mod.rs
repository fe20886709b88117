//! Deterministic, pure logic shared by the explorer.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod clean;
pub mod coverage;
pub mod diff;
pub mod feedback;
pub mod query;
pub mod types;
pub mod ui_tree;
