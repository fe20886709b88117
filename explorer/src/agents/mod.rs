//! Agent wrappers for planning, capturing and coverage evaluation.
//!
//! Each agent owns its output schema and prompt; all of them run through the
//! same [`Executor`](crate::io::executor::Executor) backend.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::core::budget::{cap_timeout, remaining_budget};
use crate::io::config::ExplorerConfig;
use crate::io::executor::ExecRequest;

pub mod capture;
pub mod evaluator;
pub mod planner;

const PLANNER_SCHEMA: &str = include_str!("schemas/planner.json");
const CAPTURE_SCHEMA: &str = include_str!("schemas/capture.json");
const EVALUATOR_SCHEMA: &str = include_str!("schemas/evaluator.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Planner,
    Capture,
    Evaluator,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Planner => "planner",
            AgentKind::Capture => "capture",
            AgentKind::Evaluator => "evaluator",
        }
    }

    /// File name the schema is written under in the run's schema directory.
    pub fn schema_file_name(self) -> &'static str {
        match self {
            AgentKind::Planner => "planner_output.schema.json",
            AgentKind::Capture => "capture_output.schema.json",
            AgentKind::Evaluator => "evaluator_output.schema.json",
        }
    }

    /// Recover the agent from a request's schema path.
    pub fn from_schema_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        [AgentKind::Planner, AgentKind::Capture, AgentKind::Evaluator]
            .into_iter()
            .find(|kind| kind.schema_file_name() == name)
    }

    fn schema(self) -> &'static str {
        match self {
            AgentKind::Planner => PLANNER_SCHEMA,
            AgentKind::Capture => CAPTURE_SCHEMA,
            AgentKind::Evaluator => EVALUATOR_SCHEMA,
        }
    }
}

/// Settings shared by every agent invocation in a run.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Working directory for the executor process.
    pub workdir: PathBuf,
    pub schema_dir: PathBuf,
    pub agent_timeout: Duration,
    pub output_limit_bytes: usize,
    pub reasoning_effort: String,
}

impl AgentSettings {
    pub fn from_config(config: &ExplorerConfig, workdir: &Path, schema_dir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            schema_dir: schema_dir.to_path_buf(),
            agent_timeout: Duration::from_secs(config.agent_timeout_secs),
            output_limit_bytes: config.executor_output_limit_bytes,
            reasoning_effort: config.agent.reasoning_effort.clone(),
        }
    }

    /// Build a request writing `<stem>.json` and `<stem>.log` into `out_dir`.
    ///
    /// Fails when the run deadline has already passed.
    pub(crate) fn request(
        &self,
        kind: AgentKind,
        prompt: String,
        out_dir: &Path,
        stem: &str,
        deadline: Option<Instant>,
    ) -> Result<ExecRequest> {
        let now = Instant::now();
        if let Some(deadline) = deadline {
            remaining_budget(deadline, now)?;
        }
        let schema_path = self.schema_dir.join(kind.schema_file_name());
        write_output_schema(&schema_path, kind.schema())?;
        Ok(ExecRequest {
            workdir: self.workdir.clone(),
            prompt,
            output_schema_path: schema_path,
            output_path: out_dir.join(format!("{stem}.json")),
            executor_log_path: out_dir.join(format!("{stem}.log")),
            timeout: cap_timeout(self.agent_timeout, deadline, now),
            output_limit_bytes: self.output_limit_bytes,
            reasoning_effort: self.reasoning_effort.clone(),
        })
    }
}

pub(crate) fn write_output_schema(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create schema dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write schema {}", path.display()))
}
