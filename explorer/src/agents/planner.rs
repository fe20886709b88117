//! Planner agent: turns an app description into an exploration plan.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::types::{AppConfig, ExplorationPlan};
use crate::io::executor::{Executor, execute_and_load_json};
use crate::io::prompt::PromptBuilder;

use super::{AgentKind, AgentSettings};

/// Plan produced for a run, with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutcome {
    pub plan: ExplorationPlan,
    /// Set when the default plan replaced a failed generation.
    pub fallback_reason: Option<String>,
    /// Fields that came back empty and were filled from the default plan.
    pub filled: Vec<&'static str>,
}

/// Planner agent wrapper that owns schema and prompt settings.
pub struct PlannerAgent<'a> {
    settings: &'a AgentSettings,
    prompts: &'a PromptBuilder,
}

impl<'a> PlannerAgent<'a> {
    pub fn new(settings: &'a AgentSettings, prompts: &'a PromptBuilder) -> Self {
        Self { settings, prompts }
    }

    /// Generate a plan. Never fails: any error yields the default plan.
    pub async fn create_plan<E: Executor + ?Sized>(
        &self,
        executor: &E,
        app: &AppConfig,
        out_dir: &Path,
        deadline: Option<Instant>,
    ) -> PlanOutcome {
        match self.generate(executor, app, out_dir, deadline).await {
            Ok(mut plan) => {
                let filled = plan.fill_gaps();
                if !filled.is_empty() {
                    warn!(fields = ?filled, "planner left lists empty, filled from default plan");
                }
                info!(
                    sections = plan.app_sections.len(),
                    flows = plan.user_flows.len(),
                    "exploration plan ready"
                );
                PlanOutcome {
                    plan,
                    fallback_reason: None,
                    filled,
                }
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(err = %reason, "planner failed, using default plan");
                PlanOutcome {
                    plan: ExplorationPlan::default(),
                    fallback_reason: Some(reason),
                    filled: Vec::new(),
                }
            }
        }
    }

    async fn generate<E: Executor + ?Sized>(
        &self,
        executor: &E,
        app: &AppConfig,
        out_dir: &Path,
        deadline: Option<Instant>,
    ) -> Result<ExplorationPlan> {
        let prompt = self.prompts.build_planner(app)?;
        let request = self
            .settings
            .request(AgentKind::Planner, prompt, out_dir, "planner_output", deadline)?;
        execute_and_load_json(executor, &request).await
    }
}
