//! Coverage evaluator agent.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::coverage::{default_evaluation, finalize_evaluation};
use crate::core::types::{CoverageEvaluation, ExplorationPlan, RawEvaluation};
use crate::io::executor::{Executor, execute_and_load_json};
use crate::io::prompt::{EvaluatorPromptInputs, PromptBuilder};

use super::{AgentKind, AgentSettings};

/// Inputs for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub plan: &'a ExplorationPlan,
    /// Capture history rendered as text.
    pub history: &'a str,
    pub screenshot_count: u32,
    pub previous: Option<&'a CoverageEvaluation>,
    pub out_dir: &'a Path,
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub evaluation: CoverageEvaluation,
    /// Set when the default evaluation replaced a failed one.
    pub recovered: Option<String>,
}

/// Evaluator agent wrapper. Counts its calls so the first evaluation of a
/// run is never `complete`.
pub struct CoverageEvaluator<'a> {
    settings: &'a AgentSettings,
    prompts: &'a PromptBuilder,
    calls: usize,
}

impl<'a> CoverageEvaluator<'a> {
    pub fn new(settings: &'a AgentSettings, prompts: &'a PromptBuilder) -> Self {
        Self {
            settings,
            prompts,
            calls: 0,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Evaluate coverage. Never fails: any error yields the default
    /// incomplete evaluation.
    pub async fn evaluate<E: Executor + ?Sized>(
        &mut self,
        executor: &E,
        request: &EvaluationRequest<'_>,
    ) -> EvaluationOutcome {
        let index = self.calls;
        self.calls += 1;
        match self.generate(executor, request, index).await {
            Ok(raw) => {
                let evaluation = finalize_evaluation(raw, request.plan, index);
                info!(
                    evaluation = index + 1,
                    score = evaluation.score.as_str(),
                    completion = evaluation.completion_percentage,
                    "coverage evaluated"
                );
                EvaluationOutcome {
                    evaluation,
                    recovered: None,
                }
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(err = %reason, "evaluator failed, using default evaluation");
                EvaluationOutcome {
                    evaluation: default_evaluation(request.plan),
                    recovered: Some(reason),
                }
            }
        }
    }

    async fn generate<E: Executor + ?Sized>(
        &self,
        executor: &E,
        request: &EvaluationRequest<'_>,
        index: usize,
    ) -> Result<RawEvaluation> {
        let prompt = self.prompts.build_evaluator(&EvaluatorPromptInputs {
            plan: request.plan,
            evaluation_index: index,
            screenshot_count: request.screenshot_count,
            previous: request.previous,
            history: request.history.to_string(),
        })?;
        let exec = self.settings.request(
            AgentKind::Evaluator,
            prompt,
            request.out_dir,
            "evaluator_output",
            request.deadline,
        )?;
        execute_and_load_json(executor, &exec).await
    }
}
