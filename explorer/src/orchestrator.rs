//! Coverage loop: plan once, then alternate capture and evaluation until
//! coverage is complete, the iteration ceiling is hit or the deadline passes.
//!
//! The run owns exactly one driver session and one trace. Both are closed on
//! every exit path, including fatal errors.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use chrono::Local;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::agents::AgentSettings;
use crate::agents::capture::{CaptureAgent, CaptureOutcome, CaptureStop};
use crate::agents::evaluator::{CoverageEvaluator, EvaluationRequest};
use crate::agents::planner::PlannerAgent;
use crate::commands::CommandContext;
use crate::core::budget::{deadline_after, is_expired};
use crate::core::coverage::default_evaluation;
use crate::core::feedback::{feedback_message, initial_instruction};
use crate::core::types::{
    AppConfig, AppState, Conversation, CoverageEvaluation, CoverageScore, ExplorationPlan, Role,
};
use crate::io::artifacts::{
    ArtifactManifest, ArtifactStore, IterationMeta, IterationPaths, IterationWriteRequest,
};
use crate::io::config::ExplorerConfig;
use crate::io::driver::DeviceDriver;
use crate::io::executor::Executor;
use crate::io::prompt::PromptBuilder;
use crate::io::trace::ActionTracer;
use crate::snapshot::SnapshotEngine;

/// Conversation messages handed to the evaluator as capture history.
const EVALUATOR_HISTORY_MESSAGES: usize = 200;
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Status updates streamed to the caller while a run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Planned {
        plan: ExplorationPlan,
    },
    /// The default plan replaced a failed generation.
    PlanFallback {
        reason: String,
    },
    IterationStarted {
        iteration: u32,
        max_iterations: u32,
    },
    CaptureFinished {
        iteration: u32,
        turns: u32,
        commands: usize,
        screenshots: usize,
    },
    Evaluated {
        iteration: u32,
        evaluation: CoverageEvaluation,
    },
    /// A recoverable error the run continued past.
    Recovered {
        message: String,
    },
}

impl fmt::Display for LoopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopEvent::Planned { plan } => write!(
                f,
                "plan: {} sections, {} states, {} flows",
                plan.app_sections.len(),
                plan.required_states.len(),
                plan.user_flows.len()
            ),
            LoopEvent::PlanFallback { reason } => {
                write!(f, "planner failed, using default plan: {reason}")
            }
            LoopEvent::IterationStarted {
                iteration,
                max_iterations,
            } => write!(f, "iteration {iteration}/{max_iterations}: capturing"),
            LoopEvent::CaptureFinished {
                iteration,
                turns,
                commands,
                screenshots,
            } => write!(
                f,
                "iteration {iteration}: {turns} turns, {commands} commands, \
                 {screenshots} screenshots"
            ),
            LoopEvent::Evaluated {
                iteration,
                evaluation,
            } => write!(
                f,
                "iteration {iteration}: coverage {} ({:.0}%)",
                evaluation.score.as_str(),
                evaluation.completion_percentage
            ),
            LoopEvent::Recovered { message } => write!(f, "recovered: {message}"),
        }
    }
}

/// Why a run stopped without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStop {
    Complete,
    MaxIterations,
    DeadlineExceeded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: String,
    /// Capture iterations started.
    pub iterations: u32,
    pub stop: RunStop,
    pub plan: ExplorationPlan,
    /// Last evaluation, or the default one when none ran.
    pub evaluation: CoverageEvaluation,
    pub manifest: ArtifactManifest,
}

/// Explore `app` until coverage is complete or a limit is reached.
///
/// Fatal errors (session creation exhausted, capture agent failure, trace or
/// artifact write failure) are returned after the driver session and trace
/// have been closed.
#[instrument(skip_all, fields(bundle_id = %app.bundle_id))]
pub async fn run_exploration<E, F>(
    config: &ExplorerConfig,
    app: &AppConfig,
    executor: &E,
    driver: &mut dyn DeviceDriver,
    mut on_event: F,
) -> Result<RunOutcome>
where
    E: Executor + ?Sized,
    F: FnMut(&LoopEvent),
{
    let deadline = deadline_after(
        Instant::now(),
        config.run_timeout_secs.map(Duration::from_secs),
    );
    let artifacts_dir = PathBuf::from(&config.artifacts_dir);
    let app_dir = app.app_dir_name();
    let mut tracer = ActionTracer::new(&artifacts_dir);
    let trace_path = tracer.start_new_trace(&app_dir, Some(&app.bundle_id))?;
    let session_ts = tracer
        .session_ts()
        .ok_or_else(|| anyhow!("trace started without a session timestamp"))?;
    let mut store = ArtifactStore::new(&artifacts_dir, &app_dir, &session_ts);
    store.record_trace(&trace_path);

    let mut run = Run {
        config,
        app,
        run_id: format!("run-{session_ts}"),
        deadline,
        tracer,
        store,
        snapshots: SnapshotEngine::new(),
        state: AppState {
            current_app: app.bundle_id.clone(),
            bundle_id: app.bundle_id.clone(),
            ..AppState::default()
        },
        conversation: Conversation::default(),
    };
    info!(run_id = %run.run_id, "exploration started");

    let result = run.drive(executor, &mut *driver, &mut on_event).await;
    if let Err(err) = &result {
        warn!(err = %format!("{err:#}"), "exploration failed, cleaning up");
        if let Err(log_err) = run
            .tracer
            .log_action("run_error", json!({ "error": format!("{err:#}") }))
        {
            warn!(err = %format!("{log_err:#}"), "could not record run error");
        }
    }
    run.cleanup(driver).await;

    let Finished {
        iterations,
        stop,
        plan,
        evaluation,
    } = result?;
    info!(iterations, stop = ?stop, "exploration finished");
    Ok(RunOutcome {
        run_id: run.run_id,
        iterations,
        stop,
        plan,
        evaluation,
        manifest: run.store.manifest().clone(),
    })
}

struct Finished {
    iterations: u32,
    stop: RunStop,
    plan: ExplorationPlan,
    evaluation: CoverageEvaluation,
}

struct Run<'a> {
    config: &'a ExplorerConfig,
    app: &'a AppConfig,
    run_id: String,
    deadline: Option<Instant>,
    tracer: ActionTracer,
    store: ArtifactStore,
    snapshots: SnapshotEngine,
    state: AppState,
    conversation: Conversation,
}

impl Run<'_> {
    async fn drive<E, F>(
        &mut self,
        executor: &E,
        driver: &mut dyn DeviceDriver,
        on_event: &mut F,
    ) -> Result<Finished>
    where
        E: Executor + ?Sized,
        F: FnMut(&LoopEvent),
    {
        let run_dir = self.store.run_dir(&self.run_id);
        let settings = AgentSettings::from_config(
            self.config,
            self.store.app_root(),
            &self.store.schema_dir(&self.run_id),
        );
        let prompts = PromptBuilder::new(self.config.prompt_budget_bytes)?;

        let planned = PlannerAgent::new(&settings, &prompts)
            .create_plan(executor, self.app, &run_dir, self.deadline)
            .await;
        if let Some(reason) = &planned.fallback_reason {
            on_event(&LoopEvent::PlanFallback {
                reason: reason.clone(),
            });
        }
        let plan = planned.plan;
        on_event(&LoopEvent::Planned { plan: plan.clone() });
        self.store.write_plan(&self.run_id, &plan)?;
        self.tracer.log_action(
            "plan_created",
            json!({ "plan": plan, "fallback": planned.fallback_reason }),
        )?;

        self.initialize_session(driver, on_event).await?;

        let capture_agent = CaptureAgent::new(
            &settings,
            &prompts,
            self.app,
            &plan,
            self.config.max_capture_turns,
        );
        let mut evaluator = CoverageEvaluator::new(&settings, &prompts);
        let max_iterations = self.config.max_iterations;
        let mut latest: Option<CoverageEvaluation> = None;
        let mut iterations = 0;
        let mut stop = RunStop::MaxIterations;
        self.conversation.push(Role::User, initial_instruction(self.app));

        for iteration in 1..=max_iterations {
            if is_expired(self.deadline, Instant::now()) {
                stop = RunStop::DeadlineExceeded;
                break;
            }
            iterations = iteration;
            on_event(&LoopEvent::IterationStarted {
                iteration,
                max_iterations,
            });
            let started = Instant::now();
            let started_at = Local::now().format(ISO_FORMAT).to_string();
            let iter_dir = IterationPaths::new(&run_dir, iteration).dir;

            let capture = {
                let mut session = CommandContext {
                    driver: &mut *driver,
                    snapshots: &mut self.snapshots,
                    tracer: &mut self.tracer,
                    artifacts: &mut self.store,
                    state: &mut self.state,
                };
                capture_agent
                    .run(
                        executor,
                        &mut session,
                        &mut self.conversation,
                        &iter_dir,
                        self.deadline,
                    )
                    .await?
            };
            on_event(&LoopEvent::CaptureFinished {
                iteration,
                turns: capture.turns,
                commands: capture.commands_executed,
                screenshots: capture.log.screenshots.len(),
            });

            if capture.stop == CaptureStop::DeadlineExceeded {
                self.write_iteration(iteration, &capture, None, started, started_at)?;
                stop = RunStop::DeadlineExceeded;
                break;
            }

            let history = self.conversation.transcript(EVALUATOR_HISTORY_MESSAGES);
            let evaluated = evaluator
                .evaluate(
                    executor,
                    &EvaluationRequest {
                        plan: &plan,
                        history: &history,
                        screenshot_count: self.state.screenshot_count,
                        previous: latest.as_ref(),
                        out_dir: &iter_dir,
                        deadline: self.deadline,
                    },
                )
                .await;
            if let Some(message) = evaluated.recovered {
                on_event(&LoopEvent::Recovered { message });
            }
            let evaluation = evaluated.evaluation;
            self.state.coverage_score = evaluation.completion_percentage / 100.0;
            self.tracer.log_action("coverage_evaluation", json!(evaluation))?;
            self.write_iteration(iteration, &capture, Some(&evaluation), started, started_at)?;
            on_event(&LoopEvent::Evaluated {
                iteration,
                evaluation: evaluation.clone(),
            });

            if evaluation.score == CoverageScore::Complete {
                latest = Some(evaluation);
                stop = RunStop::Complete;
                break;
            }
            if iteration < max_iterations {
                self.conversation
                    .push(Role::User, feedback_message(&evaluation));
            }
            latest = Some(evaluation);
        }

        Ok(Finished {
            iterations,
            stop,
            evaluation: latest.unwrap_or_else(|| default_evaluation(&plan)),
            plan,
        })
    }

    /// Open the driver session, retrying with a linearly growing delay.
    async fn initialize_session<F: FnMut(&LoopEvent)>(
        &mut self,
        driver: &mut dyn DeviceDriver,
        on_event: &mut F,
    ) -> Result<()> {
        let attempts = self.config.session_init_attempts;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match driver.initialize(&self.app.bundle_id).await {
                Ok(()) => {
                    self.tracer
                        .log_action("session_initialized", json!({ "attempt": attempt }))?;
                    return Ok(());
                }
                Err(err) => {
                    last_error = err.to_string();
                    warn!(attempt, attempts, err = %err, "session initialization failed");
                    if attempt < attempts {
                        on_event(&LoopEvent::Recovered {
                            message: format!(
                                "session initialization attempt {attempt}/{attempts} failed: {err}"
                            ),
                        });
                        let delay = self.config.session_retry_delay_ms * u64::from(attempt);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }
        bail!("could not create a driver session after {attempts} attempts: {last_error}")
    }

    fn write_iteration(
        &mut self,
        iteration: u32,
        capture: &CaptureOutcome,
        evaluation: Option<&CoverageEvaluation>,
        started: Instant,
        started_at: String,
    ) -> Result<()> {
        let meta = IterationMeta {
            run_id: self.run_id.clone(),
            iter: iteration,
            capture_turns: capture.turns,
            commands_executed: capture.commands_executed,
            screenshot_count: self.state.screenshot_count,
            score: evaluation.map(|evaluation| evaluation.score.as_str().to_string()),
            completion_percentage: evaluation.map(|evaluation| evaluation.completion_percentage),
            started_at,
            ended_at: Local::now().format(ISO_FORMAT).to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.store.write_iteration(&IterationWriteRequest {
            run_id: &self.run_id,
            meta: &meta,
            capture: &capture.log,
            evaluation,
        })?;
        Ok(())
    }

    /// Best-effort teardown: close the session, end the trace, persist the
    /// manifest. Failures are logged, never returned.
    async fn cleanup(&mut self, driver: &mut dyn DeviceDriver) {
        if let Err(err) = driver.terminate().await {
            warn!(err = %err, "driver terminate failed");
        }
        if let Err(err) = self.tracer.end_trace() {
            warn!(err = %format!("{err:#}"), "closing trace failed");
        }
        if let Err(err) = self.store.write_manifest(&self.run_id) {
            warn!(err = %format!("{err:#}"), "writing manifest failed");
        }
    }
}
