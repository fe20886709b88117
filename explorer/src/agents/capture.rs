//! Capture agent: runs one capture iteration as a sequence of agent turns.
//!
//! Each turn observes the screen, asks the agent for commands, runs them in
//! order and feeds the reports back through the conversation. The iteration
//! ends when the agent reports `done`, the turn limit is hit or the run
//! deadline passes.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::commands::{Command, CommandContext};
use crate::core::budget::is_expired;
use crate::core::types::{AppConfig, Conversation, ExplorationPlan, Role};
use crate::io::artifacts::CaptureLog;
use crate::io::executor::{Executor, execute_and_load_json};
use crate::io::prompt::{CapturePromptInputs, PromptBuilder};

use super::{AgentKind, AgentSettings};

/// Conversation messages rendered into each capture prompt.
const HISTORY_MESSAGES: usize = 40;

/// One agent turn's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDecision {
    pub summary: String,
    pub commands: Vec<Command>,
    /// Query applied to the next turn's screen view.
    pub focus: Option<String>,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStop {
    /// The agent reported the instruction carried out.
    Done,
    TurnLimit,
    DeadlineExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub turns: u32,
    pub commands_executed: usize,
    pub stop: CaptureStop,
    pub log: CaptureLog,
}

/// Capture agent wrapper that owns schema and prompt settings.
pub struct CaptureAgent<'a> {
    settings: &'a AgentSettings,
    prompts: &'a PromptBuilder,
    app: &'a AppConfig,
    plan: &'a ExplorationPlan,
    max_turns: u32,
}

impl<'a> CaptureAgent<'a> {
    pub fn new(
        settings: &'a AgentSettings,
        prompts: &'a PromptBuilder,
        app: &'a AppConfig,
        plan: &'a ExplorationPlan,
        max_turns: u32,
    ) -> Self {
        Self {
            settings,
            prompts,
            app,
            plan,
            max_turns,
        }
    }

    /// Run one capture iteration against the live session.
    ///
    /// Agent failures are hard failures unless the run deadline has passed,
    /// which ends the iteration with [`CaptureStop::DeadlineExceeded`].
    /// Driver failures are reported to the agent and never end the iteration
    /// on their own.
    #[instrument(skip_all, fields(max_turns = self.max_turns))]
    pub async fn run<E: Executor + ?Sized>(
        &self,
        executor: &E,
        session: &mut CommandContext<'_>,
        conversation: &mut Conversation,
        out_dir: &Path,
        deadline: Option<Instant>,
    ) -> Result<CaptureOutcome> {
        let instruction = conversation.last_instruction().unwrap_or_default().to_string();
        let mut log = CaptureLog::default();
        let mut results: Vec<String> = Vec::new();
        let mut focus: Option<String> = None;
        let mut turns = 0;
        let mut stop = CaptureStop::TurnLimit;

        for turn in 1..=self.max_turns {
            if is_expired(deadline, Instant::now()) {
                warn!(turn, "run deadline passed during capture");
                stop = CaptureStop::DeadlineExceeded;
                break;
            }

            let (screen, diff) = observe_screen(session, focus.as_deref()).await;
            let prompt = self.prompts.build_capture(&CapturePromptInputs {
                app: self.app,
                plan: self.plan,
                state: &*session.state,
                instruction: &instruction,
                turn,
                max_turns: self.max_turns,
                screen,
                focus: focus.as_deref(),
                diff,
                results: std::mem::take(&mut results),
                history: conversation.transcript(HISTORY_MESSAGES),
            })?;
            let answer = match self.settings.request(
                AgentKind::Capture,
                prompt,
                out_dir,
                &format!("capture_turn_{turn}"),
                deadline,
            ) {
                Ok(request) => {
                    execute_and_load_json::<_, CaptureDecision>(executor, &request).await
                }
                Err(err) => Err(err),
            };
            // A call capped by the run deadline fails when the deadline hits.
            let decision = match answer {
                Ok(decision) => decision,
                Err(err) if is_expired(deadline, Instant::now()) => {
                    warn!(turn, err = %err, "run deadline passed during capture turn");
                    stop = CaptureStop::DeadlineExceeded;
                    break;
                }
                Err(err) => return Err(err.context(format!("capture turn {turn}"))),
            };
            turns = turn;
            debug!(
                turn,
                commands = decision.commands.len(),
                done = decision.done,
                "capture decision"
            );

            let screenshots_before = session.artifacts.manifest().screenshots.len();
            for command in &decision.commands {
                let report = command.execute(session).await?;
                log.commands.push(command.describe());
                conversation.push(Role::Tool, report.to_string());
                results.push(report.to_string());
            }
            log.screenshots.extend(
                session.artifacts.manifest().screenshots[screenshots_before..]
                    .iter()
                    .cloned(),
            );

            let summary = decision.summary.trim();
            if !summary.is_empty() {
                conversation.push(Role::Agent, summary);
                log.summaries.push(summary.to_string());
            }
            focus = decision
                .focus
                .map(|focus| focus.trim().to_string())
                .filter(|focus| !focus.is_empty());

            if decision.done {
                stop = CaptureStop::Done;
                break;
            }
        }

        info!(
            turns,
            commands = log.commands.len(),
            screenshots = log.screenshots.len(),
            stop = ?stop,
            "capture iteration finished"
        );
        Ok(CaptureOutcome {
            turns,
            commands_executed: log.commands.len(),
            stop,
            log,
        })
    }
}

/// Refresh the snapshot and render the screen view and change summary.
///
/// A missing session or unreadable screen is shown to the agent as text.
async fn observe_screen(
    session: &mut CommandContext<'_>,
    focus: Option<&str>,
) -> (String, Option<String>) {
    let observation = match session.snapshots.capture(&mut *session.driver).await {
        Ok(observation) => observation,
        Err(err) => {
            warn!(err = %err, "screen unavailable");
            return (format!("Screen unavailable: {err}"), None);
        }
    };
    let Some(snapshot) = session.snapshots.current() else {
        return ("Screen unavailable.".to_string(), None);
    };
    session
        .tracer
        .set_snapshot_state(snapshot.screen_title(), &snapshot.content_hash);
    let diff = match observation.diff {
        Some(diff) => Some(diff.summary()),
        None if !observation.changed => Some("No UI changes.".to_string()),
        None => None,
    };
    (snapshot.view(focus), diff)
}
