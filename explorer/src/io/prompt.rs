//! Prompt rendering for the planner, capture and evaluator agents.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, droppable sections are
//! removed in a fixed per-agent order and the last section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::types::{AppConfig, AppState, CoverageEvaluation, ExplorationPlan};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const CAPTURE_TEMPLATE: &str = include_str!("prompts/capture.md");
const EVALUATOR_TEMPLATE: &str = include_str!("prompts/evaluator.md");

const CAPTURE_DROP_ORDER: &[&str] = &["history", "diff", "results", "screen"];
const EVALUATOR_DROP_ORDER: &[&str] = &["previous"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .unwrap_or_else(|err| panic!("section marker pattern: {err}"))
});

/// Inputs for one capture turn.
#[derive(Debug, Clone)]
pub struct CapturePromptInputs<'a> {
    pub app: &'a AppConfig,
    pub plan: &'a ExplorationPlan,
    pub state: &'a AppState,
    pub instruction: &'a str,
    pub turn: u32,
    pub max_turns: u32,
    /// Rendered screen view: full outline or ranked query matches.
    pub screen: String,
    pub focus: Option<&'a str>,
    /// Summary of what changed since the previous snapshot.
    pub diff: Option<String>,
    pub results: Vec<String>,
    pub history: String,
}

#[derive(Debug, Clone)]
pub struct EvaluatorPromptInputs<'a> {
    pub plan: &'a ExplorationPlan,
    /// Zero-based evaluation index within the run.
    pub evaluation_index: usize,
    pub screenshot_count: u32,
    pub previous: Option<&'a CoverageEvaluation>,
    pub history: String,
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Renders agent prompts within a byte budget.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .context("load planner template")?;
        env.add_template("capture", CAPTURE_TEMPLATE)
            .context("load capture template")?;
        env.add_template("evaluator", EVALUATOR_TEMPLATE)
            .context("load evaluator template")?;
        Ok(Self { env, budget_bytes })
    }

    pub fn build_planner(&self, app: &AppConfig) -> Result<String> {
        let rendered = self
            .env
            .get_template("planner")?
            .render(context! { app => app })
            .context("render planner prompt")?;
        Ok(self.fit(&rendered, &[]))
    }

    pub fn build_capture(&self, input: &CapturePromptInputs<'_>) -> Result<String> {
        let rendered = self
            .env
            .get_template("capture")?
            .render(context! {
                app => input.app,
                plan => input.plan,
                state => input.state,
                instruction => input.instruction.trim(),
                turn => input.turn,
                max_turns => input.max_turns,
                screen => input.screen.trim_end(),
                focus => input.focus.map(str::trim).filter(|s| !s.is_empty()),
                diff => input.diff.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                results => &input.results,
                history => (!input.history.trim().is_empty()).then(|| input.history.trim()),
            })
            .context("render capture prompt")?;
        Ok(self.fit(&rendered, CAPTURE_DROP_ORDER))
    }

    pub fn build_evaluator(&self, input: &EvaluatorPromptInputs<'_>) -> Result<String> {
        let history = if input.history.trim().is_empty() {
            "No captures recorded yet."
        } else {
            input.history.trim()
        };
        let rendered = self
            .env
            .get_template("evaluator")?
            .render(context! {
                plan => input.plan,
                evaluation_number => input.evaluation_index + 1,
                screenshot_count => input.screenshot_count,
                previous => input.previous,
                history => history,
            })
            .context("render evaluator prompt")?;
        Ok(self.fit(&rendered, EVALUATOR_DROP_ORDER))
    }

    fn fit(&self, rendered: &str, drop_order: &[&str]) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes, drop_order);
        render_sections(&sections)
    }
}

/// Parse sections from rendered template output using HTML comment markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, content_start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|(next_start, ..)| *next_start)
            .unwrap_or(rendered.len());
        let content = rendered[*content_start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// Drop droppable sections in `drop_order` until the prompt fits, then
/// truncate the last section if it still does not.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize, drop_order: &[&str]) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in drop_order {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            let dropped_len = sections[idx].content.len();
            debug!(
                section = key,
                bytes_dropped = dropped_len,
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let other_len: usize = sections
        .iter()
        .take(sections.len().saturating_sub(1))
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut()
        && last.content.len() > allowed
    {
        let before_len = last.content.len();
        let notice = "\n[truncated]";
        let keep = if allowed > notice.len() {
            allowed - notice.len()
        } else {
            allowed
        };
        truncate_at_char_boundary(&mut last.content, keep);
        if allowed > notice.len() {
            last.content.push_str(notice);
        }
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    let mut cut = max_len.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> AppConfig {
        AppConfig {
            name: "Messages".to_string(),
            bundle_id: "com.apple.MobileSMS".to_string(),
            description: Some("Send and receive texts".to_string()),
        }
    }

    fn capture_inputs<'a>(
        app: &'a AppConfig,
        plan: &'a ExplorationPlan,
        state: &'a AppState,
    ) -> CapturePromptInputs<'a> {
        CapturePromptInputs {
            app,
            plan,
            state,
            instruction: "Please launch Messages and start capturing screenshots systematically.",
            turn: 1,
            max_turns: 30,
            screen: "Application name=\"Messages\"\n  Button name=\"Compose\"\n".to_string(),
            focus: None,
            diff: Some("+ XCUIElementTypeButton|id=Compose".to_string()),
            results: vec!["tap_element: success".to_string()],
            history: "[user] launch".to_string(),
        }
    }

    #[test]
    fn planner_prompt_includes_app_details() {
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .build_planner(&app())
            .expect("render");
        assert!(prompt.starts_with("### Planner Contract"));
        assert!(prompt.contains("Bundle id: com.apple.MobileSMS"));
        assert!(prompt.contains("Description: Send and receive texts"));
    }

    #[test]
    fn capture_sections_appear_in_order() {
        let app = app();
        let plan = ExplorationPlan::default();
        let state = AppState::default();
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .build_capture(&capture_inputs(&app, &plan, &state))
            .expect("render");

        let order = [
            "### Capture Contract",
            "### Exploration Plan",
            "### Instruction",
            "### Session State",
            "### Last Command Results",
            "### Changes Since Last Turn",
            "### Recent Conversation",
            "### Current Screen",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|heading| prompt.find(heading).expect(heading))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(prompt.contains("Last action: none"));
        assert!(prompt.contains("Sections: Main Screens, Settings, Input Forms"));
    }

    #[test]
    fn budget_drops_history_before_screen() {
        let app = app();
        let plan = ExplorationPlan::default();
        let state = AppState::default();
        let mut inputs = capture_inputs(&app, &plan, &state);
        inputs.history = "[tool] tap_element: success\n".repeat(200);
        let builder = PromptBuilder::new(10_000).expect("builder");
        let full = builder.build_capture(&inputs).expect("render");
        assert!(full.len() > 3_000);
        assert!(full.contains("### Recent Conversation"));

        let tight = PromptBuilder::new(3_000)
            .expect("builder")
            .build_capture(&inputs)
            .expect("render");
        assert!(!tight.contains("### Recent Conversation"));
        assert!(tight.contains("### Current Screen"));
        assert!(tight.contains("### Capture Contract"));
    }

    #[test]
    fn evaluator_prompt_truncates_history_last() {
        let plan = ExplorationPlan::default();
        let inputs = EvaluatorPromptInputs {
            plan: &plan,
            evaluation_index: 0,
            screenshot_count: 2,
            previous: None,
            history: "x".repeat(20_000),
        };
        let prompt = PromptBuilder::new(4_000)
            .expect("builder")
            .build_evaluator(&inputs)
            .expect("render");
        assert!(prompt.contains("This is evaluation 1 of the run."));
        assert!(prompt.ends_with("[truncated]"));
        assert!(prompt.len() <= 4_000 + 10);
    }

    #[test]
    fn evaluator_shows_previous_verdict() {
        let plan = ExplorationPlan::default();
        let previous = crate::core::coverage::default_evaluation(&plan);
        let inputs = EvaluatorPromptInputs {
            plan: &plan,
            evaluation_index: 1,
            screenshot_count: 4,
            previous: Some(&previous),
            history: String::new(),
        };
        let prompt = PromptBuilder::new(10_000)
            .expect("builder")
            .build_evaluator(&inputs)
            .expect("render");
        assert!(prompt.contains("Score: incomplete"));
        assert!(prompt.contains("No captures recorded yet."));
    }
}
