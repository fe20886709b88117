//! Shared deterministic types for the exploration core.
//!
//! These types define stable contracts between the planner, capture agent,
//! coverage evaluator and orchestrator. They carry no I/O and serialize to the
//! JSON shapes the agents produce and the artifact store persists.

use serde::{Deserialize, Serialize};

/// Target application for an exploration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Human readable name (e.g. "Messages").
    pub name: String,
    /// Bundle id used to launch the app (e.g. "com.apple.MobileSMS").
    pub bundle_id: String,
    pub description: Option<String>,
}

impl AppConfig {
    /// Directory name used for this app's artifacts: the last dot-separated
    /// component of the bundle id, lowercased.
    pub fn app_dir_name(&self) -> String {
        let tail = self
            .bundle_id
            .rsplit('.')
            .find(|part| !part.trim().is_empty())
            .unwrap_or("unknown_app");
        tail.trim().to_lowercase()
    }
}

/// What an exploration run should cover. Created once per run by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationPlan {
    pub app_sections: Vec<String>,
    pub required_states: Vec<String>,
    pub user_flows: Vec<String>,
    pub success_criteria: Vec<String>,
}

impl Default for ExplorationPlan {
    fn default() -> Self {
        Self {
            app_sections: strings(&["Main Screens", "Settings", "Input Forms"]),
            required_states: strings(&[
                "Default state",
                "Empty state",
                "Loading state",
                "Error state",
            ]),
            user_flows: strings(&[
                "Launch and navigate main screens",
                "Change a setting",
                "Fill in and submit a form",
            ]),
            success_criteria: strings(&[
                "Every main screen captured",
                "Default and error states captured",
                "Each user flow captured end to end",
            ]),
        }
    }
}

impl ExplorationPlan {
    /// True when every list carries at least one non-blank entry.
    pub fn is_complete(&self) -> bool {
        [
            &self.app_sections,
            &self.required_states,
            &self.user_flows,
            &self.success_criteria,
        ]
        .iter()
        .all(|list| list.iter().any(|entry| !entry.trim().is_empty()))
    }

    /// Drop blank entries and fill any list left empty from the default plan.
    ///
    /// Returns the names of the fields that had to be filled.
    pub fn fill_gaps(&mut self) -> Vec<&'static str> {
        let fallback = ExplorationPlan::default();
        let mut filled = Vec::new();
        for (name, list, default) in [
            ("app_sections", &mut self.app_sections, fallback.app_sections),
            (
                "required_states",
                &mut self.required_states,
                fallback.required_states,
            ),
            ("user_flows", &mut self.user_flows, fallback.user_flows),
            (
                "success_criteria",
                &mut self.success_criteria,
                fallback.success_criteria,
            ),
        ] {
            list.retain(|entry| !entry.trim().is_empty());
            for entry in list.iter_mut() {
                *entry = entry.trim().to_string();
            }
            if list.is_empty() {
                *list = default;
                filled.push(name);
            }
        }
        filled
    }
}

/// Coverage verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageScore {
    Complete,
    Incomplete,
}

impl CoverageScore {
    pub fn as_str(self) -> &'static str {
        match self {
            CoverageScore::Complete => "complete",
            CoverageScore::Incomplete => "incomplete",
        }
    }
}

/// Structured verdict produced by the coverage evaluator.
///
/// `score == incomplete` implies at least one entry in `missing_areas`, and
/// `completion_percentage` stays within `0..=100`. Both are enforced by
/// [`crate::core::coverage::finalize_evaluation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageEvaluation {
    pub score: CoverageScore,
    pub feedback: String,
    pub missing_areas: Vec<String>,
    pub completed_sections: Vec<String>,
    pub completed_flows: Vec<String>,
    pub remaining_sections: Vec<String>,
    pub remaining_flows: Vec<String>,
    pub completion_percentage: f64,
}

/// Evaluation as emitted by the evaluator agent, before normalization.
///
/// Every list is optional so a partially conforming answer still parses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvaluation {
    pub score: CoverageScore,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub missing_areas: Vec<String>,
    #[serde(default)]
    pub completed_sections: Vec<String>,
    #[serde(default)]
    pub completed_flows: Vec<String>,
    #[serde(default)]
    pub remaining_sections: Vec<String>,
    #[serde(default)]
    pub remaining_flows: Vec<String>,
}

/// Session-scoped view of the app under exploration.
///
/// Mutated by the capture agent after every command; owned by the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub current_app: String,
    pub bundle_id: String,
    pub last_action: String,
    pub screenshot_count: u32,
    pub coverage_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and coverage feedback from the loop.
    User,
    /// The capture agent's own summaries.
    Agent,
    /// Command results reported back to the agent.
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Message history carried across capture iterations.
///
/// Appended to by the capture agent and the orchestrator; never truncated
/// in memory. Prompts render a bounded tail via [`Conversation::transcript`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message {
            role,
            content: content.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent user message, if any.
    pub fn last_instruction(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }

    /// Plain-text rendering of the last `max_messages` messages.
    pub fn transcript(&self, max_messages: usize) -> String {
        let skip = self.messages.len().saturating_sub(max_messages);
        self.messages[skip..]
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::User => "user",
                    Role::Agent => "agent",
                    Role::Tool => "tool",
                };
                format!("[{role}] {}", message.content.trim())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_is_complete() {
        let plan = ExplorationPlan::default();
        assert!(plan.is_complete());
        assert_eq!(
            plan.app_sections,
            vec!["Main Screens", "Settings", "Input Forms"]
        );
    }

    #[test]
    fn fill_gaps_replaces_only_empty_lists() {
        let mut plan = ExplorationPlan {
            app_sections: vec!["Login".to_string(), "  ".to_string()],
            required_states: Vec::new(),
            user_flows: vec![" Sign in ".to_string()],
            success_criteria: vec![String::new()],
        };

        let filled = plan.fill_gaps();

        assert_eq!(filled, vec!["required_states", "success_criteria"]);
        assert_eq!(plan.app_sections, vec!["Login"]);
        assert_eq!(plan.user_flows, vec!["Sign in"]);
        assert!(plan.is_complete());
    }

    #[test]
    fn app_dir_name_uses_last_bundle_component() {
        let app = AppConfig {
            name: "Messages".to_string(),
            bundle_id: "com.apple.MobileSMS".to_string(),
            description: None,
        };
        assert_eq!(app.app_dir_name(), "mobilesms");
    }

    #[test]
    fn transcript_keeps_the_tail_and_last_instruction() {
        let mut conversation = Conversation::default();
        conversation.push(Role::User, "launch");
        conversation.push(Role::Tool, "tap_element: success");
        conversation.push(Role::Agent, " captured login ");

        assert_eq!(conversation.last_instruction(), Some("launch"));
        assert_eq!(
            conversation.transcript(2),
            "[tool] tap_element: success\n[agent] captured login"
        );
        assert_eq!(conversation.transcript(10).lines().count(), 3);
    }

    #[test]
    fn raw_evaluation_tolerates_missing_lists() {
        let raw: RawEvaluation =
            serde_json::from_str(r#"{"score":"incomplete","feedback":"more"}"#).expect("parse");
        assert_eq!(raw.score, CoverageScore::Incomplete);
        assert!(raw.missing_areas.is_empty());
    }
}
