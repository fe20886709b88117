//! Messages carried from one loop iteration to the next.

use super::types::{AppConfig, CoverageEvaluation};

const CONTINUE_INSTRUCTION: &str = "Continue from the current screen. \
    Do not relaunch the app; the session and its state carry over.";

/// Opening instruction for the first capture turn.
pub fn initial_instruction(app: &AppConfig) -> String {
    format!(
        "Please launch {} ({}) and start capturing screenshots systematically.",
        app.name, app.bundle_id
    )
}

/// Feedback for the next capture iteration.
///
/// Prefers the evaluator's first remaining section and flow over the generic
/// list of missing areas.
pub fn feedback_message(evaluation: &CoverageEvaluation) -> String {
    let mut message = format!("Coverage Feedback: {}\n", evaluation.feedback.trim());
    let section = evaluation.remaining_sections.first();
    let flow = evaluation.remaining_flows.first();
    match (section, flow) {
        (Some(section), Some(flow)) => message.push_str(&format!(
            "Next, explore the \"{section}\" section and complete the \"{flow}\" flow.\n"
        )),
        (Some(section), None) => {
            message.push_str(&format!("Next, explore the \"{section}\" section.\n"));
        }
        (None, Some(flow)) => {
            message.push_str(&format!("Next, complete the \"{flow}\" flow.\n"));
        }
        (None, None) => message.push_str(&format!(
            "Please capture screenshots of: {}\n",
            evaluation.missing_areas.join(", ")
        )),
    }
    message.push_str(CONTINUE_INSTRUCTION);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CoverageScore;

    fn evaluation() -> CoverageEvaluation {
        CoverageEvaluation {
            score: CoverageScore::Incomplete,
            feedback: "Settings not visited.".to_string(),
            missing_areas: vec!["Settings".to_string(), "Error state".to_string()],
            completed_sections: Vec::new(),
            completed_flows: Vec::new(),
            remaining_sections: Vec::new(),
            remaining_flows: Vec::new(),
            completion_percentage: 0.0,
        }
    }

    #[test]
    fn prefers_remaining_section_and_flow() {
        let mut eval = evaluation();
        eval.remaining_sections = vec!["Settings".to_string(), "Profile".to_string()];
        eval.remaining_flows = vec!["Sign out".to_string()];

        let message = feedback_message(&eval);

        assert!(message.starts_with("Coverage Feedback: Settings not visited.\n"));
        assert!(message.contains(
            "explore the \"Settings\" section and complete the \"Sign out\" flow"
        ));
        assert!(!message.contains("Please capture screenshots of"));
        assert!(message.ends_with(CONTINUE_INSTRUCTION));
    }

    #[test]
    fn falls_back_to_missing_areas() {
        let message = feedback_message(&evaluation());
        assert!(message.contains("Please capture screenshots of: Settings, Error state\n"));
        assert!(message.contains("Do not relaunch the app"));
    }

    #[test]
    fn initial_instruction_names_the_app() {
        let app = AppConfig {
            name: "Messages".to_string(),
            bundle_id: "com.apple.MobileSMS".to_string(),
            description: None,
        };
        assert_eq!(
            initial_instruction(&app),
            "Please launch Messages (com.apple.MobileSMS) \
             and start capturing screenshots systematically."
        );
    }
}
