//! Coverage arithmetic and evaluation normalization.
//!
//! The evaluator agent's answer is never trusted as-is: every evaluation goes
//! through [`finalize_evaluation`] before the loop looks at it.

use super::types::{CoverageEvaluation, CoverageScore, ExplorationPlan, RawEvaluation};

/// Placeholder areas used when an incomplete verdict names none.
pub const DEFAULT_MISSING_AREAS: &[&str] = &["different app states", "unexplored app sections"];

const FIRST_EVALUATION_FEEDBACK: &str =
    "First evaluation: keep exploring to confirm coverage before finishing.";

/// Normalize a raw evaluation against the plan.
///
/// `evaluation_index` is zero-based within the run. The first evaluation is
/// never `complete`. An incomplete verdict always names at least one missing
/// area, and the completion percentage is recomputed from the plan.
pub fn finalize_evaluation(
    raw: RawEvaluation,
    plan: &ExplorationPlan,
    evaluation_index: usize,
) -> CoverageEvaluation {
    let completed_sections = clean_list(raw.completed_sections);
    let completed_flows = clean_list(raw.completed_flows);

    let mut score = raw.score;
    let mut feedback = raw.feedback.trim().to_string();
    if evaluation_index == 0 && score == CoverageScore::Complete {
        score = CoverageScore::Incomplete;
        if feedback.is_empty() {
            feedback = FIRST_EVALUATION_FEEDBACK.to_string();
        }
    }

    let mut missing_areas = clean_list(raw.missing_areas);
    if score == CoverageScore::Incomplete && missing_areas.is_empty() {
        missing_areas = default_missing_areas();
    }

    let mut remaining_sections = clean_list(raw.remaining_sections);
    if remaining_sections.is_empty() {
        remaining_sections = not_yet_done(&plan.app_sections, &completed_sections);
    }
    let mut remaining_flows = clean_list(raw.remaining_flows);
    if remaining_flows.is_empty() {
        remaining_flows = not_yet_done(&plan.user_flows, &completed_flows);
    }

    let completion_percentage = completion_percentage(plan, &completed_sections, &completed_flows);

    CoverageEvaluation {
        score,
        feedback,
        missing_areas,
        completed_sections,
        completed_flows,
        remaining_sections,
        remaining_flows,
        completion_percentage,
    }
}

/// Evaluation used when the evaluator fails or its answer cannot be read.
pub fn default_evaluation(plan: &ExplorationPlan) -> CoverageEvaluation {
    CoverageEvaluation {
        score: CoverageScore::Incomplete,
        feedback: "Coverage could not be evaluated; continue exploring the planned sections."
            .to_string(),
        missing_areas: default_missing_areas(),
        completed_sections: Vec::new(),
        completed_flows: Vec::new(),
        remaining_sections: plan.app_sections.clone(),
        remaining_flows: plan.user_flows.clone(),
        completion_percentage: 0.0,
    }
}

/// Share of planned sections and flows reported as completed, in `0..=100`.
pub fn completion_percentage(
    plan: &ExplorationPlan,
    completed_sections: &[String],
    completed_flows: &[String],
) -> f64 {
    let total = plan.app_sections.len() + plan.user_flows.len();
    if total == 0 {
        return 0.0;
    }
    let done = matched(&plan.app_sections, completed_sections)
        + matched(&plan.user_flows, completed_flows);
    (100.0 * done as f64 / total as f64).clamp(0.0, 100.0)
}

fn default_missing_areas() -> Vec<String> {
    DEFAULT_MISSING_AREAS
        .iter()
        .map(|area| area.to_string())
        .collect()
}

fn matched(planned: &[String], completed: &[String]) -> usize {
    planned
        .iter()
        .filter(|item| contains_normalized(completed, item))
        .count()
}

fn not_yet_done(planned: &[String], completed: &[String]) -> Vec<String> {
    planned
        .iter()
        .filter(|item| !contains_normalized(completed, item))
        .cloned()
        .collect()
}

fn contains_normalized(list: &[String], item: &str) -> bool {
    let needle = normalize(item);
    list.iter().any(|entry| normalize(entry) == needle)
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn clean_list(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}
