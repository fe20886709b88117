//! End-to-end coverage loop runs with scripted agents and a scripted device.

use std::fs;

use serde_json::{Value, json};

use explorer::agents::AgentKind;
use explorer::core::types::{CoverageScore, ExplorationPlan};
use explorer::io::trace::TraceDocument;
use explorer::orchestrator::{LoopEvent, RunStop, run_exploration};
use explorer::test_support::{
    LOGIN_SCREEN, ScriptedDriver, ScriptedExecutor, ScriptedOutput, capture_json,
    evaluation_json, sample_app, temp_config,
};

fn login_plan() -> Value {
    json!({
        "app_sections": ["Login"],
        "required_states": ["Signed out"],
        "user_flows": ["Sign in"],
        "success_criteria": ["Login form captured"],
    })
}

fn screenshot_turn() -> ScriptedOutput {
    ScriptedOutput::Json(capture_json(
        "Captured the login form",
        json!([{ "type": "take_screenshot", "label": "login" }]),
        true,
    ))
}

fn login_driver() -> ScriptedDriver {
    ScriptedDriver::new(vec![LOGIN_SCREEN.to_string()])
}

fn read_trace(path: &std::path::Path) -> TraceDocument {
    let text = fs::read_to_string(path).expect("read trace");
    serde_json::from_str(&text).expect("parse trace")
}

#[tokio::test]
async fn complete_on_second_evaluation() {
    let (_temp, config) = temp_config();
    let executor = ScriptedExecutor::new()
        .planner(ScriptedOutput::Json(login_plan()))
        .capture(screenshot_turn())
        .evaluator(ScriptedOutput::Json(evaluation_json(
            "complete",
            &["Login"],
            &["Sign in"],
            &[],
        )));
    let mut driver = login_driver();
    let mut events = Vec::new();

    let outcome = run_exploration(&config, &sample_app(), &executor, &mut driver, |event| {
        events.push(event.clone());
    })
    .await
    .expect("run");

    assert_eq!(outcome.stop, RunStop::Complete);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.evaluation.score, CoverageScore::Complete);
    assert_eq!(outcome.evaluation.completion_percentage, 100.0);
    assert_eq!(executor.calls(AgentKind::Planner), 1);
    assert_eq!(executor.calls(AgentKind::Evaluator), 2);
    assert_eq!(outcome.manifest.screenshots.len(), 2);

    let verdicts: Vec<CoverageScore> = events
        .iter()
        .filter_map(|event| match event {
            LoopEvent::Evaluated { evaluation, .. } => Some(evaluation.score),
            _ => None,
        })
        .collect();
    assert_eq!(
        verdicts,
        vec![CoverageScore::Incomplete, CoverageScore::Complete]
    );

    let second_prompt = &executor.prompts(AgentKind::Capture)[1];
    assert!(
        second_prompt.contains("Coverage Feedback: keep going"),
        "{second_prompt}"
    );

    assert!(driver.terminated());
    let trace = read_trace(outcome.manifest.trace_path.as_deref().expect("trace path"));
    let kinds: Vec<&str> = trace
        .actions
        .iter()
        .map(|action| action.action_type.as_str())
        .collect();
    assert_eq!(kinds.first(), Some(&"session_start"));
    assert!(kinds.contains(&"plan_created"));
    assert!(kinds.contains(&"take_screenshot"));
    assert_eq!(kinds.last(), Some(&"session_end"));
}

#[tokio::test]
async fn incomplete_verdicts_always_name_missing_areas() {
    let (_temp, mut config) = temp_config();
    config.max_iterations = 1;
    let executor = ScriptedExecutor::new()
        .planner(ScriptedOutput::Json(login_plan()))
        .capture(screenshot_turn())
        .evaluator(ScriptedOutput::Json(evaluation_json(
            "incomplete",
            &[],
            &[],
            &[],
        )));
    let mut driver = login_driver();
    let mut missing = Vec::new();

    let outcome = run_exploration(&config, &sample_app(), &executor, &mut driver, |event| {
        if let LoopEvent::Evaluated { evaluation, .. } = event {
            missing.push(evaluation.missing_areas.clone());
        }
    })
    .await
    .expect("run");

    assert_eq!(outcome.stop, RunStop::MaxIterations);
    assert_eq!(missing.len(), 1);
    assert!(!missing[0].is_empty());
}

#[tokio::test]
async fn planner_failure_falls_back_to_default_plan() {
    let (_temp, mut config) = temp_config();
    config.max_iterations = 1;
    let executor = ScriptedExecutor::new()
        .planner(ScriptedOutput::Fail("model unavailable".to_string()))
        .capture(screenshot_turn())
        .evaluator(ScriptedOutput::Json(evaluation_json(
            "incomplete",
            &["Main navigation"],
            &[],
            &["Settings"],
        )));
    let mut driver = login_driver();
    let mut fallback = None;

    let outcome = run_exploration(&config, &sample_app(), &executor, &mut driver, |event| {
        if let LoopEvent::PlanFallback { reason } = event {
            fallback = Some(reason.clone());
        }
    })
    .await
    .expect("run");

    assert!(fallback.expect("fallback event").contains("model unavailable"));
    assert_eq!(outcome.plan, ExplorationPlan::default());
    assert_eq!(executor.calls(AgentKind::Capture), 1);
    assert_eq!(outcome.manifest.screenshots.len(), 1);
}

#[tokio::test]
async fn stops_at_iteration_ceiling() {
    let (_temp, mut config) = temp_config();
    config.max_iterations = 3;
    let executor = ScriptedExecutor::new()
        .planner(ScriptedOutput::Json(login_plan()))
        .capture(screenshot_turn())
        .evaluator(ScriptedOutput::Json(evaluation_json(
            "incomplete",
            &["Login"],
            &[],
            &["Sign in flow"],
        )));
    let mut driver = login_driver();

    let outcome = run_exploration(&config, &sample_app(), &executor, &mut driver, |_| {})
        .await
        .expect("run");

    assert_eq!(outcome.stop, RunStop::MaxIterations);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(executor.calls(AgentKind::Evaluator), 3);
    assert_eq!(outcome.evaluation.completion_percentage, 50.0);
    assert_eq!(outcome.manifest.iteration_dirs.len(), 3);

    let run_dir = outcome.manifest.app_dir.join("runs").join(&outcome.run_id);
    assert!(run_dir.join("plan.json").is_file());
    assert!(run_dir.join("manifest.json").is_file());
    for dir in &outcome.manifest.iteration_dirs {
        assert!(dir.join("evaluation.json").is_file(), "{}", dir.display());
    }
}

#[tokio::test]
async fn agent_timing_out_at_the_deadline_ends_the_run_cleanly() {
    let (_temp, mut config) = temp_config();
    config.run_timeout_secs = Some(1);
    let executor = ScriptedExecutor::new()
        .planner(ScriptedOutput::Json(login_plan()))
        .capture(ScriptedOutput::Stall("agent timed out".to_string()))
        .evaluator(ScriptedOutput::Json(evaluation_json(
            "complete",
            &["Login"],
            &[],
            &[],
        )));
    let mut driver = login_driver();

    let outcome = run_exploration(&config, &sample_app(), &executor, &mut driver, |_| {})
        .await
        .expect("deadline ends the run without an error");

    assert_eq!(outcome.stop, RunStop::DeadlineExceeded);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(executor.calls(AgentKind::Capture), 1);
    assert_eq!(executor.calls(AgentKind::Evaluator), 0);
    assert!(driver.terminated());

    let trace = read_trace(outcome.manifest.trace_path.as_deref().expect("trace path"));
    let kinds: Vec<&str> = trace
        .actions
        .iter()
        .map(|action| action.action_type.as_str())
        .collect();
    assert!(!kinds.contains(&"run_error"));
    assert_eq!(kinds.last(), Some(&"session_end"));
}

#[tokio::test]
async fn session_failure_is_fatal_after_retries() {
    let (temp, config) = temp_config();
    let executor = ScriptedExecutor::new()
        .planner(ScriptedOutput::Json(login_plan()))
        .capture(screenshot_turn());
    let mut driver = ScriptedDriver::without_session().failing_init(10);
    let mut recovered = 0;

    let err = run_exploration(&config, &sample_app(), &executor, &mut driver, |event| {
        if matches!(event, LoopEvent::Recovered { .. }) {
            recovered += 1;
        }
    })
    .await
    .unwrap_err();

    assert!(
        err.to_string().contains("after 3 attempts"),
        "{err:#}"
    );
    assert_eq!(driver.init_calls(), 3);
    assert_eq!(recovered, 2);
    assert!(driver.terminated());
    assert_eq!(executor.calls(AgentKind::Capture), 0);

    let traces = temp.path().join("demo").join("traces");
    let trace_file = fs::read_dir(&traces)
        .expect("traces dir")
        .next()
        .expect("one trace")
        .expect("dir entry")
        .path();
    let trace = read_trace(&trace_file);
    let kinds: Vec<&str> = trace
        .actions
        .iter()
        .map(|action| action.action_type.as_str())
        .collect();
    assert!(kinds.contains(&"run_error"));
    assert_eq!(kinds.last(), Some(&"session_end"));
}
