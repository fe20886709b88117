//! Test-only doubles for the executor and device driver, plus fixtures.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agents::AgentKind;
use crate::core::types::AppConfig;
use crate::io::config::ExplorerConfig;
use crate::io::driver::{DeviceAction, DeviceDriver, DriverError, DriverResult};
use crate::io::executor::{ExecRequest, Executor};

/// Login screen with a title, a welcome text, an email field and two buttons.
pub const LOGIN_SCREEN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<AppiumAUT>
  <XCUIElementTypeApplication type="XCUIElementTypeApplication" name="Demo" label="Demo" enabled="true" visible="true" accessible="false" x="0" y="0" width="390" height="844">
    <XCUIElementTypeWindow type="XCUIElementTypeWindow" enabled="true" visible="true" accessible="false" x="0" y="0" width="390" height="844">
      <XCUIElementTypeNavigationBar type="XCUIElementTypeNavigationBar" name="Sign In" enabled="true" visible="true" accessible="false" x="0" y="47" width="390" height="44"/>
      <XCUIElementTypeOther type="XCUIElementTypeOther" enabled="true" visible="true" accessible="false" x="0" y="91" width="390" height="700">
        <XCUIElementTypeStaticText type="XCUIElementTypeStaticText" name="Welcome back" label="Welcome back" value="Welcome back" enabled="true" visible="true" accessible="true" x="20" y="120" width="350" height="30"/>
        <XCUIElementTypeTextField type="XCUIElementTypeTextField" name="Email" label="Email" value="" enabled="true" visible="true" accessible="true" x="20" y="200" width="350" height="44"/>
        <XCUIElementTypeButton type="XCUIElementTypeButton" name="Cancel" label="Cancel" enabled="true" visible="true" accessible="true" x="20" y="300" width="160" height="44"/>
        <XCUIElementTypeButton type="XCUIElementTypeButton" name="Submit" label="Submit" enabled="true" visible="true" accessible="true" x="210" y="300" width="160" height="44"/>
      </XCUIElementTypeOther>
    </XCUIElementTypeWindow>
  </XCUIElementTypeApplication>
</AppiumAUT>
"#;

/// Settings screen reached after signing in.
pub const SETTINGS_SCREEN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<AppiumAUT>
  <XCUIElementTypeApplication type="XCUIElementTypeApplication" name="Demo" label="Demo" enabled="true" visible="true" accessible="false" x="0" y="0" width="390" height="844">
    <XCUIElementTypeNavigationBar type="XCUIElementTypeNavigationBar" name="Settings" enabled="true" visible="true" accessible="false" x="0" y="47" width="390" height="44"/>
    <XCUIElementTypeCell type="XCUIElementTypeCell" name="Notifications" label="Notifications" enabled="true" visible="true" accessible="true" x="0" y="120" width="390" height="44"/>
    <XCUIElementTypeSwitch type="XCUIElementTypeSwitch" name="Dark Mode" label="Dark Mode" value="0" enabled="true" visible="true" accessible="true" x="320" y="170" width="51" height="31"/>
    <XCUIElementTypeTabBar type="XCUIElementTypeTabBar" name="Tab Bar" enabled="true" visible="true" accessible="false" x="0" y="760" width="390" height="84">
      <XCUIElementTypeButton type="XCUIElementTypeButton" name="Home" label="Home" enabled="true" visible="true" accessible="true" x="0" y="761" width="195" height="48"/>
      <XCUIElementTypeButton type="XCUIElementTypeButton" name="Settings" label="Settings" enabled="true" visible="true" accessible="true" x="195" y="761" width="195" height="48"/>
    </XCUIElementTypeTabBar>
  </XCUIElementTypeApplication>
</AppiumAUT>
"#;

/// PNG signature, enough to stand in for a screenshot.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n";

pub fn sample_app() -> AppConfig {
    AppConfig {
        name: "Demo".to_string(),
        bundle_id: "com.example.Demo".to_string(),
        description: Some("A demo app with a login form and settings".to_string()),
    }
}

/// Config tuned for tests: artifacts under `artifacts_dir`, no retry delay
/// to speak of and small limits.
pub fn test_config(artifacts_dir: &Path) -> ExplorerConfig {
    ExplorerConfig {
        max_iterations: 5,
        max_capture_turns: 3,
        artifacts_dir: artifacts_dir.display().to_string(),
        session_retry_delay_ms: 1,
        ..ExplorerConfig::default()
    }
}

/// [`test_config`] rooted in a fresh temp dir. Keep the dir alive for the
/// duration of the test.
pub fn temp_config() -> (tempfile::TempDir, ExplorerConfig) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    (dir, config)
}

/// Capture agent answer with no focus.
pub fn capture_json(summary: &str, commands: Value, done: bool) -> Value {
    json!({
        "summary": summary,
        "commands": commands,
        "focus": null,
        "done": done,
    })
}

/// Evaluator answer with empty remaining lists.
pub fn evaluation_json(
    score: &str,
    completed_sections: &[&str],
    completed_flows: &[&str],
    missing_areas: &[&str],
) -> Value {
    json!({
        "score": score,
        "feedback": "keep going",
        "missing_areas": missing_areas,
        "completed_sections": completed_sections,
        "completed_flows": completed_flows,
        "remaining_sections": [],
        "remaining_flows": [],
    })
}

/// What a scripted agent invocation does.
#[derive(Debug, Clone)]
pub enum ScriptedOutput {
    /// Write this JSON as the agent output.
    Json(Value),
    /// Fail the invocation with this message.
    Fail(String),
    /// Wait out the request timeout, then fail with this message.
    Stall(String),
}

/// Executor returning scripted outputs per agent.
///
/// Outputs are consumed in order; the last one repeats. An agent with no
/// script fails.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<AgentKind, VecDeque<ScriptedOutput>>>,
    requests: Mutex<Vec<(AgentKind, ExecRequest)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn planner(self, output: ScriptedOutput) -> Self {
        self.push(AgentKind::Planner, output)
    }

    pub fn capture(self, output: ScriptedOutput) -> Self {
        self.push(AgentKind::Capture, output)
    }

    pub fn evaluator(self, output: ScriptedOutput) -> Self {
        self.push(AgentKind::Evaluator, output)
    }

    fn push(self, kind: AgentKind, output: ScriptedOutput) -> Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(kind)
            .or_default()
            .push_back(output);
        self
    }

    pub fn calls(&self, kind: AgentKind) -> usize {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter(|(recorded, _)| *recorded == kind)
            .count()
    }

    pub fn prompts(&self, kind: AgentKind) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter(|(recorded, _)| *recorded == kind)
            .map(|(_, request)| request.prompt.clone())
            .collect()
    }

    fn next_output(&self, kind: AgentKind) -> Option<ScriptedOutput> {
        let mut scripts = self.scripts.lock().expect("scripts lock");
        let queue = scripts.get_mut(&kind)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn exec(&self, request: &ExecRequest) -> Result<()> {
        let kind = AgentKind::from_schema_path(&request.output_schema_path)
            .ok_or_else(|| anyhow!("unknown schema {}", request.output_schema_path.display()))?;
        self.requests
            .lock()
            .expect("requests lock")
            .push((kind, request.clone()));

        match self.next_output(kind) {
            Some(ScriptedOutput::Json(value)) => {
                if let Some(parent) = request.output_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut buf = serde_json::to_string_pretty(&value)?;
                buf.push('\n');
                fs::write(&request.output_path, buf)?;
                Ok(())
            }
            Some(ScriptedOutput::Fail(message)) => Err(anyhow!(message)),
            Some(ScriptedOutput::Stall(message)) => {
                tokio::time::sleep(request.timeout).await;
                Err(anyhow!(message))
            }
            None => Err(anyhow!("no scripted output for {}", kind.as_str())),
        }
    }
}

/// Driver replaying page sources in order; the last one repeats.
#[derive(Debug)]
pub struct ScriptedDriver {
    snapshots: VecDeque<String>,
    session: bool,
    init_failures: u32,
    init_calls: u32,
    missing: Vec<String>,
    actions: Vec<DeviceAction>,
    terminated: bool,
}

impl ScriptedDriver {
    /// Driver with a live session.
    pub fn new(snapshots: Vec<String>) -> Self {
        Self {
            snapshots: snapshots.into(),
            session: true,
            init_failures: 0,
            init_calls: 0,
            missing: Vec::new(),
            actions: Vec::new(),
            terminated: false,
        }
    }

    /// Driver whose session is gone; every call reports `NoSession`.
    pub fn without_session() -> Self {
        Self {
            session: false,
            ..Self::new(Vec::new())
        }
    }

    /// Fail the next `times` calls to `initialize`.
    pub fn failing_init(mut self, times: u32) -> Self {
        self.init_failures = times;
        self
    }

    /// Report `ElementNotFound` for taps and input on `element_id`.
    pub fn with_missing_element(mut self, element_id: &str) -> Self {
        self.missing.push(element_id.to_string());
        self
    }

    pub fn actions(&self) -> &[DeviceAction] {
        &self.actions
    }

    pub fn init_calls(&self) -> u32 {
        self.init_calls
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    fn require_session(&self) -> DriverResult<()> {
        if self.session {
            Ok(())
        } else {
            Err(DriverError::NoSession)
        }
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    async fn initialize(&mut self, _bundle_id: &str) -> DriverResult<()> {
        self.init_calls += 1;
        if self.init_failures > 0 {
            self.init_failures -= 1;
            return Err(DriverError::Request("simulated session failure".to_string()));
        }
        self.session = true;
        Ok(())
    }

    async fn capture_snapshot(&mut self) -> DriverResult<String> {
        self.require_session()?;
        let snapshot = if self.snapshots.len() > 1 {
            self.snapshots.pop_front()
        } else {
            self.snapshots.front().cloned()
        };
        Ok(snapshot.unwrap_or_default())
    }

    async fn perform(&mut self, action: &DeviceAction) -> DriverResult<()> {
        self.require_session()?;
        self.actions.push(action.clone());
        match action {
            DeviceAction::Tap { locator } | DeviceAction::Type { locator, .. }
                if self.missing.contains(&locator.value) =>
            {
                Err(DriverError::ElementNotFound(locator.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn screenshot(&mut self) -> DriverResult<Vec<u8>> {
        self.require_session()?;
        Ok(PNG_BYTES.to_vec())
    }

    async fn terminate(&mut self) -> DriverResult<()> {
        self.session = false;
        self.terminated = true;
        Ok(())
    }
}
