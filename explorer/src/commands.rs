//! Typed commands the capture agent issues against the live session.
//!
//! Driver failures never escape a command: they come back as a
//! [`CommandReport`] whose status the agent reads on its next turn. Only
//! trace and artifact write failures are returned as `Err`.

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::core::types::AppState;
use crate::io::artifacts::ArtifactStore;
use crate::io::driver::{
    DeviceAction, DeviceDriver, DriverError, Locator, LocatorStrategy, PhysicalButton,
    SwipeDirection,
};
use crate::io::trace::{ActionTracer, TraceAppState};
use crate::snapshot::SnapshotEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Refresh the snapshot; `query` ranks elements instead of listing all.
    GetPageSource {
        #[serde(default)]
        query: Option<String>,
    },
    TapElement {
        element_id: String,
        #[serde(default)]
        by: Option<LocatorStrategy>,
    },
    PressButton {
        button: PhysicalButton,
    },
    Swipe {
        direction: SwipeDirection,
    },
    SendInput {
        element_id: String,
        text: String,
        #[serde(default)]
        by: Option<LocatorStrategy>,
    },
    NavigateTo {
        url: String,
    },
    /// Relaunch the app within the current session.
    LaunchApp {
        bundle_id: String,
    },
    /// Save a screenshot together with the page source it shows.
    TakeScreenshot {
        #[serde(default)]
        label: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    Failure,
    NotFound,
    NotVisible,
    NoSession,
    InvalidParams,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Success => "success",
            CommandStatus::Failure => "failure",
            CommandStatus::NotFound => "not_found",
            CommandStatus::NotVisible => "not_visible",
            CommandStatus::NoSession => "no_session",
            CommandStatus::InvalidParams => "invalid_params",
        }
    }
}

impl From<&DriverError> for CommandStatus {
    fn from(err: &DriverError) -> Self {
        match err {
            DriverError::NoSession => CommandStatus::NoSession,
            DriverError::ElementNotFound(_) => CommandStatus::NotFound,
            DriverError::ElementNotVisible(_) => CommandStatus::NotVisible,
            DriverError::InvalidParams(_) => CommandStatus::InvalidParams,
            DriverError::Request(_) => CommandStatus::Failure,
        }
    }
}

/// Outcome of one command, fed back to the agent as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReport {
    pub command: String,
    pub status: CommandStatus,
    pub message: String,
}

impl CommandReport {
    fn new(command: &Command, status: CommandStatus, message: impl Into<String>) -> Self {
        Self {
            command: command.name().to_string(),
            status,
            message: message.into(),
        }
    }

    fn from_driver_error(command: &Command, err: &DriverError) -> Self {
        Self::new(command, CommandStatus::from(err), err.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

impl fmt::Display for CommandReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.command,
            self.status.as_str(),
            self.message.trim_end()
        )
    }
}

/// Everything a command may touch. Borrowed from the run for one turn.
pub struct CommandContext<'a> {
    pub driver: &'a mut dyn DeviceDriver,
    pub snapshots: &'a mut SnapshotEngine,
    pub tracer: &'a mut ActionTracer,
    pub artifacts: &'a mut ArtifactStore,
    pub state: &'a mut AppState,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetPageSource { .. } => "get_page_source",
            Command::TapElement { .. } => "tap_element",
            Command::PressButton { .. } => "press_button",
            Command::Swipe { .. } => "swipe",
            Command::SendInput { .. } => "send_input",
            Command::NavigateTo { .. } => "navigate_to",
            Command::LaunchApp { .. } => "launch_app",
            Command::TakeScreenshot { .. } => "take_screenshot",
        }
    }

    /// Short human readable form, stored as `AppState::last_action`.
    pub fn describe(&self) -> String {
        match self {
            Command::GetPageSource { query: Some(query) } => format!("get_page_source \"{query}\""),
            Command::GetPageSource { query: None } => "get_page_source".to_string(),
            Command::TapElement { element_id, .. } => format!("tap_element {element_id}"),
            Command::PressButton { button } => format!("press_button {}", button.as_str()),
            Command::Swipe { direction } => format!("swipe {}", direction.as_str()),
            Command::SendInput { element_id, .. } => format!("send_input {element_id}"),
            Command::NavigateTo { url } => format!("navigate_to {url}"),
            Command::LaunchApp { bundle_id } => format!("launch_app {bundle_id}"),
            Command::TakeScreenshot { label: Some(label) } => format!("take_screenshot {label}"),
            Command::TakeScreenshot { label: None } => "take_screenshot".to_string(),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Command::TapElement { element_id, .. } | Command::SendInput { element_id, .. }
                if element_id.trim().is_empty() =>
            {
                Err("element_id must not be empty".to_string())
            }
            Command::NavigateTo { url } if url.trim().is_empty() => {
                Err("url must not be empty".to_string())
            }
            Command::LaunchApp { bundle_id } if bundle_id.trim().is_empty() => {
                Err("bundle_id must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }

    /// The driver action this command performs, if it is a plain UI action.
    fn device_action(&self) -> Option<DeviceAction> {
        let locator = |element_id: &str, by: &Option<LocatorStrategy>| Locator {
            by: by.unwrap_or_default(),
            value: element_id.trim().to_string(),
        };
        match self {
            Command::TapElement { element_id, by } => Some(DeviceAction::Tap {
                locator: locator(element_id, by),
            }),
            Command::PressButton { button } => Some(DeviceAction::PressButton { button: *button }),
            Command::Swipe { direction } => Some(DeviceAction::Swipe {
                direction: *direction,
            }),
            Command::SendInput {
                element_id,
                text,
                by,
            } => Some(DeviceAction::Type {
                locator: locator(element_id, by),
                text: text.clone(),
            }),
            Command::NavigateTo { url } => Some(DeviceAction::Navigate {
                url: url.trim().to_string(),
            }),
            Command::LaunchApp { bundle_id } => Some(DeviceAction::Launch {
                bundle_id: bundle_id.trim().to_string(),
            }),
            Command::GetPageSource { .. } | Command::TakeScreenshot { .. } => None,
        }
    }

    /// Run the command, log it to the trace and update the app state.
    pub async fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<CommandReport> {
        let report = match self.validate() {
            Err(message) => CommandReport::new(self, CommandStatus::InvalidParams, message),
            Ok(()) => self.run(ctx).await?,
        };

        ctx.state.last_action = self.describe();
        if report.is_success()
            && let Command::LaunchApp { bundle_id } = self
        {
            ctx.state.bundle_id = bundle_id.trim().to_string();
            ctx.state.current_app = bundle_id.trim().to_string();
            ctx.tracer.update_app_state(TraceAppState {
                current_activity: Some(bundle_id.trim().to_string()),
                ..TraceAppState::default()
            });
        }

        if report.is_success() {
            info!(command = report.command, "command succeeded");
        } else {
            warn!(
                command = report.command,
                status = report.status.as_str(),
                message = report.message,
                "command did not succeed"
            );
        }
        ctx.tracer.log_action(
            self.name(),
            json!({
                "command": self,
                "status": report.status,
                "message": report.message,
            }),
        )?;
        Ok(report)
    }

    async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<CommandReport> {
        if let Some(action) = self.device_action() {
            let report = match ctx.driver.perform(&action).await {
                Ok(()) => CommandReport::new(self, CommandStatus::Success, self.describe()),
                Err(err) => CommandReport::from_driver_error(self, &err),
            };
            return Ok(report);
        }

        match self {
            Command::GetPageSource { query } => {
                Ok(self.get_page_source(ctx, query.as_deref()).await)
            }
            Command::TakeScreenshot { label } => self.take_screenshot(ctx, label.as_deref()).await,
            _ => Ok(CommandReport::new(
                self,
                CommandStatus::Failure,
                "command has no handler",
            )),
        }
    }

    async fn get_page_source(
        &self,
        ctx: &mut CommandContext<'_>,
        query: Option<&str>,
    ) -> CommandReport {
        let observation = match ctx.snapshots.capture(&mut *ctx.driver).await {
            Ok(observation) => observation,
            Err(err) => return CommandReport::from_driver_error(self, &err),
        };
        let Some(snapshot) = ctx.snapshots.current() else {
            return CommandReport::new(self, CommandStatus::Failure, "no snapshot captured");
        };
        ctx.tracer
            .set_snapshot_state(snapshot.screen_title(), &snapshot.content_hash);
        let mut message = snapshot.view(query);
        if let Some(diff) = observation.diff.filter(|diff| !diff.is_empty()) {
            message.push_str(&diff.summary());
        }
        CommandReport::new(self, CommandStatus::Success, message)
    }

    async fn take_screenshot(
        &self,
        ctx: &mut CommandContext<'_>,
        label: Option<&str>,
    ) -> Result<CommandReport> {
        let png = match ctx.driver.screenshot().await {
            Ok(png) => png,
            Err(err) => return Ok(CommandReport::from_driver_error(self, &err)),
        };
        let page_source = match ctx.driver.capture_snapshot().await {
            Ok(page_source) => page_source,
            Err(err) => return Ok(CommandReport::from_driver_error(self, &err)),
        };
        let saved = ctx.artifacts.save_capture(&png, &page_source)?;
        ctx.snapshots.observe(page_source);
        if let Some(snapshot) = ctx.snapshots.current() {
            ctx.tracer
                .set_snapshot_state(snapshot.screen_title(), &snapshot.content_hash);
        }
        ctx.state.screenshot_count += 1;

        let mut message = format!(
            "Artifacts saved successfully:\nScreenshot: {}\nPage Source: {}",
            saved.screenshot.display(),
            saved.page_source.display()
        );
        if let Some(label) = label.map(str::trim).filter(|label| !label.is_empty()) {
            message.push_str(&format!("\nLabel: {label}"));
        }
        Ok(CommandReport::new(self, CommandStatus::Success, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{LOGIN_SCREEN, SETTINGS_SCREEN, ScriptedDriver};

    const SPLASH_SCREEN: &str = r#"<AppiumAUT>
  <XCUIElementTypeApplication type="XCUIElementTypeApplication" name="Demo" enabled="true" visible="true" accessible="false">
    <XCUIElementTypeButton type="XCUIElementTypeButton" name="Continue" label="Continue" enabled="true" visible="true" accessible="true" x="20" y="700" width="350" height="44"/>
  </XCUIElementTypeApplication>
</AppiumAUT>"#;

    fn screens(sources: &[&str]) -> ScriptedDriver {
        ScriptedDriver::new(sources.iter().map(|source| source.to_string()).collect())
    }

    struct Harness {
        _temp: tempfile::TempDir,
        driver: ScriptedDriver,
        snapshots: SnapshotEngine,
        tracer: ActionTracer,
        artifacts: ArtifactStore,
        state: AppState,
    }

    impl Harness {
        fn new(driver: ScriptedDriver) -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let mut tracer = ActionTracer::new(temp.path());
            tracer.start_new_trace("demo", Some("com.example.Demo")).expect("trace");
            let artifacts = ArtifactStore::new(temp.path(), "demo", "20250101_120000");
            Self {
                _temp: temp,
                driver,
                snapshots: SnapshotEngine::new(),
                tracer,
                artifacts,
                state: AppState::default(),
            }
        }

        async fn run(&mut self, command: &Command) -> CommandReport {
            let mut ctx = CommandContext {
                driver: &mut self.driver,
                snapshots: &mut self.snapshots,
                tracer: &mut self.tracer,
                artifacts: &mut self.artifacts,
                state: &mut self.state,
            };
            command.execute(&mut ctx).await.expect("execute")
        }
    }

    #[test]
    fn commands_deserialize_from_agent_json() {
        let commands: Vec<Command> = serde_json::from_str(
            r#"[
                {"type":"tap_element","element_id":"Submit","by":null},
                {"type":"press_button","button":"volume_up"},
                {"type":"send_input","element_id":"//XCUIElementTypeTextField","text":"hi","by":"xpath"},
                {"type":"get_page_source","query":null}
            ]"#,
        )
        .expect("parse");
        assert_eq!(
            commands[0],
            Command::TapElement {
                element_id: "Submit".to_string(),
                by: None
            }
        );
        assert_eq!(
            commands[1],
            Command::PressButton {
                button: PhysicalButton::VolumeUp
            }
        );
        assert!(matches!(
            commands[2],
            Command::SendInput {
                by: Some(LocatorStrategy::Xpath),
                ..
            }
        ));
        assert_eq!(commands[3], Command::GetPageSource { query: None });
    }

    #[tokio::test]
    async fn driver_errors_become_statuses() {
        let driver = screens(&[LOGIN_SCREEN]).with_missing_element("Ghost");
        let mut harness = Harness::new(driver);

        let report = harness
            .run(&Command::TapElement {
                element_id: "Ghost".to_string(),
                by: None,
            })
            .await;

        assert_eq!(report.status, CommandStatus::NotFound);
        assert_eq!(harness.state.last_action, "tap_element Ghost");
        assert!(report.to_string().starts_with("tap_element [not_found]"));
    }

    #[tokio::test]
    async fn empty_parameters_are_rejected_without_touching_the_driver() {
        let mut harness = Harness::new(screens(&[LOGIN_SCREEN]));

        let report = harness
            .run(&Command::LaunchApp {
                bundle_id: "  ".to_string(),
            })
            .await;

        assert_eq!(report.status, CommandStatus::InvalidParams);
        assert!(harness.driver.actions().is_empty());
        assert_eq!(harness.state.bundle_id, "");
    }

    #[tokio::test]
    async fn screenshot_saves_artifacts_and_counts() {
        let mut harness = Harness::new(screens(&[LOGIN_SCREEN]));

        let report = harness
            .run(&Command::TakeScreenshot {
                label: Some("login".to_string()),
            })
            .await;

        assert!(report.is_success(), "{report}");
        assert_eq!(harness.state.screenshot_count, 1);
        assert_eq!(harness.artifacts.manifest().screenshots.len(), 1);
        assert!(report.message.contains("Label: login"));
        assert!(harness.tracer.app_state().last_page_source_hash.is_some());
    }

    #[tokio::test]
    async fn launch_updates_state_and_get_page_source_ranks() {
        let mut harness = Harness::new(screens(&[LOGIN_SCREEN]));

        let launch = harness
            .run(&Command::LaunchApp {
                bundle_id: "com.example.Demo".to_string(),
            })
            .await;
        assert!(launch.is_success());
        assert_eq!(harness.state.current_app, "com.example.Demo");

        let source = harness
            .run(&Command::GetPageSource {
                query: Some("submit button".to_string()),
            })
            .await;
        assert!(
            source.message.starts_with("[35] Button name=\"Submit\""),
            "{}",
            source.message
        );
    }

    #[tokio::test]
    async fn signing_in_to_settings_reports_the_diff() {
        let mut harness = Harness::new(screens(&[LOGIN_SCREEN, SETTINGS_SCREEN]));

        let login = harness.run(&Command::GetPageSource { query: None }).await;
        assert!(login.is_success(), "{login}");
        assert_eq!(harness.tracer.app_state().current_screen.as_deref(), Some("Sign In"));

        let settings = harness.run(&Command::GetPageSource { query: None }).await;
        assert!(settings.message.contains("Dark Mode"), "{}", settings.message);
        assert!(
            settings.message.contains("- XCUIElementTypeButton|"),
            "{}",
            settings.message
        );
        assert!(
            settings.message.contains("+ XCUIElementTypeSwitch|"),
            "{}",
            settings.message
        );
        assert_eq!(harness.tracer.app_state().current_screen.as_deref(), Some("Settings"));
    }

    #[tokio::test]
    async fn screen_without_title_clears_the_traced_screen() {
        let mut harness = Harness::new(screens(&[LOGIN_SCREEN, SPLASH_SCREEN]));

        harness.run(&Command::GetPageSource { query: None }).await;
        let login_hash = harness.tracer.app_state().last_page_source_hash.clone();
        harness.run(&Command::GetPageSource { query: None }).await;

        let state = harness.tracer.app_state();
        assert_eq!(state.current_screen, None);
        assert_ne!(state.last_page_source_hash, login_hash);
    }

    #[tokio::test]
    async fn missing_session_is_reported_not_raised() {
        let mut harness = Harness::new(ScriptedDriver::without_session());

        let report = harness.run(&Command::GetPageSource { query: None }).await;

        assert_eq!(report.status, CommandStatus::NoSession);
    }
}
