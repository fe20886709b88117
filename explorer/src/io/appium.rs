//! [`DeviceDriver`] over the W3C WebDriver protocol spoken by Appium.
//!
//! Expects an Appium server that is already running; starting the server
//! and discovering devices is left to the operator.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::io::config::AppiumConfig;
use crate::io::driver::{
    DeviceAction, DeviceDriver, DriverError, DriverResult, Locator, SwipeDirection,
};

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const SWIPE_DURATION_SECS: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WindowRect {
    width: f64,
    height: f64,
}

pub struct AppiumDriver {
    client: Client,
    base_url: String,
    config: AppiumConfig,
    session_id: Option<String>,
}

impl AppiumDriver {
    pub fn new(config: &AppiumConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build appium http client")?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            config: config.clone(),
            session_id: None,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn capabilities(&self, bundle_id: &str) -> Value {
        let mut caps = json!({
            "platformName": self.config.platform_name,
            "appium:automationName": self.config.automation_name,
            "appium:deviceName": self.config.device_name,
            "appium:platformVersion": self.config.platform_version,
            "appium:bundleId": bundle_id,
        });
        if let (Some(udid), Some(map)) = (&self.config.udid, caps.as_object_mut()) {
            map.insert("appium:udid".to_string(), json!(udid));
        }
        json!({ "capabilities": { "alwaysMatch": caps, "firstMatch": [{}] } })
    }

    fn session_path(&self, suffix: &str) -> DriverResult<String> {
        let id = self.session_id.as_deref().ok_or(DriverError::NoSession)?;
        Ok(format!("/session/{id}{suffix}"))
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> DriverResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %path, "appium request");
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| DriverError::Request(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| DriverError::Request(err.to_string()))?;
        let parsed: WireResponse = serde_json::from_str(&text).map_err(|err| {
            DriverError::Request(format!("unreadable response ({status}): {err}"))
        })?;
        if status.is_success() {
            return Ok(parsed.value);
        }
        Err(wire_error(&parsed.value, status.as_u16()))
    }

    async fn session_call(
        &self,
        method: Method,
        suffix: &str,
        body: Option<Value>,
    ) -> DriverResult<Value> {
        let path = self.session_path(suffix)?;
        self.call(method, &path, body).await
    }

    async fn execute_script(&self, script: &str, args: Value) -> DriverResult<Value> {
        self.session_call(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": [args] })),
        )
        .await
    }

    async fn find_element(&self, locator: &Locator) -> DriverResult<String> {
        let value = self
            .session_call(
                Method::POST,
                "/element",
                Some(json!({ "using": locator.by.as_webdriver(), "value": locator.value })),
            )
            .await
            .map_err(|err| match err {
                DriverError::ElementNotFound(_) => {
                    DriverError::ElementNotFound(locator.to_string())
                }
                other => other,
            })?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DriverError::Request(format!("no element reference for {locator}")))
    }

    async fn tap(&self, locator: &Locator) -> DriverResult<()> {
        let element = self.find_element(locator).await?;
        let displayed = self
            .session_call(Method::GET, &format!("/element/{element}/displayed"), None)
            .await?;
        if displayed != Value::Bool(true) {
            return Err(DriverError::ElementNotVisible(locator.to_string()));
        }
        self.session_call(Method::POST, &format!("/element/{element}/click"), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> DriverResult<()> {
        let element = self.find_element(locator).await?;
        self.session_call(Method::POST, &format!("/element/{element}/clear"), Some(json!({})))
            .await?;
        self.session_call(
            Method::POST,
            &format!("/element/{element}/value"),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn swipe(&self, direction: SwipeDirection) -> DriverResult<()> {
        let rect: WindowRect =
            serde_json::from_value(self.session_call(Method::GET, "/window/rect", None).await?)
                .map_err(|err| DriverError::Request(format!("window rect: {err}")))?;
        let (from_x, from_y, to_x, to_y) = swipe_points(direction, rect.width, rect.height);
        self.execute_script(
            "mobile: dragFromToForDuration",
            json!({
                "duration": SWIPE_DURATION_SECS,
                "fromX": from_x,
                "fromY": from_y,
                "toX": to_x,
                "toY": to_y,
            }),
        )
        .await?;
        Ok(())
    }

    async fn relaunch(&mut self, bundle_id: &str) -> DriverResult<()> {
        if self.session_id.is_some() {
            let args = json!({ "bundleId": bundle_id });
            let relaunched = match self.execute_script("mobile: terminateApp", args.clone()).await {
                Ok(_) => self.execute_script("mobile: activateApp", args).await,
                Err(err) => Err(err),
            };
            match relaunched {
                Ok(_) => return Ok(()),
                Err(err) => {
                    warn!(err = %err, bundle_id, "relaunch failed, re-creating session");
                    self.terminate().await.ok();
                }
            }
        }
        self.initialize(bundle_id).await
    }
}

#[async_trait]
impl DeviceDriver for AppiumDriver {
    #[instrument(skip_all, fields(bundle_id))]
    async fn initialize(&mut self, bundle_id: &str) -> DriverResult<()> {
        if bundle_id.trim().is_empty() {
            return Err(DriverError::InvalidParams("bundle id cannot be empty".to_string()));
        }
        let value = self
            .call(Method::POST, "/session", Some(self.capabilities(bundle_id)))
            .await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Request("session response without sessionId".to_string()))?;
        info!(session_id, "appium session created");
        self.session_id = Some(session_id.to_string());
        Ok(())
    }

    #[instrument(skip_all)]
    async fn capture_snapshot(&mut self) -> DriverResult<String> {
        let value = self.session_call(Method::GET, "/source", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    #[instrument(skip_all, fields(action = action.name()))]
    async fn perform(&mut self, action: &DeviceAction) -> DriverResult<()> {
        match action {
            DeviceAction::Tap { locator } => self.tap(locator).await,
            DeviceAction::Swipe { direction } => self.swipe(*direction).await,
            DeviceAction::Type { locator, text } => self.type_text(locator, text).await,
            DeviceAction::PressButton { button } => self
                .execute_script("mobile: pressButton", json!({ "name": button.as_str() }))
                .await
                .map(drop),
            DeviceAction::Navigate { url } => self
                .session_call(Method::POST, "/url", Some(json!({ "url": url })))
                .await
                .map(drop),
            DeviceAction::Launch { bundle_id } => self.relaunch(bundle_id).await,
        }
    }

    #[instrument(skip_all)]
    async fn screenshot(&mut self) -> DriverResult<Vec<u8>> {
        let value = self.session_call(Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| {
                DriverError::Request("screenshot response is not a string".to_string())
            })?;
        BASE64
            .decode(encoded)
            .map_err(|err| DriverError::Request(format!("decode screenshot: {err}")))
    }

    #[instrument(skip_all)]
    async fn terminate(&mut self) -> DriverResult<()> {
        let Some(id) = self.session_id.take() else {
            return Ok(());
        };
        self.call(Method::DELETE, &format!("/session/{id}"), None)
            .await?;
        info!(session_id = %id, "appium session closed");
        Ok(())
    }
}

/// Start and end points of a swipe: 70%/30% of the height for vertical
/// swipes, 80%/20% of the width for horizontal ones.
fn swipe_points(direction: SwipeDirection, width: f64, height: f64) -> (f64, f64, f64, f64) {
    match direction {
        SwipeDirection::Up => (width * 0.5, height * 0.7, width * 0.5, height * 0.3),
        SwipeDirection::Down => (width * 0.5, height * 0.3, width * 0.5, height * 0.7),
        SwipeDirection::Left => (width * 0.8, height * 0.5, width * 0.2, height * 0.5),
        SwipeDirection::Right => (width * 0.2, height * 0.5, width * 0.8, height * 0.5),
    }
}

fn wire_error(value: &Value, status: u16) -> DriverError {
    let error = value.get("error").and_then(Value::as_str).unwrap_or_default();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match error {
        "no such element" => DriverError::ElementNotFound(message),
        "invalid session id" => DriverError::NoSession,
        "element not interactable" => DriverError::ElementNotVisible(message),
        "invalid argument" => DriverError::InvalidParams(message),
        _ => DriverError::Request(format!("http {status}: {error} {message}").trim().to_string()),
    }
}
