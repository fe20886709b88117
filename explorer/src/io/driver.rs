//! Device driver abstraction.
//!
//! The [`DeviceDriver`] trait is the narrow interface the exploration loop
//! consumes. [`crate::io::appium::AppiumDriver`] talks to a real Appium server;
//! tests use scripted drivers.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Driver failures. None of these abort a run on their own.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no active driver session")]
    NoSession,
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("element not visible: {0}")]
    ElementNotVisible(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("driver request failed: {0}")]
    Request(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// How an element is located on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    #[default]
    AccessibilityId,
    Xpath,
    Name,
    ClassName,
}

impl LocatorStrategy {
    /// Strategy name in the W3C `find element` request.
    pub fn as_webdriver(self) -> &'static str {
        match self {
            LocatorStrategy::AccessibilityId => "accessibility id",
            LocatorStrategy::Xpath => "xpath",
            LocatorStrategy::Name => "name",
            LocatorStrategy::ClassName => "class name",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub by: LocatorStrategy,
    pub value: String,
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.by.as_webdriver(), self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

impl SwipeDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SwipeDirection::Up => "up",
            SwipeDirection::Down => "down",
            SwipeDirection::Left => "left",
            SwipeDirection::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalButton {
    Home,
    VolumeUp,
    VolumeDown,
}

impl PhysicalButton {
    /// Button name understood by `mobile: pressButton`.
    pub fn as_str(self) -> &'static str {
        match self {
            PhysicalButton::Home => "home",
            PhysicalButton::VolumeUp => "volumeup",
            PhysicalButton::VolumeDown => "volumedown",
        }
    }
}

/// A single UI action against the live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Tap { locator: Locator },
    Swipe { direction: SwipeDirection },
    Type { locator: Locator, text: String },
    PressButton { button: PhysicalButton },
    Navigate { url: String },
    /// Terminate then activate the app, leaving the session in place.
    Launch { bundle_id: String },
}

impl DeviceAction {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceAction::Tap { .. } => "tap",
            DeviceAction::Swipe { .. } => "swipe",
            DeviceAction::Type { .. } => "type",
            DeviceAction::PressButton { .. } => "press_button",
            DeviceAction::Navigate { .. } => "navigate",
            DeviceAction::Launch { .. } => "launch",
        }
    }
}

/// Live device session. One instance is owned by a run for its lifetime.
#[async_trait]
pub trait DeviceDriver: Send {
    /// Open a session for `bundle_id`.
    async fn initialize(&mut self, bundle_id: &str) -> DriverResult<()>;

    /// Raw accessibility tree of the current screen.
    async fn capture_snapshot(&mut self) -> DriverResult<String>;

    async fn perform(&mut self, action: &DeviceAction) -> DriverResult<()>;

    /// PNG bytes of the current screen.
    async fn screenshot(&mut self) -> DriverResult<Vec<u8>>;

    /// Close the session. Safe to call when no session is open.
    async fn terminate(&mut self) -> DriverResult<()>;
}
