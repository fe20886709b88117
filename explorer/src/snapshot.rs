//! Stateful side of the snapshot engine: capture, clean, and diff against the
//! previous snapshot.

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::clean::{SnapshotParseError, clean};
use crate::core::diff::{DiffResult, diff};
use crate::core::query::query;
use crate::core::ui_tree::UIElementNode;
use crate::io::driver::{DeviceDriver, DriverResult};

/// Raw page sources beyond this many bytes are cut when shown uncleaned.
const RAW_VIEW_LIMIT: usize = 20_000;

/// A point-in-time capture of the accessibility tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub raw_text: String,
    /// `None` when the raw text could not be parsed.
    pub cleaned_tree: Option<UIElementNode>,
    /// Hex SHA-256 of `raw_text`.
    pub content_hash: String,
}

impl Snapshot {
    /// Clean `raw_text`, falling back to the raw text on parse errors.
    pub fn build(raw_text: String) -> (Self, Option<SnapshotParseError>) {
        let content_hash = content_hash(&raw_text);
        let (cleaned_tree, error) = match clean(&raw_text) {
            Ok(tree) => (Some(tree), None),
            Err(err) => (None, Some(err)),
        };
        (
            Self {
                raw_text,
                cleaned_tree,
                content_hash,
            },
            error,
        )
    }

    /// Text shown to the capture agent: ranked matches for `focus`, the full
    /// outline, or the raw page source when cleaning failed.
    pub fn view(&self, focus: Option<&str>) -> String {
        match &self.cleaned_tree {
            Some(tree) => query(tree, focus.unwrap_or_default()).render(),
            None if self.raw_text.trim().is_empty() => "Page source is empty.\n".to_string(),
            None => {
                let mut cut = RAW_VIEW_LIMIT.min(self.raw_text.len());
                while !self.raw_text.is_char_boundary(cut) {
                    cut -= 1;
                }
                let mut view = self.raw_text[..cut].to_string();
                if cut < self.raw_text.len() {
                    view.push_str("\n[truncated]\n");
                }
                view
            }
        }
    }

    /// Title of the first navigation bar, used as the current screen name.
    pub fn screen_title(&self) -> Option<String> {
        let tree = self.cleaned_tree.as_ref()?;
        let mut title = None;
        tree.walk(&mut |node| {
            if title.is_none() && node.short_type() == "NavigationBar" {
                title = node.text().map(str::to_string);
            }
        });
        title
    }
}

pub fn content_hash(raw_text: &str) -> String {
    hex::encode(Sha256::digest(raw_text.as_bytes()))
}

/// Result of observing a new snapshot.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Structural diff against the previous snapshot, when both parsed.
    pub diff: Option<DiffResult>,
    /// Whether the raw content differs from the previous snapshot.
    pub changed: bool,
    pub parse_error: Option<SnapshotParseError>,
}

/// Keeps the latest snapshot so the next one can be diffed against it.
#[derive(Debug, Default)]
pub struct SnapshotEngine {
    current: Option<Snapshot>,
}

impl SnapshotEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.current.as_ref()
    }

    /// Pull the page source from the driver and observe it.
    pub async fn capture(&mut self, driver: &mut dyn DeviceDriver) -> DriverResult<Observation> {
        let raw = driver.capture_snapshot().await?;
        Ok(self.observe(raw))
    }

    /// Clean `raw`, diff it against the previous snapshot and keep it.
    pub fn observe(&mut self, raw: String) -> Observation {
        let (snapshot, parse_error) = Snapshot::build(raw);
        if let Some(err) = &parse_error {
            warn!(err = %err, "page source could not be cleaned, using raw text");
        }
        let previous = self.current.take();
        let changed = previous
            .as_ref()
            .is_none_or(|prev| prev.content_hash != snapshot.content_hash);
        let diff = match (
            previous.as_ref().and_then(|prev| prev.cleaned_tree.as_ref()),
            snapshot.cleaned_tree.as_ref(),
        ) {
            (Some(before), Some(after)) => Some(diff(before, after)),
            _ => None,
        };
        debug!(
            hash = %snapshot.content_hash,
            changed,
            nodes = snapshot.cleaned_tree.as_ref().map(UIElementNode::node_count),
            "observed snapshot"
        );
        self.current = Some(snapshot);
        Observation {
            diff,
            changed,
            parse_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: &str = r#"<XCUIElementTypeApplication type="XCUIElementTypeApplication" name="Demo">
  <XCUIElementTypeNavigationBar type="XCUIElementTypeNavigationBar" name="Inbox"/>
  <XCUIElementTypeButton type="XCUIElementTypeButton" name="Compose" label="Compose" enabled="true" visible="true" accessible="true" x="300" y="40" width="44" height="44"/>
</XCUIElementTypeApplication>"#;

    #[test]
    fn identical_snapshots_are_unchanged_with_empty_diff() {
        let mut engine = SnapshotEngine::new();
        let first = engine.observe(SCREEN.to_string());
        assert!(first.changed);
        assert!(first.diff.is_none());

        let second = engine.observe(SCREEN.to_string());
        assert!(!second.changed);
        assert!(second.diff.expect("diff").is_empty());
    }

    #[test]
    fn malformed_source_falls_back_to_raw_text() {
        let mut engine = SnapshotEngine::new();
        let observation = engine.observe("<broken".to_string());
        assert!(matches!(
            observation.clone().parse_error,
            Some(SnapshotParseError::Malformed(_))
        ));
        let current = engine.current().expect("snapshot kept");
        assert!(current.cleaned_tree.is_none());
        assert_eq!(current.view(None), "<broken");
    }

    #[test]
    fn view_uses_query_when_focused() {
        let (snapshot, error) = Snapshot::build(SCREEN.to_string());
        assert!(error.is_none());
        assert!(snapshot.view(None).starts_with("Application name=\"Demo\""));
        assert!(snapshot.view(Some("compose button")).starts_with("[35] Button"));
        assert_eq!(snapshot.screen_title().as_deref(), Some("Inbox"));
    }

    #[test]
    fn content_hash_is_hex_sha256() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
