//! Structural and textual diff between two cleaned trees.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use similar::TextDiff;

use super::ui_tree::UIElementNode;

/// Element that appeared or disappeared between snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub identity: String,
    pub element_type: String,
    pub label: String,
    pub value: String,
}

/// Attribute change on an element present in both snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedEntry {
    pub identity: String,
    pub field: &'static str,
    pub previous: String,
    pub current: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub added: Vec<DiffEntry>,
    pub removed: Vec<DiffEntry>,
    pub changed: Vec<ChangedEntry>,
    /// Unified line diff of the two tree outlines; empty when they match.
    pub text: String,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.text.is_empty()
    }

    /// Compact human-readable summary, one change per line.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "No UI changes.".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.added {
            lines.push(format!(
                "+ {} label={:?} value={:?}",
                entry.identity, entry.label, entry.value
            ));
        }
        for entry in &self.removed {
            lines.push(format!(
                "- {} label={:?} value={:?}",
                entry.identity, entry.label, entry.value
            ));
        }
        for change in &self.changed {
            lines.push(format!(
                "~ {} {}: {:?} -> {:?}",
                change.identity, change.field, change.previous, change.current
            ));
        }
        if lines.is_empty() {
            lines.push("Layout changed (see text diff).".to_string());
        }
        lines.join("\n")
    }
}

/// Compare two cleaned trees.
///
/// Only interactive and text-bearing elements take part in the keyed diff.
/// Repeated identities are disambiguated by occurrence order.
pub fn diff(previous: &UIElementNode, current: &UIElementNode) -> DiffResult {
    let old = keyed_elements(previous);
    let new = keyed_elements(current);
    let old_keys: BTreeSet<&str> = old.iter().map(|(key, _)| key.as_str()).collect();
    let new_keys: BTreeSet<&str> = new.iter().map(|(key, _)| key.as_str()).collect();
    let old_by_key: BTreeMap<&str, &UIElementNode> =
        old.iter().map(|(key, node)| (key.as_str(), *node)).collect();

    let added = new
        .iter()
        .filter(|(key, _)| !old_keys.contains(key.as_str()))
        .map(|(key, node)| entry(key, node))
        .collect();
    let removed = old
        .iter()
        .filter(|(key, _)| !new_keys.contains(key.as_str()))
        .map(|(key, node)| entry(key, node))
        .collect();

    let mut changed = Vec::new();
    for (key, node) in &new {
        if let Some(before) = old_by_key.get(key.as_str()) {
            changed.extend(field_changes(key, before, node));
        }
    }

    let previous_text = previous.outline();
    let current_text = current.outline();
    let text = if previous_text == current_text {
        String::new()
    } else {
        TextDiff::from_lines(&previous_text, &current_text)
            .unified_diff()
            .context_radius(2)
            .header("previous", "current")
            .to_string()
    };

    DiffResult {
        added,
        removed,
        changed,
        text,
    }
}

fn keyed_elements(tree: &UIElementNode) -> Vec<(String, &UIElementNode)> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut keyed = Vec::new();
    tree.walk(&mut |node| {
        if !node.is_meaningful() {
            return;
        }
        let identity = node.identity();
        let count = seen.entry(identity.clone()).or_insert(0);
        let key = if *count == 0 {
            identity
        } else {
            format!("{identity}#{count}")
        };
        *count += 1;
        keyed.push((key, node));
    });
    keyed
}

fn entry(key: &str, node: &UIElementNode) -> DiffEntry {
    DiffEntry {
        identity: key.to_string(),
        element_type: node.element_type.clone(),
        label: node.label.clone(),
        value: node.value.clone(),
    }
}

fn field_changes(key: &str, before: &UIElementNode, after: &UIElementNode) -> Vec<ChangedEntry> {
    let fields: [(&'static str, String, String); 4] = [
        ("value", before.value.clone(), after.value.clone()),
        ("label", before.label.clone(), after.label.clone()),
        ("enabled", before.enabled.to_string(), after.enabled.to_string()),
        ("visible", before.visible.to_string(), after.visible.to_string()),
    ];
    fields
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(field, previous, current)| ChangedEntry {
            identity: key.to_string(),
            field,
            previous,
            current,
        })
        .collect()
}
