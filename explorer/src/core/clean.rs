//! Reduce a raw accessibility page source to a semantic tree.
//!
//! Elements that are neither actionable nor text-bearing are discarded, but
//! their meaningful descendants are promoted into the discarded element's
//! position so sibling order and ancestry of kept nodes are preserved.

use roxmltree::Node;
use thiserror::Error;

use super::ui_tree::{Geometry, UIElementNode};

/// Wrapper element Appium puts around the application hierarchy.
const APPIUM_WRAPPER: &str = "AppiumAUT";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotParseError {
    #[error("page source is empty")]
    Empty,
    #[error("malformed page source: {0}")]
    Malformed(String),
}

/// Parse `raw` and return the cleaned tree.
///
/// The document root is always kept as the tree's anchor. Deterministic:
/// the same input always yields the same tree.
pub fn clean(raw: &str) -> Result<UIElementNode, SnapshotParseError> {
    let sanitized = sanitize(raw);
    if sanitized.trim().is_empty() {
        return Err(SnapshotParseError::Empty);
    }
    let doc = roxmltree::Document::parse(&sanitized)
        .map_err(|err| SnapshotParseError::Malformed(err.to_string()))?;

    // The wrapper only gives way to a lone child that would itself be pruned
    // (the application). Cleaned trees never have such a child, so
    // re-cleaning keeps whatever root the first pass chose.
    let mut root = doc.root_element();
    while root.tag_name().name() == APPIUM_WRAPPER {
        let mut elements = root.children().filter(Node::is_element);
        match (elements.next(), elements.next()) {
            (Some(only), None) if !element_node(only).is_meaningful() => root = only,
            _ => break,
        }
    }

    let mut tree = element_node(root);
    tree.children = meaningful_children(root);
    Ok(tree)
}

/// Strip NUL and other characters XML 1.0 does not allow.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|&ch| {
            matches!(ch, '\t' | '\n' | '\r')
                || ('\u{20}'..='\u{D7FF}').contains(&ch)
                || ('\u{E000}'..='\u{FFFD}').contains(&ch)
                || ch >= '\u{10000}'
        })
        .collect()
}

fn meaningful_children(parent: Node<'_, '_>) -> Vec<UIElementNode> {
    let mut kept = Vec::new();
    for child in parent.children().filter(Node::is_element) {
        let descendants = meaningful_children(child);
        let mut node = element_node(child);
        if node.is_meaningful() {
            node.children = descendants;
            kept.push(node);
        } else {
            kept.extend(descendants);
        }
    }
    kept
}

fn element_node(element: Node<'_, '_>) -> UIElementNode {
    let attr = |key: &str| element.attribute(key).unwrap_or_default().to_string();
    let flag = |key: &str| element.attribute(key) == Some("true");

    let element_type = element
        .attribute("type")
        .filter(|ty| !ty.is_empty())
        .unwrap_or_else(|| element.tag_name().name())
        .to_string();

    let mut node = UIElementNode {
        element_type,
        name: attr("name"),
        label: attr("label"),
        value: attr("value"),
        enabled: flag("enabled"),
        visible: flag("visible"),
        accessible: flag("accessible"),
        geometry: None,
        children: Vec::new(),
    };
    if node.is_interactive() {
        node.geometry = geometry(element);
    }
    node
}

fn geometry(element: Node<'_, '_>) -> Option<Geometry> {
    let coord = |key: &str| -> Option<i64> {
        let raw = element.attribute(key)?.trim();
        raw.parse::<i64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(|v| v.round() as i64))
    };
    Some(Geometry {
        x: coord("x")?,
        y: coord("y")?,
        width: coord("width")?,
        height: coord("height")?,
    })
}
