//! Semantic UI tree model shared by the snapshot clean/diff/query operations.

use serde::{Deserialize, Serialize};

/// Element types a user can act on.
pub const INTERACTIVE_TYPES: &[&str] = &[
    "XCUIElementTypeButton",
    "XCUIElementTypeTextField",
    "XCUIElementTypeSecureTextField",
    "XCUIElementTypeSwitch",
    "XCUIElementTypeSlider",
    "XCUIElementTypeCell",
    "XCUIElementTypeLink",
    "XCUIElementTypeSearchField",
    "XCUIElementTypePickerWheel",
];

/// Element types kept when they carry text.
pub const TEXT_TYPES: &[&str] = &[
    "XCUIElementTypeStaticText",
    "XCUIElementTypeTextView",
    "XCUIElementTypeTextField",
    "XCUIElementTypeSecureTextField",
    "XCUIElementTypeNavigationBar",
];

const TYPE_PREFIX: &str = "XCUIElementType";

/// Screen-space bounds of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Structural category used to match query intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementCategory {
    /// Buttons and links.
    Actionable,
    /// Anything that accepts typed text.
    TextInput,
    /// Tab bars, navigation bars, menus and toolbars.
    Navigation,
    Other,
}

/// One node of a cleaned accessibility tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UIElementNode {
    #[serde(rename = "type")]
    pub element_type: String,
    pub name: String,
    pub label: String,
    pub value: String,
    pub enabled: bool,
    pub visible: bool,
    pub accessible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UIElementNode>,
}

impl UIElementNode {
    pub fn is_interactive_type(&self) -> bool {
        INTERACTIVE_TYPES.contains(&self.element_type.as_str())
    }

    pub fn is_text_type(&self) -> bool {
        TEXT_TYPES.contains(&self.element_type.as_str())
    }

    /// Interactive element that is currently actionable on screen.
    pub fn is_interactive(&self) -> bool {
        self.is_interactive_type() && self.visible && self.enabled && self.accessible
    }

    /// Text-category element carrying a non-empty value, label or name.
    pub fn has_text_content(&self) -> bool {
        self.is_text_type() && self.text().is_some()
    }

    /// Whether the node survives cleaning.
    pub fn is_meaningful(&self) -> bool {
        self.is_interactive() || self.has_text_content()
    }

    /// First non-empty of value, label, name.
    pub fn text(&self) -> Option<&str> {
        [&self.value, &self.label, &self.name]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }

    /// Identifier an Appium locator would use: name, falling back to label.
    ///
    /// Only interactive nodes carry one.
    pub fn appium_id(&self) -> Option<&str> {
        if !self.is_interactive() {
            return None;
        }
        [&self.name, &self.label]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }

    /// Element type without the `XCUIElementType` prefix.
    pub fn short_type(&self) -> &str {
        self.element_type
            .strip_prefix(TYPE_PREFIX)
            .unwrap_or(&self.element_type)
    }

    pub fn category(&self) -> ElementCategory {
        match self.short_type() {
            "Button" | "Link" => ElementCategory::Actionable,
            "TextField" | "SecureTextField" | "SearchField" | "TextView" => {
                ElementCategory::TextInput
            }
            "TabBar" | "Tab" | "NavigationBar" | "MenuItem" | "MenuBar" | "Menu" | "Toolbar" => {
                ElementCategory::Navigation
            }
            _ => ElementCategory::Other,
        }
    }

    /// Identity used to pair elements across snapshots:
    /// type, then appium id or name, then position.
    pub fn identity(&self) -> String {
        let mut parts = vec![self.element_type.clone()];
        if let Some(id) = self.appium_id() {
            parts.push(format!("id={id}"));
        } else if !self.name.is_empty() {
            parts.push(format!("name={}", self.name));
        }
        if let Some(geo) = self.geometry {
            parts.push(format!("pos={},{}", geo.x, geo.y));
        }
        parts.join("|")
    }

    /// Visit every node in document (pre-)order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a UIElementNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    /// Copy of this node without its subtree.
    pub fn shallow(&self) -> UIElementNode {
        UIElementNode {
            children: Vec::new(),
            ..self.clone()
        }
    }

    /// One line per node, indented by depth.
    pub fn outline(&self) -> String {
        let mut lines = Vec::new();
        self.outline_into(0, &mut lines);
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    fn outline_into(&self, depth: usize, lines: &mut Vec<String>) {
        lines.push(format!("{}{}", "  ".repeat(depth), self.describe()));
        for child in &self.children {
            child.outline_into(depth + 1, lines);
        }
    }

    /// Single-line summary: short type, quoted text, notable flags.
    pub fn describe(&self) -> String {
        let mut line = self.short_type().to_string();
        if !self.name.is_empty() {
            line.push_str(&format!(" name=\"{}\"", self.name));
        }
        if !self.label.is_empty() && self.label != self.name {
            line.push_str(&format!(" label=\"{}\"", self.label));
        }
        if !self.value.is_empty() && self.value != self.label && self.value != self.name {
            line.push_str(&format!(" value=\"{}\"", self.value));
        }
        if self.is_interactive_type() && !self.enabled {
            line.push_str(" [disabled]");
        }
        if let Some(geo) = self.geometry {
            line.push_str(&format!(
                " @({},{} {}x{})",
                geo.x, geo.y, geo.width, geo.height
            ));
        }
        line
    }

    /// Render the node back to page-source XML with only whitelisted attributes.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self.xml_into(0, &mut out);
        out
    }

    fn xml_into(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let tag = if self.element_type.is_empty() {
            "Element"
        } else {
            self.element_type.as_str()
        };
        out.push_str(&format!(
            "{indent}<{tag} type=\"{}\" name=\"{}\" label=\"{}\" value=\"{}\" \
             enabled=\"{}\" visible=\"{}\" accessible=\"{}\"",
            escape_attr(&self.element_type),
            escape_attr(&self.name),
            escape_attr(&self.label),
            escape_attr(&self.value),
            self.enabled,
            self.visible,
            self.accessible,
        ));
        if let Some(geo) = self.geometry {
            out.push_str(&format!(
                " x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\"",
                geo.x, geo.y, geo.width, geo.height
            ));
        }
        if self.children.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push_str(">\n");
        for child in &self.children {
            child.xml_into(depth + 1, out);
        }
        out.push_str(&format!("{indent}</{tag}>\n"));
    }
}

fn escape_attr(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\n' => escaped.push_str("&#10;"),
            '\t' => escaped.push_str("&#9;"),
            '\r' => escaped.push_str("&#13;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
