//! Relevance-ranked lookup of elements in a cleaned tree.

use serde::Serialize;

use super::ui_tree::{ElementCategory, UIElementNode};

/// Maximum number of ranked matches returned.
pub const QUERY_TOP_K: usize = 15;

const EXACT_TERM_SCORE: u32 = 10;
const PARTIAL_TERM_SCORE: u32 = 5;
const INTENT_SCORE: u32 = 15;

const INTENTS: &[(ElementCategory, &[&str])] = &[
    (ElementCategory::Actionable, &["button", "tap", "click", "press"]),
    (ElementCategory::TextInput, &["input", "text", "enter", "type", "field"]),
    (ElementCategory::Navigation, &["menu", "navigation", "nav", "tab"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredNode {
    pub score: u32,
    /// Matched element without its subtree.
    pub node: UIElementNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    /// Empty query: the whole tree.
    Unfiltered(UIElementNode),
    /// Highest score first, ties in document order, at most [`QUERY_TOP_K`].
    Ranked(Vec<ScoredNode>),
}

impl QueryResult {
    pub fn render(&self) -> String {
        match self {
            QueryResult::Unfiltered(tree) => tree.outline(),
            QueryResult::Ranked(hits) if hits.is_empty() => "No matching elements.\n".to_string(),
            QueryResult::Ranked(hits) => {
                let mut out = String::new();
                for hit in hits {
                    out.push_str(&format!("[{}] {}\n", hit.score, hit.node.describe()));
                }
                out
            }
        }
    }
}

pub fn query(tree: &UIElementNode, query: &str) -> QueryResult {
    let terms = tokenize(query);
    if terms.is_empty() {
        return QueryResult::Unfiltered(tree.clone());
    }
    let intents: Vec<ElementCategory> = INTENTS
        .iter()
        .filter(|(_, keywords)| terms.iter().any(|term| keywords.contains(&term.as_str())))
        .map(|(category, _)| *category)
        .collect();

    let mut hits: Vec<ScoredNode> = Vec::new();
    tree.walk(&mut |node| {
        let score = score_node(node, &terms, &intents);
        if score > 0 {
            hits.push(ScoredNode {
                score,
                node: node.shallow(),
            });
        }
    });
    // Stable sort keeps document order among equal scores.
    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits.truncate(QUERY_TOP_K);
    QueryResult::Ranked(hits)
}

fn score_node(node: &UIElementNode, terms: &[String], intents: &[ElementCategory]) -> u32 {
    // Short type only: the shared XCUIElementType prefix would match "type".
    let haystack = [
        node.short_type(),
        node.name.as_str(),
        node.label.as_str(),
        node.value.as_str(),
    ]
    .join(" ")
    .to_lowercase();
    let tokens = tokenize(&haystack);

    let mut score = 0;
    for term in terms {
        if haystack.contains(term.as_str()) {
            score += EXACT_TERM_SCORE;
        } else if tokens.iter().any(|token| is_partial_match(term, token)) {
            score += PARTIAL_TERM_SCORE;
        }
    }
    let category = node.category();
    for intent in intents {
        if *intent == category {
            score += INTENT_SCORE;
        }
    }
    score
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shared stem of at least four characters, or one word being a prefix of
/// the other with at least three characters.
fn is_partial_match(term: &str, token: &str) -> bool {
    let shared = term
        .chars()
        .zip(token.chars())
        .take_while(|(a, b)| a == b)
        .count();
    let shorter = term.chars().count().min(token.chars().count());
    shared >= 4 || (shorter >= 3 && shared == shorter)
}
