// src/scrape/portals/mod.rs
//! Concrete portal adapters, one per external system.

pub mod blackboard;
pub mod canvas;
pub mod github;
pub mod jira;
pub mod moodle;
pub mod trello;

pub use blackboard::BlackboardScraper;
pub use canvas::CanvasScraper;
pub use github::GithubScraper;
pub use jira::JiraScraper;
pub use moodle::MoodleScraper;
pub use trello::TrelloScraper;

use serde_json::Value;

/// Non-empty string field.
pub(crate) fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

/// Identifier that may arrive as a number or a string.
pub(crate) fn id_field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Names of `labels: [{ "name": ... }]` style arrays.
pub(crate) fn label_names(v: &Value) -> Vec<String> {
    v.as_array()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| match l {
                    Value::String(s) => Some(s.clone()),
                    other => str_field(other, "name").map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Effort estimate from gradable points: one hour per ten points, at least one.
pub(crate) fn hours_from_points(points: Option<f64>) -> Option<u32> {
    let p = points.filter(|p| p.is_finite() && *p > 0.0)?;
    Some(((p / 10.0) as u32).max(1))
}
