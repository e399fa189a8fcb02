//! Input sanitation shared by the contact form and the content admin.
//!
//! Every free-text field goes through [`clean_str`]: trimmed and cut to a
//! per-field character budget. Optional fields collapse to `None` when empty.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

pub const MAX_BULLETS: usize = 12;
pub const MAX_BULLET_CHARS: usize = 240;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

/// A rejected input, carrying the message shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Trims and truncates to `max` characters. `None` yields an empty string.
pub fn clean_str(value: Option<&str>, max: usize) -> String {
    match value {
        Some(v) => v.trim().chars().take(max).collect(),
        None => String::new(),
    }
}

/// Like [`clean_str`] but maps an empty result to `None`.
pub fn clean_opt(value: Option<&str>, max: usize) -> Option<String> {
    let cleaned = clean_str(value, max);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Syntactic email check: `local@domain.tld` with no whitespace and a
/// single `@` on each side of the domain dot.
pub fn is_email(value: &str) -> bool {
    EMAIL.is_match(value.trim())
}

/// Bullet points arrive either as newline separated text (the admin textarea)
/// or as a JSON array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BulletsInput {
    Text(String),
    List(Vec<String>),
    /// A lone number or boolean, read as a single line.
    Scalar(Value),
}

impl BulletsInput {
    pub fn clean(&self) -> Vec<String> {
        match self {
            BulletsInput::Text(text) => clean_list(text.lines()),
            BulletsInput::List(items) => clean_list(items.iter().map(String::as_str)),
            BulletsInput::Scalar(value) => match value {
                Value::Number(n) => clean_list(std::iter::once(n.to_string().as_str())),
                Value::Bool(b) => clean_list(std::iter::once(if *b { "true" } else { "false" })),
                _ => Vec::new(),
            },
        }
    }
}

/// Trims each line, drops empties, caps line length and count.
pub fn clean_list<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    lines
        .map(|line| clean_str(Some(line), MAX_BULLET_CHARS))
        .filter(|line| !line.is_empty())
        .take(MAX_BULLETS)
        .collect()
}

/// Accepts strings, numbers and booleans for text fields (form libraries
/// send phone numbers as numbers). Anything else reads as absent.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}
