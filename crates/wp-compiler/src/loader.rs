//! Stored rule list decoding
//!
//! The durable rule store is written by an external collaborator, so its
//! contents are never trusted: an absent or non-array blob is an empty list
//! and entries that are not objects are dropped.

use serde_json::Value;
use thiserror::Error;

use wp_core::types::RawRule;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("rule list is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a stored rule list value.
pub fn load_rules(value: Option<&Value>) -> Vec<RawRule> {
    let entries = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            log::warn!("stored rule list is not an array ({}), treating as empty", kind_of(other));
            return Vec::new();
        }
    };

    let mut rules = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match RawRule::from_value(entry) {
            Some(rule) => rules.push(rule),
            None => log::warn!("skipping stored rule #{index}: expected object, got {}", kind_of(entry)),
        }
    }
    rules
}

/// Decode a rule list from JSON text (files, wasm callers).
pub fn parse_rules_json(text: &str) -> Result<Vec<RawRule>, LoadError> {
    let value: Value = serde_json::from_str(text)?;
    Ok(load_rules(Some(&value)))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
