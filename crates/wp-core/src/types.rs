//! Core type definitions for Waypoint
//!
//! These types are persisted as JSON blobs in the host key-value stores and
//! sent to the host matching engine, so their serde shapes are part of the
//! wire contract.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// =============================================================================
// Rules
// =============================================================================

/// A rule exactly as it was read from the durable rule store.
///
/// Every field is optional because stored data is loosely validated; use
/// [`crate::validate::validate_rule`] to obtain a [`Rule`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub enabled: Value,
    #[serde(default, alias = "sourceHostname", skip_serializing_if = "Option::is_none")]
    pub source_hostname: Option<String>,
    #[serde(default, alias = "targetUrl", skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

impl RawRule {
    /// Build a raw rule from an arbitrary JSON value.
    ///
    /// Returns `None` when the value is not an object. Fields of the wrong
    /// type are treated as absent, numeric ids are stringified.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let id = match obj.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Some(Self {
            id,
            enabled: obj.get("enabled").cloned().unwrap_or(Value::Null),
            source_hostname: field(obj, "source_hostname", "sourceHostname")
                .and_then(Value::as_str)
                .map(str::to_string),
            target_url: field(obj, "target_url", "targetUrl")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Boolean coercion of the stored `enabled` value (JavaScript truthiness).
    pub fn is_enabled(&self) -> bool {
        match &self.enabled {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

fn field<'a>(obj: &'a Map<String, Value>, snake: &str, camel: &str) -> Option<&'a Value> {
    obj.get(snake).or_else(|| obj.get(camel))
}

/// A validated, normalized redirect rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub enabled: bool,
    pub source_hostname: String,
    pub target_url: String,
}

// =============================================================================
// Resource Types (directive scope)
// =============================================================================

bitflags::bitflags! {
    /// Resource type mask for directive conditions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceTypes: u16 {
        const MAIN_FRAME = 1 << 0;   // top-level navigation
        const SUB_FRAME = 1 << 1;    // iframe/frame
        const STYLESHEET = 1 << 2;
        const SCRIPT = 1 << 3;
        const IMAGE = 1 << 4;
        const FONT = 1 << 5;
        const OBJECT = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const PING = 1 << 8;
        const CSP_REPORT = 1 << 9;
        const MEDIA = 1 << 10;
        const WEBSOCKET = 1 << 11;
        const OTHER = 1 << 12;
    }
}

const RESOURCE_TYPE_NAMES: [(ResourceTypes, &str); 13] = [
    (ResourceTypes::MAIN_FRAME, "main_frame"),
    (ResourceTypes::SUB_FRAME, "sub_frame"),
    (ResourceTypes::STYLESHEET, "stylesheet"),
    (ResourceTypes::SCRIPT, "script"),
    (ResourceTypes::IMAGE, "image"),
    (ResourceTypes::FONT, "font"),
    (ResourceTypes::OBJECT, "object"),
    (ResourceTypes::XMLHTTPREQUEST, "xmlhttprequest"),
    (ResourceTypes::PING, "ping"),
    (ResourceTypes::CSP_REPORT, "csp_report"),
    (ResourceTypes::MEDIA, "media"),
    (ResourceTypes::WEBSOCKET, "websocket"),
    (ResourceTypes::OTHER, "other"),
];

impl ResourceTypes {
    /// Parse from browser resource type string. Unknown names map to `OTHER`.
    pub fn from_name(s: &str) -> Self {
        RESOURCE_TYPE_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map_or(Self::OTHER, |(flag, _)| *flag)
    }

    /// Browser names of every set flag, in a fixed order.
    pub fn names(&self) -> Vec<&'static str> {
        RESOURCE_TYPE_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl Serialize for ResourceTypes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names = self.names();
        let mut seq = serializer.serialize_seq(Some(names.len()))?;
        for name in names {
            seq.serialize_element(name)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ResourceTypes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NamesVisitor;

        impl<'de> Visitor<'de> for NamesVisitor {
            type Value = ResourceTypes;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a list of resource type names")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut mask = ResourceTypes::empty();
                while let Some(name) = seq.next_element::<String>()? {
                    mask |= ResourceTypes::from_name(&name);
                }
                if mask.is_empty() {
                    return Err(de::Error::invalid_length(0, &self));
                }
                Ok(mask)
            }
        }

        deserializer.deserialize_seq(NamesVisitor)
    }
}

// =============================================================================
// Directives (matching engine wire shape)
// =============================================================================

/// Priority given to every redirect directive.
pub const DIRECTIVE_PRIORITY: u32 = 1;

/// A compiled rule in the exact shape the matching engine accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub id: u32,
    pub priority: u32,
    pub action: DirectiveAction,
    pub condition: DirectiveCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveAction {
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub redirect: Redirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Redirect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveCondition {
    #[serde(rename = "regexFilter")]
    pub regex_filter: String,
    #[serde(rename = "resourceTypes")]
    pub resource_types: ResourceTypes,
}

impl Directive {
    /// A top-level navigation redirect directive.
    pub fn redirect(id: u32, regex_filter: String, target: String) -> Self {
        Self {
            id,
            priority: DIRECTIVE_PRIORITY,
            action: DirectiveAction {
                kind: ActionType::Redirect,
                redirect: Redirect { url: target },
            },
            condition: DirectiveCondition {
                regex_filter,
                resource_types: ResourceTypes::MAIN_FRAME,
            },
        }
    }

    #[inline]
    pub fn target(&self) -> &str {
        &self.action.redirect.url
    }

    #[inline]
    pub fn pattern(&self) -> &str {
        &self.condition.regex_filter
    }
}

// =============================================================================
// Reverse-Lookup Map
// =============================================================================

/// Persisted map from directive id (as a string key) to rule id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReverseMap(BTreeMap<String, String>);

impl ReverseMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, directive_id: u32, rule_id: impl Into<String>) {
        self.0.insert(directive_id.to_string(), rule_id.into());
    }

    /// Rule id that produced `directive_id`, if known.
    pub fn resolve(&self, directive_id: u32) -> Option<&str> {
        self.0.get(&directive_id.to_string()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Aggregate redirect counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub total_redirects: u64,
    #[serde(default)]
    pub per_rule: BTreeMap<String, u64>,
}

impl Metrics {
    /// Count one redirect, attributed to `rule_id` when it is known.
    pub fn record(&mut self, rule_id: Option<&str>) {
        self.total_redirects += 1;
        if let Some(rule_id) = rule_id {
            *self.per_rule.entry(rule_id.to_string()).or_insert(0) += 1;
        }
    }

    pub fn count_for(&self, rule_id: &str) -> u64 {
        self.per_rule.get(rule_id).copied().unwrap_or(0)
    }
}
