//! Waypoint Core Library
//!
//! This crate holds the data model shared by every other Waypoint crate:
//! user-authored redirect rules, the directive wire shape understood by the
//! host matching engine, and the metrics counters.
//!
//! # Modules
//!
//! - `event`: matched directive id extraction from match-event payloads
//! - `hash`: FNV-1a hashing and stable directive id assignment
//! - `validate`: hostname / target URL / rule validation
//! - `url`: hostname pattern construction for directive conditions
//! - `types`: Rule, Directive, ReverseMap and Metrics definitions

pub mod event;
pub mod hash;
pub mod types;
pub mod url;
pub mod validate;

// Re-export commonly used types
pub use event::extract_matched_id;
pub use hash::{assign_stable_id, fnv1a_32, hash_identity, MAX_DIRECTIVE_ID};
pub use types::{Directive, Metrics, RawRule, ResourceTypes, ReverseMap, Rule};
pub use url::host_pattern;
pub use validate::{
    validate_hostname, validate_rule, validate_target_url, ValidTarget, ValidationError,
    ValidationErrorKind,
};
