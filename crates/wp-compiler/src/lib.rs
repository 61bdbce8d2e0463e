//! Waypoint Rule Compiler
//!
//! This crate turns the stored redirect rule list into the directive set
//! installed in the host matching engine, plus the reverse-lookup map used
//! to attribute match events back to rules.

pub mod builder;
pub mod loader;

pub use builder::{compile, compile_rules, CompileOutput, CompileStats, SkippedRule};
pub use loader::{load_rules, parse_rules_json, LoadError};
