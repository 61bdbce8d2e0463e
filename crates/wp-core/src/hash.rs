//! Hash functions for Waypoint
//!
//! Directive ids are derived from a 32-bit FNV-1a hash of the rule identity
//! so that an unchanged rule keeps its id across recompilations.
//!
//! # Id Range
//!
//! Base ids live in `[1, 1_000_000_000]`. Id `0` is never produced since the
//! host matching engine rejects it. Linear probing may walk past the base
//! range, up to [`MAX_DIRECTIVE_ID`], then wraps back to `1`.

use std::collections::HashSet;

use crate::types::Rule;

const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
const FNV_PRIME: u32 = 0x01000193;

/// Number of base id slots a hash is reduced into.
pub const ID_SPACE: u32 = 1_000_000_000;

/// Largest id the matching engine accepts (max positive signed 32-bit).
pub const MAX_DIRECTIVE_ID: u32 = i32::MAX as u32;

/// Separator between identity fields in the hash seed.
pub const SEED_DELIMITER: char = '|';

/// FNV-1a 32-bit hash.
#[inline]
pub fn fnv1a_32(data: &[u8]) -> u32 {
    let mut h = FNV_OFFSET_BASIS;
    for &b in data {
        h ^= b as u32;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Hash an identity seed string over its UTF-8 bytes.
#[inline]
pub fn hash_identity(seed: &str) -> u32 {
    fnv1a_32(seed.as_bytes())
}

/// Build the identity seed for a rule: id, hostname and target joined by
/// [`SEED_DELIMITER`].
pub fn identity_seed(rule: &Rule) -> String {
    let mut seed = String::with_capacity(
        rule.id.len() + rule.source_hostname.len() + rule.target_url.len() + 2,
    );
    seed.push_str(&rule.id);
    seed.push(SEED_DELIMITER);
    seed.push_str(&rule.source_hostname);
    seed.push(SEED_DELIMITER);
    seed.push_str(&rule.target_url);
    seed
}

/// Base id for a rule before collision probing.
#[inline]
pub fn base_id(rule: &Rule) -> u32 {
    hash_identity(&identity_seed(rule)) % ID_SPACE + 1
}

/// Walk forward from `start` until an id not in `used` is found.
///
/// Wraps to `1` after [`MAX_DIRECTIVE_ID`]. Callers never hold anywhere near
/// `MAX_DIRECTIVE_ID` ids in one generation, so the walk terminates.
pub fn probe_unused(start: u32, used: &HashSet<u32>) -> u32 {
    let mut candidate = if start == 0 || start > MAX_DIRECTIVE_ID { 1 } else { start };
    while used.contains(&candidate) {
        candidate += 1;
        if candidate > MAX_DIRECTIVE_ID {
            candidate = 1;
        }
    }
    candidate
}

/// Assign a stable directive id to `rule`, unique within `used`.
///
/// The chosen id is inserted into `used` before returning.
pub fn assign_stable_id(rule: &Rule, used: &mut HashSet<u32>) -> u32 {
    let base = base_id(rule);
    let id = probe_unused(base, used);
    if id != base {
        log::debug!("directive id collision for rule {}: {} -> {}", rule.id, base, id);
    }
    used.insert(id);
    id
}
