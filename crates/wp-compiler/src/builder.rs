use std::collections::HashSet;

use wp_core::hash::{assign_stable_id, base_id};
use wp_core::types::{Directive, RawRule, ReverseMap, Rule};
use wp_core::url::host_pattern;
use wp_core::validate::{validate_rule, ValidationError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub total: usize,
    pub compiled: usize,
    pub disabled: usize,
    pub invalid: usize,
    /// Directives whose id had to be moved off its hash slot.
    pub probed: usize,
}

/// A stored rule that failed validation and was left out of the directive set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRule {
    pub index: usize,
    pub rule_id: Option<String>,
    pub error: ValidationError,
}

#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub directives: Vec<Directive>,
    pub reverse_map: ReverseMap,
    pub skipped: Vec<SkippedRule>,
    pub stats: CompileStats,
}

/// Compile stored rules into directives.
///
/// Invalid rules are skipped with a warning, disabled rules are dropped, and
/// every remaining rule yields exactly one directive and one reverse-map entry.
pub fn compile(raw_rules: &[RawRule]) -> CompileOutput {
    let mut skipped = Vec::new();
    let mut valid = Vec::with_capacity(raw_rules.len());

    for (index, raw) in raw_rules.iter().enumerate() {
        match validate_rule(raw) {
            Ok(rule) => valid.push(rule),
            Err(error) => {
                log::warn!(
                    "skipping invalid rule #{} ({}): {}",
                    index,
                    raw.id.as_deref().unwrap_or("<no id>"),
                    error
                );
                skipped.push(SkippedRule {
                    index,
                    rule_id: raw.id.clone(),
                    error,
                });
            }
        }
    }

    let mut output = compile_rules(&valid);
    output.stats.total = raw_rules.len();
    output.stats.invalid = skipped.len();
    output.skipped = skipped;
    output
}

/// Compile rules that have already been validated.
pub fn compile_rules(rules: &[Rule]) -> CompileOutput {
    let mut used_ids: HashSet<u32> = HashSet::with_capacity(rules.len());
    let mut directives = Vec::with_capacity(rules.len());
    let mut reverse_map = ReverseMap::new();
    let mut stats = CompileStats {
        total: rules.len(),
        ..CompileStats::default()
    };

    for rule in rules {
        if !rule.enabled {
            stats.disabled += 1;
            continue;
        }

        let id = assign_stable_id(rule, &mut used_ids);
        if id != base_id(rule) {
            stats.probed += 1;
        }

        log::debug!("compiled rule {} ({}) -> directive {}", rule.id, rule.source_hostname, id);

        directives.push(Directive::redirect(
            id,
            host_pattern(&rule.source_hostname),
            rule.target_url.clone(),
        ));
        reverse_map.insert(id, rule.id.clone());
    }

    stats.compiled = directives.len();

    CompileOutput {
        directives,
        reverse_map,
        skipped: Vec::new(),
        stats,
    }
}
