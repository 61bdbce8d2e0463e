//! Matching engine abstraction
//!
//! The host engine owns the installed directive set and evaluates it against
//! navigation requests. [`MemoryEngine`] implements the same contract in
//! process: updates are atomic and rejected as a whole, patterns are
//! case-insensitive regexes, and every match is broadcast as an opaque JSON
//! payload.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use wp_core::hash::MAX_DIRECTIVE_ID;
use wp_core::types::{Directive, ResourceTypes};

use crate::error::EngineError;

const MATCH_EVENT_CAPACITY: usize = 256;

/// Ruleset name reported on match events for dynamically installed directives.
pub const DYNAMIC_RULESET: &str = "_dynamic";

/// One atomic replace operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveUpdate {
    pub remove: Vec<u32>,
    pub add: Vec<Directive>,
}

#[async_trait]
pub trait MatchingEngine: Send + Sync {
    async fn installed_directives(&self) -> Result<Vec<Directive>, EngineError>;

    /// Apply `update` atomically: either every removal and addition takes
    /// effect or none does.
    async fn update_directives(&self, update: DirectiveUpdate) -> Result<(), EngineError>;

    /// Stream of match-event payloads.
    fn match_events(&self) -> broadcast::Receiver<Value>;
}

struct Installed {
    directive: Directive,
    regex: Regex,
}

pub struct MemoryEngine {
    installed: Mutex<Vec<Installed>>,
    available: AtomicBool,
    events: broadcast::Sender<Value>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(MATCH_EVENT_CAPACITY);
        Self {
            installed: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            events,
        }
    }

    /// Simulate the engine going away; updates fail while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of installed directives.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate a request against the installed directives.
    ///
    /// Highest priority wins, ties go to the lowest id. On a match the event
    /// payload is broadcast and the redirect target returned.
    pub fn navigate(&self, url: &str, resource_type: ResourceTypes) -> Option<String> {
        let (id, target) = {
            let installed = self.lock();
            let hit = installed
                .iter()
                .filter(|entry| entry.directive.condition.resource_types.intersects(resource_type))
                .filter(|entry| entry.regex.is_match(url))
                .max_by(|a, b| {
                    a.directive
                        .priority
                        .cmp(&b.directive.priority)
                        .then(b.directive.id.cmp(&a.directive.id))
                })?;
            (hit.directive.id, hit.directive.target().to_string())
        };

        log::debug!("navigation {} matched directive {}", url, id);
        let _ = self.events.send(json!({
            "request": { "url": url, "type": resource_type.names().first().copied().unwrap_or("other") },
            "rule": { "ruleId": id, "rulesetId": DYNAMIC_RULESET },
        }));
        Some(target)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Installed>> {
        self.installed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn compile_directive(directive: Directive) -> Result<Installed, EngineError> {
    if directive.id == 0 || directive.id > MAX_DIRECTIVE_ID {
        return Err(EngineError::InvalidId(directive.id));
    }
    if directive.condition.resource_types.is_empty() {
        return Err(EngineError::EmptyResourceTypes(directive.id));
    }
    let regex = RegexBuilder::new(directive.pattern())
        .case_insensitive(true)
        .build()
        .map_err(|e| EngineError::InvalidPattern {
            id: directive.id,
            reason: e.to_string(),
        })?;
    Ok(Installed { directive, regex })
}

#[async_trait]
impl MatchingEngine for MemoryEngine {
    async fn installed_directives(&self) -> Result<Vec<Directive>, EngineError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("engine offline".to_string()));
        }
        Ok(self.lock().iter().map(|entry| entry.directive.clone()).collect())
    }

    async fn update_directives(&self, update: DirectiveUpdate) -> Result<(), EngineError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("engine offline".to_string()));
        }

        let remove: HashSet<u32> = update.remove.into_iter().collect();
        let mut installed = self.lock();

        let mut ids: HashSet<u32> = installed
            .iter()
            .map(|entry| entry.directive.id)
            .filter(|id| !remove.contains(id))
            .collect();

        let mut added = Vec::with_capacity(update.add.len());
        for directive in update.add {
            if !ids.insert(directive.id) {
                return Err(EngineError::DuplicateId(directive.id));
            }
            added.push(compile_directive(directive)?);
        }

        installed.retain(|entry| !remove.contains(&entry.directive.id));
        installed.extend(added);
        Ok(())
    }

    fn match_events(&self) -> broadcast::Receiver<Value> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(id: u32, host: &str, target: &str) -> Directive {
        Directive::redirect(id, wp_core::url::host_pattern(host), target.to_string())
    }

    #[tokio::test]
    async fn replace_and_navigate() {
        let engine = MemoryEngine::new();
        let mut events = engine.match_events();

        engine
            .update_directives(DirectiveUpdate {
                remove: vec![],
                add: vec![directive(5, "youtube.com", "https://calendar.example/")],
            })
            .await
            .unwrap();

        assert_eq!(
            engine.navigate("https://www.youtube.com/watch", ResourceTypes::MAIN_FRAME),
            Some("https://calendar.example/".to_string())
        );
        assert_eq!(engine.navigate("https://www.youtube.com/", ResourceTypes::SUB_FRAME), None);
        assert_eq!(engine.navigate("https://example.com/", ResourceTypes::MAIN_FRAME), None);

        let event = events.recv().await.unwrap();
        assert_eq!(event["rule"]["ruleId"], 5);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_update_leaves_state_unchanged() {
        let engine = MemoryEngine::new();
        engine
            .update_directives(DirectiveUpdate {
                remove: vec![],
                add: vec![directive(1, "a.com", "https://b.com/")],
            })
            .await
            .unwrap();

        let mut bad = directive(2, "c.com", "https://d.com/");
        bad.condition.regex_filter = "([unclosed".to_string();
        let err = engine
            .update_directives(DirectiveUpdate {
                remove: vec![1],
                add: vec![directive(3, "e.com", "https://f.com/"), bad],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPattern { id: 2, .. }));

        let installed = engine.installed_directives().await.unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].id, 1);
    }

    #[tokio::test]
    async fn rejects_bad_ids() {
        let engine = MemoryEngine::new();
        let err = engine
            .update_directives(DirectiveUpdate {
                remove: vec![],
                add: vec![directive(0, "a.com", "https://b.com/")],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidId(0)));

        let err = engine
            .update_directives(DirectiveUpdate {
                remove: vec![],
                add: vec![
                    directive(9, "a.com", "https://b.com/"),
                    directive(9, "c.com", "https://d.com/"),
                ],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateId(9)));
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn unavailable_engine_fails() {
        let engine = MemoryEngine::new();
        engine.set_available(false);
        assert!(matches!(
            engine.update_directives(DirectiveUpdate::default()).await,
            Err(EngineError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn lowest_id_wins_on_overlap() {
        let engine = MemoryEngine::new();
        engine
            .update_directives(DirectiveUpdate {
                remove: vec![],
                add: vec![
                    directive(20, "youtube.com", "https://second.example/"),
                    directive(10, "www.youtube.com", "https://first.example/"),
                ],
            })
            .await
            .unwrap();
        assert_eq!(
            engine.navigate("https://www.youtube.com/", ResourceTypes::MAIN_FRAME),
            Some("https://first.example/".to_string())
        );
    }
}
