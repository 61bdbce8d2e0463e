//! Directive synchronization
//!
//! Every sync is a full replace: all currently installed directive ids are
//! removed and the freshly compiled set added in one engine update. Syncs are
//! not serialized against each other; the last full replace wins.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;

use wp_compiler::{compile, load_rules, CompileStats};
use wp_core::types::ReverseMap;

use crate::config::StorageKeys;
use crate::engine::{DirectiveUpdate, MatchingEngine};
use crate::error::SyncError;
use crate::store::{write_value, KeyValueStore};

/// What caused a sync, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    Installed,
    RulesChanged,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Startup => "startup",
            Self::Installed => "installed",
            Self::RulesChanged => "rules changed",
            Self::Manual => "manual",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub removed: usize,
    pub added: usize,
    pub stats: CompileStats,
}

pub struct Synchronizer {
    rules: Arc<dyn KeyValueStore>,
    state: Arc<dyn KeyValueStore>,
    engine: Arc<dyn MatchingEngine>,
    keys: StorageKeys,
}

impl Synchronizer {
    /// `rules` holds the durable rule list, `state` receives the reverse map.
    pub fn new(
        rules: Arc<dyn KeyValueStore>,
        state: Arc<dyn KeyValueStore>,
        engine: Arc<dyn MatchingEngine>,
        keys: StorageKeys,
    ) -> Self {
        Self { rules, state, engine, keys }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Recompile the stored rules and replace the installed directive set.
    ///
    /// The reverse map is written only after the engine accepted the update.
    /// A failure leaves whatever state was already applied; the next
    /// successful sync replaces it in full.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let stored = self.rules.get(&self.keys.rules).await?;
        let raw_rules = load_rules(stored.as_ref());
        let output = compile(&raw_rules);

        let remove: Vec<u32> = self
            .engine
            .installed_directives()
            .await?
            .iter()
            .map(|d| d.id)
            .collect();

        let removed = remove.len();
        let added = output.directives.len();

        self.engine
            .update_directives(DirectiveUpdate {
                remove,
                add: output.directives,
            })
            .await?;

        let reverse_map: &ReverseMap = &output.reverse_map;
        write_value(&*self.state, &self.keys.reverse_map, reverse_map)
            .await
            .map_err(SyncError::ReverseMap)?;

        Ok(SyncReport {
            removed,
            added,
            stats: output.stats,
        })
    }

    /// Run [`sync`](Self::sync) and log the outcome instead of returning it.
    pub async fn sync_logged(&self, trigger: SyncTrigger) -> Option<SyncReport> {
        match self.sync().await {
            Ok(report) => {
                log::info!(
                    "sync ({}): removed {}, installed {} directives ({} invalid, {} disabled)",
                    trigger,
                    report.removed,
                    report.added,
                    report.stats.invalid,
                    report.stats.disabled
                );
                Some(report)
            }
            Err(e) => {
                log::error!("sync ({}) failed: {}", trigger, e);
                None
            }
        }
    }
}

/// Resync whenever the rule list key changes in the rule storage area.
pub fn spawn_change_listener(sync: Arc<Synchronizer>) -> JoinHandle<()> {
    let mut changes = sync.rules.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;

        loop {
            match changes.recv().await {
                Ok(change) => {
                    if change.touches(&sync.keys.rules_area, &sync.keys.rules) {
                        sync.sync_logged(SyncTrigger::RulesChanged).await;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("missed {} storage notifications, resyncing", missed);
                    sync.sync_logged(SyncTrigger::RulesChanged).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wp_core::types::ResourceTypes;

    use super::*;
    use crate::engine::MemoryEngine;
    use crate::store::{read_or_default, MemoryStore};

    struct Fixture {
        rules: Arc<MemoryStore>,
        state: Arc<MemoryStore>,
        engine: Arc<MemoryEngine>,
        sync: Arc<Synchronizer>,
    }

    fn fixture() -> Fixture {
        let rules = Arc::new(MemoryStore::new("sync"));
        let state = Arc::new(MemoryStore::new("local"));
        let engine = Arc::new(MemoryEngine::new());
        let sync = Arc::new(Synchronizer::new(
            rules.clone(),
            state.clone(),
            engine.clone(),
            StorageKeys::default(),
        ));
        Fixture { rules, state, engine, sync }
    }

    fn rule(id: &str, host: &str, target: &str, enabled: bool) -> serde_json::Value {
        json!({ "id": id, "enabled": enabled, "source_hostname": host, "target_url": target })
    }

    #[tokio::test]
    async fn sync_installs_directives_and_map() {
        let f = fixture();
        f.rules
            .set(
                "redirectRules",
                json!([
                    rule("a", "youtube.com", "https://calendar.google.com/", true),
                    rule("b", "reddit.com", "https://example.org/", false),
                    rule("c", "bad host", "https://example.org/", true),
                ]),
            )
            .await
            .unwrap();

        let report = f.sync.sync().await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(report.stats.invalid, 1);
        assert_eq!(report.stats.disabled, 1);

        let installed = f.engine.installed_directives().await.unwrap();
        let map: ReverseMap = read_or_default(&*f.state, "ruleIdMap").await.unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.resolve(installed[0].id), Some("a"));
    }

    #[tokio::test]
    async fn sync_fully_replaces_previous_generation() {
        let f = fixture();
        f.rules
            .set("redirectRules", json!([rule("a", "a.com", "https://x.org/", true)]))
            .await
            .unwrap();
        f.sync.sync().await.unwrap();
        let old_id = f.engine.installed_directives().await.unwrap()[0].id;

        f.rules
            .set("redirectRules", json!([rule("b", "b.com", "https://x.org/", true)]))
            .await
            .unwrap();
        let report = f.sync.sync().await.unwrap();
        assert_eq!(report.removed, 1);

        let installed = f.engine.installed_directives().await.unwrap();
        assert_eq!(installed.len(), 1);
        assert_ne!(installed[0].id, old_id);

        let map: ReverseMap = read_or_default(&*f.state, "ruleIdMap").await.unwrap();
        assert_eq!(map.resolve(old_id), None);
        assert_eq!(map.resolve(installed[0].id), Some("b"));
    }

    #[tokio::test]
    async fn missing_or_malformed_rules_install_nothing() {
        let f = fixture();
        assert_eq!(f.sync.sync().await.unwrap().added, 0);

        f.rules.set("redirectRules", json!({ "oops": true })).await.unwrap();
        assert_eq!(f.sync.sync().await.unwrap().added, 0);
        assert!(f.engine.is_empty());
    }

    #[tokio::test]
    async fn engine_failure_keeps_map_and_directives() {
        let f = fixture();
        f.rules
            .set("redirectRules", json!([rule("a", "a.com", "https://x.org/", true)]))
            .await
            .unwrap();
        f.sync.sync().await.unwrap();
        let before: ReverseMap = read_or_default(&*f.state, "ruleIdMap").await.unwrap();

        f.rules
            .set("redirectRules", json!([rule("b", "b.com", "https://x.org/", true)]))
            .await
            .unwrap();
        f.engine.set_available(false);
        assert!(matches!(f.sync.sync().await, Err(SyncError::Engine(_))));
        assert!(f.sync.sync_logged(SyncTrigger::Manual).await.is_none());

        let after: ReverseMap = read_or_default(&*f.state, "ruleIdMap").await.unwrap();
        assert_eq!(before, after);

        f.engine.set_available(true);
        assert_eq!(f.sync.sync().await.unwrap().added, 1);
        assert_eq!(
            f.engine.navigate("https://b.com/", ResourceTypes::MAIN_FRAME),
            Some("https://x.org/".to_string())
        );
    }

    #[tokio::test]
    async fn map_write_failure_is_reported() {
        let f = fixture();
        f.rules
            .set("redirectRules", json!([rule("a", "a.com", "https://x.org/", true)]))
            .await
            .unwrap();
        f.state.set_fail_writes(true);
        let err = f.sync.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::ReverseMap(_)));
        assert!(err.to_string().starts_with("failed to persist reverse map"));
        // Engine state is not rolled back.
        assert_eq!(f.engine.len(), 1);
    }

    #[tokio::test]
    async fn change_listener_resyncs_on_rule_edit() {
        let f = fixture();
        let listener = spawn_change_listener(f.sync.clone());

        f.rules
            .set("redirectRules", json!([rule("a", "a.com", "https://x.org/", true)]))
            .await
            .unwrap();

        let mut installed = 0;
        for _ in 0..100 {
            installed = f.engine.len();
            if installed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(installed, 1);

        let mut map = ReverseMap::new();
        for _ in 0..100 {
            map = read_or_default(&*f.state, "ruleIdMap").await.unwrap();
            if !map.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(map.len(), 1);

        // A sync would overwrite this marker with the compiled map.
        f.state.set("ruleIdMap", json!({ "marker": "untouched" })).await.unwrap();
        let ids_before: Vec<u32> = f
            .engine
            .installed_directives()
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();

        f.rules.set("somethingElse", json!(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ids_after: Vec<u32> = f
            .engine
            .installed_directives()
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids_before, ids_after);
        assert_eq!(
            f.state.get("ruleIdMap").await.unwrap(),
            Some(json!({ "marker": "untouched" }))
        );
        listener.abort();
    }
}
