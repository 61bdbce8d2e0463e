use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::RuntimeConfig;
use crate::engine::MatchingEngine;
use crate::metrics::{spawn_match_pump, MetricsAttributor, MetricsHandle};
use crate::store::KeyValueStore;
use crate::sync::{spawn_change_listener, SyncReport, SyncTrigger, Synchronizer};

/// A running Waypoint instance: synchronizer, change listener, match pump and
/// metrics attributor wired to one set of collaborators.
pub struct Waypoint {
    synchronizer: Arc<Synchronizer>,
    metrics: MetricsHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Waypoint {
    /// Wire everything up and perform the startup sync.
    ///
    /// `rules` is the durable rule store; `state` holds the reverse map and
    /// the counters. A failed startup sync is logged, not returned.
    pub async fn start(
        config: &RuntimeConfig,
        rules: Arc<dyn KeyValueStore>,
        state: Arc<dyn KeyValueStore>,
        engine: Arc<dyn MatchingEngine>,
    ) -> Self {
        let synchronizer = Arc::new(Synchronizer::new(
            rules,
            state.clone(),
            engine.clone(),
            config.keys.clone(),
        ));

        let (metrics, attributor) = MetricsAttributor::spawn(state, config.keys.clone());
        let pump = spawn_match_pump(engine.as_ref(), metrics.clone());
        let listener = spawn_change_listener(synchronizer.clone());

        synchronizer.sync_logged(SyncTrigger::Startup).await;

        Self {
            synchronizer,
            metrics,
            tasks: vec![attributor, pump, listener],
        }
    }

    /// Install-time sync.
    pub async fn on_installed(&self) -> Option<SyncReport> {
        self.synchronizer.sync_logged(SyncTrigger::Installed).await
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.synchronizer
    }

    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }

    /// Drain queued metric updates, then stop background tasks.
    pub async fn shutdown(self) {
        if let Err(e) = self.metrics.flush().await {
            log::warn!("metrics flush on shutdown failed: {}", e);
        }
        for task in self.tasks {
            task.abort();
        }
    }
}
