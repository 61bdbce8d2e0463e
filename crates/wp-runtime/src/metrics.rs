//! Match metrics attribution
//!
//! A single worker task owns every counter mutation. Match events are queued
//! on an unbounded channel and applied one at a time as full
//! read-modify-write cycles, so concurrent matches never lose an update.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use wp_core::event::extract_matched_id;
use wp_core::types::{Metrics, ReverseMap};

use crate::config::StorageKeys;
use crate::engine::MatchingEngine;
use crate::error::MetricsError;
use crate::store::{read_or_default, write_value, KeyValueStore};

enum Command {
    Record(Option<u32>),
    Snapshot(oneshot::Sender<Result<Metrics, MetricsError>>),
    Flush(oneshot::Sender<()>),
}

/// Owner of the counter store; see [`MetricsAttributor::spawn`].
pub struct MetricsAttributor {
    store: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
}

/// Cheap handle for enqueueing work on the attributor.
#[derive(Clone)]
pub struct MetricsHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl MetricsAttributor {
    /// Start the worker task. It runs until every handle is dropped.
    pub fn spawn(store: Arc<dyn KeyValueStore>, keys: StorageKeys) -> (MetricsHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let attributor = Self { store, keys };
        let task = tokio::spawn(attributor.run(rx));
        (MetricsHandle { tx }, task)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Record(matched_id) => {
                    if let Err(e) = self.apply(matched_id).await {
                        log::error!("failed to record redirect (directive {:?}): {}", matched_id, e);
                    }
                }
                Command::Snapshot(reply) => {
                    let metrics = read_or_default(&*self.store, &self.keys.metrics)
                        .await
                        .map_err(MetricsError::from);
                    let _ = reply.send(metrics);
                }
                Command::Flush(reply) => {
                    let _ = reply.send(());
                }
            }
        }
        log::debug!("metrics attributor stopped");
    }

    async fn apply(&self, matched_id: Option<u32>) -> Result<(), MetricsError> {
        let mut metrics: Metrics = read_or_default(&*self.store, &self.keys.metrics).await?;
        let rule_id = match matched_id {
            Some(id) => self.resolve(id).await,
            None => None,
        };
        metrics.record(rule_id.as_deref());
        write_value(&*self.store, &self.keys.metrics, &metrics).await?;
        Ok(())
    }

    async fn resolve(&self, directive_id: u32) -> Option<String> {
        match read_or_default::<ReverseMap>(&*self.store, &self.keys.reverse_map).await {
            Ok(map) => {
                let rule_id = map.resolve(directive_id).map(str::to_string);
                if rule_id.is_none() {
                    log::debug!("directive {} has no rule in the reverse map", directive_id);
                }
                rule_id
            }
            Err(e) => {
                log::warn!("reverse map unavailable, redirect left unattributed: {}", e);
                None
            }
        }
    }
}

impl MetricsHandle {
    /// Queue one redirect. Never blocks; failures are logged by the worker.
    pub fn record_match(&self, matched_id: Option<u32>) {
        if self.tx.send(Command::Record(matched_id)).is_err() {
            log::error!("metrics attributor stopped, dropping redirect (directive {:?})", matched_id);
        }
    }

    /// Resolves once every previously queued unit has been applied.
    pub async fn flush(&self) -> Result<(), MetricsError> {
        let (reply, done) = oneshot::channel();
        self.tx.send(Command::Flush(reply)).map_err(|_| MetricsError::Stopped)?;
        done.await.map_err(|_| MetricsError::Stopped)
    }

    /// Current counters, read after every previously queued unit.
    pub async fn snapshot(&self) -> Result<Metrics, MetricsError> {
        let (reply, result) = oneshot::channel();
        self.tx.send(Command::Snapshot(reply)).map_err(|_| MetricsError::Stopped)?;
        result.await.map_err(|_| MetricsError::Stopped)?
    }
}

/// Forward every engine match event into the attributor.
pub fn spawn_match_pump(engine: &dyn MatchingEngine, metrics: MetricsHandle) -> JoinHandle<()> {
    let mut events = engine.match_events();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;

        loop {
            match events.recv().await {
                Ok(details) => metrics.record_match(extract_matched_id(&details)),
                Err(RecvError::Lagged(missed)) => {
                    // Payloads are gone but the navigations happened.
                    log::warn!("missed {} match events, counting them unattributed", missed);
                    for _ in 0..missed {
                        metrics.record_match(None);
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
