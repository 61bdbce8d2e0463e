//! Waypoint Runtime
//!
//! Async services that sit between the compiler and the host environment.
//!
//! # Modules
//!
//! - `store`: key-value store abstraction, in-memory and JSON file stores
//! - `engine`: matching engine abstraction and an in-memory regex engine
//! - `sync`: full-replace directive synchronization
//! - `metrics`: single-writer match counter queue
//! - `lifecycle`: startup / install / change wiring
//! - `config`: storage keys and runtime settings

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod store;
pub mod sync;

pub use config::{RuntimeConfig, StorageKeys};
pub use engine::{DirectiveUpdate, MatchingEngine, MemoryEngine};
pub use error::{ConfigError, EngineError, MetricsError, StoreError, SyncError};
pub use lifecycle::Waypoint;
pub use metrics::{spawn_match_pump, MetricsAttributor, MetricsHandle};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StorageChange};
pub use sync::{SyncReport, SyncTrigger, Synchronizer};
pub use wp_core::event::extract_matched_id;
