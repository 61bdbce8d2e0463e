use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode '{key}': {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("directive id {0} is out of range")]
    InvalidId(u32),

    #[error("duplicate directive id {0}")]
    DuplicateId(u32),

    #[error("directive {id} has an invalid regexFilter: {reason}")]
    InvalidPattern { id: u32, reason: String },

    #[error("directive {0} has no resource types")]
    EmptyResourceTypes(u32),

    #[error("matching engine is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("rule store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to persist reverse map: {0}")]
    ReverseMap(#[source] StoreError),

    #[error("matching engine rejected update: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("counter store: {0}")]
    Store(#[from] StoreError),

    #[error("metrics attributor has stopped")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
