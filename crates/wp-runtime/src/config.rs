use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Where each persisted blob lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    /// Storage area whose change notifications trigger a resync.
    pub rules_area: String,
    pub rules: String,
    pub reverse_map: String,
    pub metrics: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            rules_area: "sync".to_string(),
            rules: "redirectRules".to_string(),
            reverse_map: "ruleIdMap".to_string(),
            metrics: "redirectMetrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub keys: StorageKeys,
    /// Artificial delay applied to in-memory store reads and writes.
    pub store_latency_ms: Option<u64>,
}

impl RuntimeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn store_latency(&self) -> Option<Duration> {
        self.store_latency_ms.map(Duration::from_millis)
    }
}
