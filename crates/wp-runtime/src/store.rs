//! Key-value stores
//!
//! The host exposes persisted storage as named areas of JSON values with
//! whole-value reads and overwrites only. Composite values (metrics, reverse
//! map) are always read in full, mutated in full and written in full.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex};

use crate::error::StoreError;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Notification that keys in a storage area were overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub area: String,
    pub keys: Vec<String>,
}

impl StorageChange {
    pub fn touches(&self, area: &str, key: &str) -> bool {
        self.area == area && self.keys.iter().any(|k| k == key)
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Name of the storage area, carried on change notifications.
    fn area(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Read a typed value, falling back to `T::default()` when the key is absent
/// or holds something of the wrong shape.
pub async fn read_or_default<T>(store: &dyn KeyValueStore, key: &str) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    match store.get(key).await? {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => match serde_json::from_value(value) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                log::warn!("'{}' in {} store is malformed ({}), using default", key, store.area(), e);
                Ok(T::default())
            }
        },
    }
}

/// Serialize and overwrite a typed value.
pub async fn write_value<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(value).map_err(|source| StoreError::Serde {
        key: key.to_string(),
        source,
    })?;
    store.set(key, value).await
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process store, optionally slowed down to surface ordering bugs.
pub struct MemoryStore {
    area: String,
    data: Mutex<HashMap<String, Value>>,
    latency: Option<Duration>,
    fail_writes: AtomicBool,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStore {
    pub fn new(area: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            area: area.into(),
            data: Mutex::new(HashMap::new()),
            latency: None,
            fail_writes: AtomicBool::new(false),
            changes,
        }
    }

    /// Delay every read and write by `latency`.
    pub fn with_latency(mut self, latency: Option<Duration>) -> Self {
        self.latency = latency;
        self
    }

    /// Make subsequent writes fail until turned off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn area(&self) -> &str {
        &self.area
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.delay().await;
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.delay().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("writes to {} are failing", self.area)));
        }
        self.data.lock().await.insert(key.to_string(), value);
        // No subscribers is fine.
        let _ = self.changes.send(StorageChange {
            area: self.area.clone(),
            keys: vec![key.to_string()],
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

// =============================================================================
// JsonFileStore
// =============================================================================

/// A storage area persisted as one JSON object in a file.
///
/// Writes go to a sibling temp file which is then renamed over the original.
pub struct JsonFileStore {
    area: String,
    path: PathBuf,
    lock: Mutex<()>,
    changes: broadcast::Sender<StorageChange>,
}

impl JsonFileStore {
    pub fn new(area: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            area: area.into(),
            path: path.into(),
            lock: Mutex::new(()),
            changes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_object(&self) -> Result<Map<String, Value>, StoreError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => {
                log::warn!("{} is not a JSON object, treating as empty", self.path.display());
                Ok(Map::new())
            }
            Err(source) => Err(StoreError::Serde {
                key: self.path.display().to_string(),
                source,
            }),
        }
    }

    async fn write_object(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(map).map_err(|source| StoreError::Serde {
            key: self.path.display().to_string(),
            source,
        })?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    fn area(&self) -> &str {
        &self.area
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_object().await?;
        Ok(map.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        {
            let _guard = self.lock.lock().await;
            let mut map = self.read_object().await?;
            map.insert(key.to_string(), value);
            self.write_object(&map).await?;
        }
        let _ = self.changes.send(StorageChange {
            area: self.area.clone(),
            keys: vec![key.to_string()],
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde_json::json;
    use wp_core::types::Metrics;

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("wp-{}-{}-{}.json", name, std::process::id(), nanos))
    }

    #[tokio::test]
    async fn memory_store_round_trip_and_notifies() {
        let store = MemoryStore::new("local");
        let mut rx = store.subscribe();

        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", json!([1, 2])).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!([1, 2])));

        let change = rx.recv().await.unwrap();
        assert!(change.touches("local", "k"));
        assert!(!change.touches("sync", "k"));
    }

    #[tokio::test]
    async fn memory_store_failing_writes() {
        let store = MemoryStore::new("local");
        store.set_fail_writes(true);
        assert!(matches!(store.set("k", json!(1)).await, Err(StoreError::Unavailable(_))));
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set_fail_writes(false);
        store.set("k", json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn read_or_default_tolerates_bad_shapes() {
        let store = MemoryStore::new("local");
        let m: Metrics = read_or_default(&store, "metrics").await.unwrap();
        assert_eq!(m, Metrics::default());

        store.set("metrics", json!("garbage")).await.unwrap();
        let m: Metrics = read_or_default(&store, "metrics").await.unwrap();
        assert_eq!(m, Metrics::default());

        write_value(&store, "metrics", &Metrics { total_redirects: 2, ..Default::default() })
            .await
            .unwrap();
        let m: Metrics = read_or_default(&store, "metrics").await.unwrap();
        assert_eq!(m.total_redirects, 2);
    }

    #[tokio::test]
    async fn json_file_store_persists() {
        let path = temp_path("store");
        let store = JsonFileStore::new("local", &path);

        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", json!({ "x": 1 })).await.unwrap();
        store.set("b", json!(true)).await.unwrap();

        let reopened = JsonFileStore::new("local", &path);
        assert_eq!(reopened.get("a").await.unwrap(), Some(json!({ "x": 1 })));
        assert_eq!(reopened.get("b").await.unwrap(), Some(json!(true)));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn json_file_store_rejects_corrupt_file() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::new("local", &path);
        assert!(matches!(store.get("a").await, Err(StoreError::Serde { .. })));
        let _ = std::fs::remove_file(&path);
    }
}
