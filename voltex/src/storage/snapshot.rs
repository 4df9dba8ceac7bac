//! Snapshot store
//!
//! A single in-memory map from composite keys (`|scope|key`) to JSON values,
//! mirrored in full to one file on every mutation. The store assumes it is the
//! only process touching that file.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, error, info};

use crate::errors::VoltexError;
use crate::filesys::file::File;

/// Durable scoped key-value store
pub struct SnapshotStore {
    file: File,
    ram: RwLock<Map<String, Value>>,
    loaded: OnceCell<()>,
}

impl SnapshotStore {
    /// Create a store backed by `file`. Nothing is read until first access.
    pub fn new(file: File) -> Self {
        Self {
            file,
            ram: RwLock::new(Map::new()),
            loaded: OnceCell::new(),
        }
    }

    /// Whether the initial load has completed
    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    /// Wait until the initial load has completed, starting it if needed.
    ///
    /// Concurrent callers share a single load.
    pub async fn wait_loaded(&self) {
        self.loaded.get_or_init(|| self.import()).await;
    }

    /// Get a handle to one scope of the store
    pub fn scope(self: &Arc<Self>, name: &str) -> Scope {
        Scope {
            store: Arc::clone(self),
            name: name.to_string(),
        }
    }

    async fn import(&self) {
        info!("Loading {}", self.file.path().display());

        let data = if self.file.exists().await {
            match self.file.read_json::<Value>().await {
                Ok(Value::Object(map)) => {
                    info!("Loaded {} keys from {}", map.len(), self.file.path().display());
                    map
                }
                Ok(other) => {
                    error!(
                        "{} does not hold an object (found {}), starting empty",
                        self.file.path().display(),
                        type_name(&other)
                    );
                    Map::new()
                }
                Err(e) => {
                    error!("Error loading {}: {}, starting empty", self.file.path().display(), e);
                    Map::new()
                }
            }
        } else {
            info!("{} not found, creating new one", self.file.path().display());
            if let Err(e) = self.file.write_atomic(b"{}").await {
                error!("Failed to create {}: {}", self.file.path().display(), e);
            }
            Map::new()
        };

        *self.ram.write().await = data;
    }

    async fn export(&self, ram: &Map<String, Value>) -> Result<(), VoltexError> {
        let contents = serde_json::to_vec_pretty(ram)?;
        self.file
            .write_atomic(&contents)
            .await
            .map_err(|e| VoltexError::StorageError(format!("Failed to write snapshot: {}", e)))?;
        debug!("Snapshot saved ({} keys)", ram.len());
        Ok(())
    }

    async fn set_raw(&self, key: String, value: Value) -> Result<(), VoltexError> {
        self.wait_loaded().await;
        // Hold the write lock across the export so rewrites land in mutation order
        let mut ram = self.ram.write().await;
        ram.insert(key, value);
        self.export(&ram).await
    }

    async fn get_raw(&self, key: &str) -> Option<Value> {
        self.wait_loaded().await;
        self.ram.read().await.get(key).cloned()
    }

    async fn delete_raw(&self, key: &str) -> Result<(), VoltexError> {
        self.wait_loaded().await;
        let mut ram = self.ram.write().await;
        if ram.remove(key).is_none() {
            return Ok(());
        }
        self.export(&ram).await
    }

    async fn has_raw(&self, key: &str) -> bool {
        self.wait_loaded().await;
        self.ram.read().await.contains_key(key)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Compose the on-disk key for `key` within `scope`
pub fn composite_key(scope: &str, key: &str) -> String {
    format!("|{}|{}", scope, key)
}

/// One named scope of a [`SnapshotStore`]
#[derive(Clone)]
pub struct Scope {
    store: Arc<SnapshotStore>,
    name: String,
}

impl Scope {
    /// Scope name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `value` under `key`, rewriting the snapshot file
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), VoltexError> {
        let value = serde_json::to_value(value)?;
        self.store.set_raw(composite_key(&self.name, key), value).await
    }

    /// Read the value under `key`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, VoltexError> {
        match self.store.get_raw(&composite_key(&self.name, key)).await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Remove `key`. Removing a missing key is a no-op.
    pub async fn delete(&self, key: &str) -> Result<(), VoltexError> {
        self.store.delete_raw(&composite_key(&self.name, key)).await
    }

    /// Whether `key` is present
    pub async fn has(&self, key: &str) -> bool {
        self.store.has_raw(&composite_key(&self.name, key)).await
    }
}
