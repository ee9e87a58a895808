//! JSON-file persistent key-value store.

use std::{collections::HashMap, path::PathBuf};

use async_trait::async_trait;
use cloud_actions_core::traits::{KeyValueStore, StoreError};
use tokio::sync::Mutex;

/// Single-file persistent store.
///
/// Keeps all keys in one JSON object on disk, rewritten on every mutation.
/// The engine stores a single small credential blob, so the rewrite cost
/// is irrelevant.
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles against the file.
    lock: Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<HashMap<String, String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StoreError::Internal(format!("corrupt store file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn save(&self, values: &HashMap<String, String>) -> Result<(), StoreError> {
        let contents = serde_json::to_string(values)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        if values.remove(key).is_some() {
            self.save(&values).await?;
        }
        Ok(())
    }
}
