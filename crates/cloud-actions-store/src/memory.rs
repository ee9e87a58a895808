//! In-memory key-value store.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use cloud_actions_core::traits::{KeyValueStore, StoreError};

/// Process-memory store.
///
/// The last cached credential only lives as long as the process; suits
/// headless and test environments. Data is lost on restart.
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .values
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .remove(key);
        Ok(())
    }
}
