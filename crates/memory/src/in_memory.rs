use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use taskcell_core::{Error, Result};

use crate::MemoryAdapter;

/// Purely in-process adapter. Used by tests and by embedders that do not
/// need durability across restarts.
#[derive(Default)]
pub struct InMemory {
    data: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryAdapter for InMemory {
    async fn load(&self, scope: &str, key: &str) -> Result<Value> {
        let data = self.data.read().await;
        data.get(scope)
            .and_then(|entries| entries.get(key))
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("Key '{}' not found in scope '{}'", key, scope))
            })
    }

    async fn save(&self, scope: &str, key: &str, value: &Value) -> Result<()> {
        let mut data = self.data.write().await;
        data.entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<()> {
        let mut data = self.data.write().await;
        if let Some(entries) = data.get_mut(scope) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self, scope: &str) -> Result<Vec<String>> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data
            .get(scope)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}
