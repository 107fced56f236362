use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{validate_key, ObjectStore, StorageError};

/// In-process object store. Also counts writes so callers can verify that
/// an artifact was written exactly once.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    puts: RwLock<HashMap<String, usize>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `key` has been written.
    pub async fn put_count(&self, key: &str) -> usize {
        self.puts.read().await.get(key).copied().unwrap_or(0)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        self.objects.write().await.insert(key.to_string(), bytes);
        *self.puts.write().await.entry(key.to_string()).or_default() += 1;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        Ok(self.objects.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn put_then_get_and_count_writes() {
        let store = MemoryObjectStore::new();
        assert!(store.get("results/a.json").await.unwrap().is_none());

        store.put("results/a.json", b"{}".to_vec()).await.unwrap();
        store.put("results/a.json", b"[]".to_vec()).await.unwrap();

        assert_eq!(store.get("results/a.json").await.unwrap().unwrap(), b"[]");
        assert_eq!(store.put_count("results/a.json").await, 2);
        assert_eq!(store.keys().await, vec!["results/a.json".to_string()]);
    }

    #[tokio::test]
    async fn invalid_key_rejected() {
        let store = MemoryObjectStore::new();
        assert_matches!(
            store.put("../escape", vec![]).await,
            Err(StorageError::InvalidKey(_))
        );
    }
}
