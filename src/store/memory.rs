// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{KeyValueStore, StoreResult, Versioned};

/// In-memory key-value store (non-persistent)
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Versioned>>,
    next_version: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            next_version: AtomicU64::new(1),
        }
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<u64> {
        let version = self.bump();
        self.data
            .write()
            .insert(key.to_string(), Versioned { value, version });
        Ok(version)
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> StoreResult<bool> {
        let mut data = self.data.write();
        if data.contains_key(key) {
            return Ok(false);
        }

        let version = self.bump();
        data.insert(key.to_string(), Versioned { value, version });
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: Vec<u8>,
    ) -> StoreResult<bool> {
        let mut data = self.data.write();
        match data.get(key) {
            Some(current) if current.version == expected_version => {
                let version = self.bump();
                data.insert(key.to_string(), Versioned { value, version });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.data.write().remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Versioned)>> {
        let data = self.data.read();
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[tokio::test]
    async fn test_versions_increase_and_cas_rejects_stale() {
        let store = MemoryStore::new();

        assert!(store.put_if_absent("a", b"1".to_vec()).await.unwrap());
        let first = store.get("a").await.unwrap().unwrap();

        assert!(store.compare_and_swap("a", first.version, b"2".to_vec()).await.unwrap());
        let second = store.get("a").await.unwrap().unwrap();
        assert!(second.version > first.version);
        assert_eq!(second.value, b"2".to_vec());

        assert!(!store.compare_and_swap("a", first.version, b"3".to_vec()).await.unwrap());
        assert!(!store.compare_and_swap("missing", 1, b"x".to_vec()).await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_prefix_is_bounded() {
        let store = MemoryStore::new();
        store.put("proof:h1:w1", vec![1]).await.unwrap();
        store.put("proof:h1:w2", vec![2]).await.unwrap();
        store.put("proof:h2:w1", vec![3]).await.unwrap();
        store.put("status:h1", vec![4]).await.unwrap();

        let scanned = store.scan_prefix("proof:h1:").await.unwrap();
        let keys: Vec<_> = scanned.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["proof:h1:w1".to_string(), "proof:h1:w2".to_string()]);

        assert!(store.delete("status:h1").await.unwrap());
        assert!(!store.delete("status:h1").await.unwrap());
    }

    #[test]
    fn test_put_if_absent_keeps_first_writer() {
        let store = MemoryStore::new();

        assert!(block_on(store.put_if_absent("lease:task", b"one".to_vec())).unwrap());
        assert!(!block_on(store.put_if_absent("lease:task", b"two".to_vec())).unwrap());

        let current = block_on(store.get("lease:task")).unwrap().unwrap();
        assert_eq!(current.value, b"one".to_vec());
    }
}
