// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Keyed record storage with conditional writes.
//!
//! Every durable entity (anchor status, witness proofs, log monitor records,
//! task leases, the DID anchor index) lives behind [`KeyValueStore`]. Values
//! carry a version that increases on every write so concurrent writers can
//! detect a lost race and retry.

pub mod memory;
pub mod redis;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, RedisStoreConfig};

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation timeout")]
    Timeout,
}

impl StoreError {
    /// Whether retrying the operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout)
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A stored value with its write version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub version: u64,
}

/// Storage-engine agnostic key-value interface
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Name of the backend, for logs
    fn name(&self) -> &str;

    /// Read a value
    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>>;

    /// Unconditionally write a value, returning its new version
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<u64>;

    /// Write only if the key does not exist; `false` if it already did
    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> StoreResult<bool>;

    /// Write only if the stored version equals `expected_version`
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: Vec<u8>,
    ) -> StoreResult<bool>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// All entries whose key starts with `prefix`, ordered by key
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Versioned)>>;
}

/// A typed JSON view over one key prefix of a [`KeyValueStore`]
pub struct Collection<T> {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            prefix: self.prefix.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Create a collection rooted at `prefix`
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            _marker: PhantomData,
        }
    }

    fn full_key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    fn encode(value: &T) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> StoreResult<T> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read a record and its version
    pub async fn get(&self, id: &str) -> StoreResult<Option<(T, u64)>> {
        match self.store.get(&self.full_key(id)).await? {
            Some(versioned) => Ok(Some((Self::decode(&versioned.value)?, versioned.version))),
            None => Ok(None),
        }
    }

    /// Insert a record that must not exist yet
    pub async fn insert_new(&self, id: &str, value: &T) -> StoreResult<bool> {
        self.store
            .put_if_absent(&self.full_key(id), Self::encode(value)?)
            .await
    }

    /// Replace a record only if it is still at `version`
    pub async fn update(&self, id: &str, version: u64, value: &T) -> StoreResult<bool> {
        self.store
            .compare_and_swap(&self.full_key(id), version, Self::encode(value)?)
            .await
    }

    /// Unconditional write
    pub async fn upsert(&self, id: &str, value: &T) -> StoreResult<u64> {
        self.store.put(&self.full_key(id), Self::encode(value)?).await
    }

    /// Remove a record
    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.store.delete(&self.full_key(id)).await
    }

    /// Every record in the collection with its id and version
    pub async fn list(&self) -> StoreResult<Vec<(String, T, u64)>> {
        self.list_prefix("").await
    }

    /// Records whose id starts with `id_prefix`
    pub async fn list_prefix(&self, id_prefix: &str) -> StoreResult<Vec<(String, T, u64)>> {
        let scan = format!("{}:{}", self.prefix, id_prefix);
        let strip = self.prefix.len() + 1;

        let mut records = Vec::new();
        for (key, versioned) in self.store.scan_prefix(&scan).await? {
            let id = key[strip..].to_string();
            records.push((id, Self::decode(&versioned.value)?, versioned.version));
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Lease {
        owner: String,
    }

    #[tokio::test]
    async fn test_collection_conditional_writes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let leases: Collection<Lease> = Collection::new(store, "lease");

        let first = Lease { owner: "node-a".to_string() };
        assert!(leases.insert_new("sync", &first).await.unwrap());
        assert!(!leases.insert_new("sync", &first).await.unwrap());

        let (stored, version) = leases.get("sync").await.unwrap().unwrap();
        assert_eq!(stored, first);

        let second = Lease { owner: "node-b".to_string() };
        assert!(leases.update("sync", version, &second).await.unwrap());
        // Stale version loses
        assert!(!leases.update("sync", version, &first).await.unwrap());

        let all = leases.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "sync");
        assert_eq!(all[0].1, second);
    }
}
