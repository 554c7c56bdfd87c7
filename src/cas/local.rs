// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CasClient, CasError};
use crate::anchor::ContentHash;
use crate::store::{KeyValueStore, StoreError};

const CAS_PREFIX: &str = "cas";

impl From<StoreError> for CasError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            CasError::Unavailable(e.to_string())
        } else {
            CasError::Serialization(e.to_string())
        }
    }
}

/// Local CAS kept in the node's own key-value store
pub struct LocalCas {
    store: Arc<dyn KeyValueStore>,
}

impl LocalCas {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(hash: &ContentHash) -> String {
        format!("{}:{}", CAS_PREFIX, hash)
    }
}

#[async_trait]
impl CasClient for LocalCas {
    fn name(&self) -> &str {
        "local"
    }

    async fn write(&self, content: &[u8]) -> Result<ContentHash, CasError> {
        let hash = ContentHash::compute(content);

        // Identity is the content hash, so an existing entry is already correct
        if !self.store.put_if_absent(&Self::key(&hash), content.to_vec()).await? {
            debug!("CAS entry {} already present", hash);
        }

        Ok(hash)
    }

    async fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, CasError> {
        match self.store.get(&Self::key(hash)).await? {
            Some(versioned) => Ok(versioned.value),
            None => Err(CasError::NotFound(hash.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let cas = LocalCas::new(store.clone());

        let first = cas.write(b"anchor").await.unwrap();
        let second = cas.write(b"anchor").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(cas.read(&first).await.unwrap(), b"anchor".to_vec());
    }

    #[tokio::test]
    async fn test_missing_content() {
        let cas = LocalCas::new(Arc::new(MemoryStore::new()));
        let err = cas.read(&ContentHash::compute(b"nope")).await.unwrap_err();
        assert!(matches!(err, CasError::NotFound(_)));
        assert!(!err.is_transient());
    }
}
