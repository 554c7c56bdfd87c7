// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::{AnchorRecord, ContentHash, Did, OperationRef};
use crate::cas::{CasError, CasResolver};
use crate::clock::Clock;

/// Error types for anchor graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Invalid anchor: {0}")]
    InvalidAnchor(String),

    #[error("Anchor not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] CasError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GraphError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GraphError::Storage(e) if e.is_transient())
    }
}

/// Builds anchor records into content-addressable storage and reads them back
pub struct AnchorGraph {
    cas: Arc<CasResolver>,
    clock: Arc<dyn Clock>,
}

impl AnchorGraph {
    pub fn new(cas: Arc<CasResolver>, clock: Arc<dyn Clock>) -> Self {
        Self { cas, clock }
    }

    /// Build an anchor record for a batch and store it. Returns the
    /// record's content hash along with the record.
    pub async fn build(
        &self,
        previous_anchors: BTreeMap<Did, ContentHash>,
        operations: Vec<OperationRef>,
        origin: &str,
    ) -> Result<(ContentHash, AnchorRecord), GraphError> {
        if operations.is_empty() {
            return Err(GraphError::InvalidAnchor("operation batch is empty".to_string()));
        }

        let record = AnchorRecord {
            version: AnchorRecord::VERSION,
            origin: origin.to_string(),
            parents: previous_anchors,
            operations,
            published: self.clock.now(),
        };

        let dids = record.dids();
        if let Some(stray) = record.parents.keys().find(|did| !dids.contains(did.as_str())) {
            return Err(GraphError::InvalidAnchor(format!(
                "parent given for {} which no operation touches",
                stray
            )));
        }

        let hash = self.write(&record).await?;

        info!(
            "Built anchor {} with {} operations for {} DIDs ({} parents)",
            hash,
            record.operations.len(),
            dids.len(),
            record.parent_ids().len()
        );

        Ok((hash, record))
    }

    /// Store a record. Writing a record that already exists is a no-op.
    pub async fn write(&self, record: &AnchorRecord) -> Result<ContentHash, GraphError> {
        let bytes = record
            .canonical_bytes()
            .map_err(|e| GraphError::Serialization(e.to_string()))?;

        Ok(self.cas.write(&bytes).await?)
    }

    /// Read a record by hash
    pub async fn read(&self, hash: &ContentHash) -> Result<AnchorRecord, GraphError> {
        self.read_from(hash, None).await
    }

    /// Read a record, using `origin` for remote resolution if it is not
    /// held locally
    pub async fn read_from(
        &self,
        hash: &ContentHash,
        origin: Option<&str>,
    ) -> Result<AnchorRecord, GraphError> {
        let bytes = match self.cas.read(hash, origin).await {
            Ok(bytes) => bytes,
            Err(CasError::NotFound(_)) => return Err(GraphError::NotFound(hash.to_string())),
            Err(e) => return Err(GraphError::Storage(e)),
        };

        let record: AnchorRecord = serde_json::from_slice(&bytes)
            .map_err(|e| GraphError::Serialization(format!("anchor {}: {}", hash, e)))?;

        debug!("Read anchor {} from {}", hash, record.origin);
        Ok(record)
    }
}
