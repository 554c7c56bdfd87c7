// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Anchor records: content-addressed Merkle-DAG nodes batching DID operations

pub mod graph;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use graph::{AnchorGraph, GraphError};

/// Decentralized identifier, e.g. `did:orb:abc`
pub type Did = String;

/// Lowercase hex SHA-256 of a byte string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw bytes
    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an already computed hash, validating its shape
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == 64
            && value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `bytes` hash to this value
    pub fn matches(&self, bytes: &[u8]) -> bool {
        Self::compute(bytes) == *self
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of document operation being anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Recover,
    Deactivate,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Create => write!(f, "create"),
            OperationType::Update => write!(f, "update"),
            OperationType::Recover => write!(f, "recover"),
            OperationType::Deactivate => write!(f, "deactivate"),
        }
    }
}

/// Reference to one document operation included in a batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationRef {
    /// DID the operation applies to
    pub did: Did,
    /// Hash of the operation payload
    pub operation_hash: String,
    /// Operation kind
    pub operation_type: OperationType,
}

impl OperationRef {
    pub fn new(did: &str, operation_hash: &str, operation_type: OperationType) -> Self {
        Self {
            did: did.to_string(),
            operation_hash: operation_hash.to_string(),
            operation_type,
        }
    }
}

/// Immutable anchor record. Its identity is the hash of its canonical
/// serialization; the map fields are ordered so serialization is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    /// Record format version
    pub version: u32,
    /// Node that built the anchor
    pub origin: String,
    /// Previous anchor for each DID touched by this batch
    pub parents: BTreeMap<Did, ContentHash>,
    /// Operations anchored by this batch, in batch order
    pub operations: Vec<OperationRef>,
    /// When the batch was cut
    pub published: DateTime<Utc>,
}

impl AnchorRecord {
    pub const VERSION: u32 = 1;

    /// Canonical bytes for hashing and storage
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Content identity of the record
    pub fn id(&self) -> Result<ContentHash, serde_json::Error> {
        Ok(ContentHash::compute(&self.canonical_bytes()?))
    }

    /// DIDs touched by this batch
    pub fn dids(&self) -> BTreeSet<&str> {
        self.operations.iter().map(|op| op.did.as_str()).collect()
    }

    /// Distinct parent anchors
    pub fn parent_ids(&self) -> BTreeSet<&ContentHash> {
        self.parents.values().collect()
    }

    /// Operations for one DID, in batch order
    pub fn operations_for<'a>(&'a self, did: &'a str) -> impl Iterator<Item = &'a OperationRef> + 'a {
        self.operations.iter().filter(move |op| op.did == did)
    }
}
