// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Transparency log clients and Merkle proof verification

pub mod http;
pub mod memory;
pub mod merkle;

use std::fmt;

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use http::HttpLogClient;
pub use memory::MemoryLog;

/// Error types for transparency log operations
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Transparency log is disabled")]
    Disabled,

    #[error("Not found in log: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Log request timed out: {0}")]
    Timeout(String),

    #[error("Invalid log response: {0}")]
    InvalidResponse(String),

    #[error("Log rejected request: {0}")]
    Rejected(String),
}

impl LogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LogError::Network(_) | LogError::Timeout(_))
    }
}

/// A 32-byte Merkle tree hash, hex encoded on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeHash(pub [u8; 32]);

impl TreeHash {
    pub fn from_hex(value: &str) -> Result<Self, LogError> {
        let bytes = hex::decode(value).map_err(|e| LogError::InvalidResponse(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LogError::InvalidResponse(format!("hash '{}' is not 32 bytes", value)))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeHash({})", self.to_hex())
    }
}

impl fmt::Display for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for TreeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TreeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        TreeHash::from_hex(&value).map_err(de::Error::custom)
    }
}

/// Signed commitment to a log's size and root hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    /// Milliseconds since the UNIX epoch
    pub timestamp: u64,
    pub root_hash: TreeHash,
    /// Hex ed25519 signature over [`SignedTreeHead::signing_payload`]
    pub signature: String,
}

impl SignedTreeHead {
    /// Bytes covered by the tree head signature
    pub fn signing_payload(tree_size: u64, timestamp: u64, root_hash: &TreeHash) -> Vec<u8> {
        let mut payload = Vec::with_capacity(48);
        payload.extend_from_slice(&tree_size.to_be_bytes());
        payload.extend_from_slice(&timestamp.to_be_bytes());
        payload.extend_from_slice(&root_hash.0);
        payload
    }

    /// Check the signature against the log's public key
    pub fn verify(&self, key: &VerifyingKey) -> bool {
        let bytes = match hex::decode(&self.signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let bytes: [u8; 64] = match bytes.try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        let payload = Self::signing_payload(self.tree_size, self.timestamp, &self.root_hash);
        key.verify(&payload, &Signature::from_bytes(&bytes)).is_ok()
    }
}

/// Promise of inclusion returned when an entry is submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEntryTimestamp {
    /// Log the entry was submitted to
    pub endpoint: String,
    /// RFC 6962 leaf hash of the entry
    pub leaf_hash: TreeHash,
    /// Milliseconds since the UNIX epoch
    pub timestamp: u64,
    pub signature: String,
}

/// Audit path proving a leaf is in a tree of a given size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_index: u64,
    pub tree_size: u64,
    pub audit_path: Vec<TreeHash>,
}

/// Client for one transparency log endpoint
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Endpoint identity, used as the monitor record key
    fn endpoint(&self) -> &str;

    /// `false` for the no-op client
    fn is_enabled(&self) -> bool {
        true
    }

    /// Current signed tree head
    async fn get_sth(&self) -> Result<SignedTreeHead, LogError>;

    /// Consistency proof between two tree sizes
    async fn get_consistency_proof(&self, first: u64, second: u64) -> Result<Vec<TreeHash>, LogError>;

    /// Raw entries in `[start, end)`
    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<Vec<u8>>, LogError>;

    /// Submit an entry
    async fn add_chain(&self, entry: &[u8]) -> Result<SignedEntryTimestamp, LogError>;

    /// Inclusion proof for a leaf hash against a tree size
    async fn get_proof_by_hash(&self, leaf_hash: &TreeHash, tree_size: u64) -> Result<InclusionProof, LogError>;
}

/// Stand-in used when no log is configured
#[derive(Debug, Default)]
pub struct DisabledLogClient;

#[async_trait]
impl LogClient for DisabledLogClient {
    fn endpoint(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn get_sth(&self) -> Result<SignedTreeHead, LogError> {
        Err(LogError::Disabled)
    }

    async fn get_consistency_proof(&self, _first: u64, _second: u64) -> Result<Vec<TreeHash>, LogError> {
        Err(LogError::Disabled)
    }

    async fn get_entries(&self, _start: u64, _end: u64) -> Result<Vec<Vec<u8>>, LogError> {
        Err(LogError::Disabled)
    }

    async fn add_chain(&self, _entry: &[u8]) -> Result<SignedEntryTimestamp, LogError> {
        Err(LogError::Disabled)
    }

    async fn get_proof_by_hash(&self, _leaf_hash: &TreeHash, _tree_size: u64) -> Result<InclusionProof, LogError> {
        Err(LogError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_hash_serde() {
        let hash = merkle::leaf_hash(b"entry");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        assert_eq!(serde_json::from_str::<TreeHash>(&json).unwrap(), hash);
        assert!(serde_json::from_str::<TreeHash>("\"abcd\"").is_err());
    }

    #[tokio::test]
    async fn test_disabled_client() {
        let client = DisabledLogClient;
        assert!(!client.is_enabled());
        assert!(matches!(client.get_sth().await, Err(LogError::Disabled)));
    }
}
