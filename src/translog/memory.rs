// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use parking_lot::RwLock;
use tracing::debug;

use super::merkle;
use super::{InclusionProof, LogClient, LogError, SignedEntryTimestamp, SignedTreeHead, TreeHash};
use crate::clock::Clock;

#[derive(Default)]
struct LogState {
    entries: Vec<Vec<u8>>,
    leaves: Vec<TreeHash>,
    index: HashMap<TreeHash, u64>,
    timestamps: Vec<u64>,
}

/// In-process append-only log with signed tree heads
pub struct MemoryLog {
    endpoint: String,
    signing_key: SigningKey,
    clock: Arc<dyn Clock>,
    state: RwLock<LogState>,
}

impl MemoryLog {
    pub fn new(endpoint: &str, secret_key: &[u8; 32], clock: Arc<dyn Clock>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            signing_key: SigningKey::from_bytes(secret_key),
            clock,
            state: RwLock::new(LogState::default()),
        }
    }

    /// Key that verifies this log's tree heads
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn size(&self) -> u64 {
        self.state.read().leaves.len() as u64
    }

    fn now_millis(&self) -> u64 {
        self.clock.now().timestamp_millis().max(0) as u64
    }

    fn sign(&self, payload: &[u8]) -> String {
        hex::encode(self.signing_key.sign(payload).to_bytes())
    }

    /// Signed head for an earlier tree size
    pub fn tree_head_at(&self, tree_size: u64) -> Result<SignedTreeHead, LogError> {
        let root_hash = {
            let state = self.state.read();
            if tree_size > state.leaves.len() as u64 {
                return Err(LogError::NotFound(format!("tree size {}", tree_size)));
            }
            merkle::root(&state.leaves[..tree_size as usize])
        };

        let timestamp = self.now_millis();
        let signature = self.sign(&SignedTreeHead::signing_payload(tree_size, timestamp, &root_hash));

        Ok(SignedTreeHead {
            tree_size,
            timestamp,
            root_hash,
            signature,
        })
    }
}

#[async_trait]
impl LogClient for MemoryLog {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_sth(&self) -> Result<SignedTreeHead, LogError> {
        self.tree_head_at(self.size())
    }

    async fn get_consistency_proof(&self, first: u64, second: u64) -> Result<Vec<TreeHash>, LogError> {
        let state = self.state.read();
        if first > second || second > state.leaves.len() as u64 {
            return Err(LogError::Rejected(format!(
                "no consistency proof between {} and {}",
                first, second
            )));
        }
        Ok(merkle::consistency_proof(
            first as usize,
            &state.leaves[..second as usize],
        ))
    }

    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<Vec<u8>>, LogError> {
        let state = self.state.read();
        let end = end.min(state.entries.len() as u64);
        if start > end {
            return Err(LogError::Rejected(format!("invalid range {}..{}", start, end)));
        }
        Ok(state.entries[start as usize..end as usize].to_vec())
    }

    async fn add_chain(&self, entry: &[u8]) -> Result<SignedEntryTimestamp, LogError> {
        let leaf_hash = merkle::leaf_hash(entry);

        let timestamp = {
            let mut state = self.state.write();
            match state.index.get(&leaf_hash) {
                // Resubmission returns the original timestamp
                Some(&index) => state.timestamps[index as usize],
                None => {
                    let timestamp = self.now_millis();
                    let index = state.leaves.len() as u64;
                    state.entries.push(entry.to_vec());
                    state.leaves.push(leaf_hash);
                    state.timestamps.push(timestamp);
                    state.index.insert(leaf_hash, index);
                    debug!("Log {} appended leaf {} at {}", self.endpoint, leaf_hash, index);
                    timestamp
                }
            }
        };

        let mut payload = leaf_hash.0.to_vec();
        payload.extend_from_slice(&timestamp.to_be_bytes());

        Ok(SignedEntryTimestamp {
            endpoint: self.endpoint.clone(),
            leaf_hash,
            timestamp,
            signature: self.sign(&payload),
        })
    }

    async fn get_proof_by_hash(&self, leaf_hash: &TreeHash, tree_size: u64) -> Result<InclusionProof, LogError> {
        let state = self.state.read();
        if tree_size > state.leaves.len() as u64 {
            return Err(LogError::Rejected(format!("tree size {} is beyond the log", tree_size)));
        }

        match state.index.get(leaf_hash) {
            Some(&leaf_index) if leaf_index < tree_size => Ok(InclusionProof {
                leaf_index,
                tree_size,
                audit_path: merkle::inclusion_path(leaf_index as usize, &state.leaves[..tree_size as usize]),
            }),
            _ => Err(LogError::NotFound(format!("leaf {}", leaf_hash))),
        }
    }
}
