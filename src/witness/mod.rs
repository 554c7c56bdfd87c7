// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Witnesses, their proofs, the quorum policy and the proof store

pub mod policy;
pub mod proof_store;
pub mod signer;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anchor::ContentHash;

pub use policy::{PolicyError, PolicyOutcome, PolicyProvider, WitnessPolicy};
pub use proof_store::{ProofStoreError, StoreOutcome, WitnessProofStore};
pub use signer::{verify_proof, LocalWitness, SignerError};

/// Witness category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WitnessType {
    /// Chosen per anchor
    Batch,
    /// Fixed for the deployment
    System,
}

impl fmt::Display for WitnessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WitnessType::Batch => write!(f, "batch"),
            WitnessType::System => write!(f, "system"),
        }
    }
}

/// A witness selected for an anchor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Witness {
    /// Witness actor identity
    pub id: String,
    /// Category the witness counts towards
    pub witness_type: WitnessType,
    /// Whether this is the local node
    pub is_local: bool,
}

impl Witness {
    pub fn batch(id: &str) -> Self {
        Self {
            id: id.to_string(),
            witness_type: WitnessType::Batch,
            is_local: false,
        }
    }

    pub fn system(id: &str) -> Self {
        Self {
            id: id.to_string(),
            witness_type: WitnessType::System,
            is_local: false,
        }
    }

    pub fn local(id: &str) -> Self {
        Self {
            id: id.to_string(),
            witness_type: WitnessType::System,
            is_local: true,
        }
    }
}

/// The witnesses selected for one anchor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessSet {
    witnesses: Vec<Witness>,
}

impl WitnessSet {
    pub fn new(witnesses: Vec<Witness>) -> Self {
        let mut set = Self::default();
        for witness in witnesses {
            set.insert(witness);
        }
        set
    }

    /// Add a witness unless one with the same id is already present
    pub fn insert(&mut self, witness: Witness) -> bool {
        if self.contains(&witness.id) {
            return false;
        }
        self.witnesses.push(witness);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.witnesses.iter().any(|w| w.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Witness> {
        self.witnesses.iter().find(|w| w.id == id)
    }

    pub fn of_type(&self, witness_type: WitnessType) -> impl Iterator<Item = &Witness> {
        self.witnesses.iter().filter(move |w| w.witness_type == witness_type)
    }

    pub fn count(&self, witness_type: WitnessType) -> usize {
        self.of_type(witness_type).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Witness> {
        self.witnesses.iter()
    }

    pub fn len(&self) -> usize {
        self.witnesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.witnesses.is_empty()
    }
}

/// Signed attestation by one witness over one anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessProof {
    /// Anchor being attested
    pub anchor_id: ContentHash,
    /// Witness identity
    pub witness: String,
    /// Hex ed25519 signature over the anchor id and creation time
    pub signature: String,
    /// When the witness signed
    pub created: DateTime<Utc>,
}

impl WitnessProof {
    /// Bytes covered by the signature
    pub fn signing_payload(anchor_id: &ContentHash, created: &DateTime<Utc>) -> Vec<u8> {
        let mut payload = anchor_id.as_str().as_bytes().to_vec();
        payload.push(b'|');
        payload.extend_from_slice(created.to_rfc3339().as_bytes());
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_witness_set_dedups_by_id() {
        let mut set = WitnessSet::new(vec![
            Witness::batch("https://w1"),
            Witness::batch("https://w2"),
            Witness::local("https://me"),
        ]);

        assert!(!set.insert(Witness::system("https://w1")));
        assert_eq!(set.count(WitnessType::Batch), 2);
        assert_eq!(set.count(WitnessType::System), 1);
        assert!(set.get("https://me").unwrap().is_local);
    }
}
