// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

use super::WitnessProof;
use crate::anchor::ContentHash;
use crate::clock::Clock;

/// Errors that can occur during proof signing and verification
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),

    #[error("Verification failed for witness {0}")]
    VerificationFailed(String),
}

/// The local node acting as a witness
pub struct LocalWitness {
    id: String,
    signing_key: SigningKey,
    clock: Arc<dyn Clock>,
}

impl LocalWitness {
    /// Create a witness from a 32-byte ed25519 secret key
    pub fn new(id: &str, secret_key: &[u8; 32], clock: Arc<dyn Clock>) -> Self {
        Self {
            id: id.to_string(),
            signing_key: SigningKey::from_bytes(secret_key),
            clock,
        }
    }

    /// Create a witness from a hex-encoded secret key
    pub fn from_hex(id: &str, secret_hex: &str, clock: Arc<dyn Clock>) -> Result<Self, SignerError> {
        let bytes = hex::decode(secret_hex).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignerError::InvalidKey("expected 32 bytes".to_string()))?;
        Ok(Self::new(id, &secret, clock))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign an anchor
    pub fn witness(&self, anchor_id: &ContentHash) -> WitnessProof {
        let created = self.clock.now();
        let payload = WitnessProof::signing_payload(anchor_id, &created);
        let signature = self.signing_key.sign(&payload);

        WitnessProof {
            anchor_id: anchor_id.clone(),
            witness: self.id.clone(),
            signature: hex::encode(signature.to_bytes()),
            created,
        }
    }
}

/// Check a proof's signature against the witness's key
pub fn verify_proof(proof: &WitnessProof, key: &VerifyingKey) -> Result<(), SignerError> {
    let bytes = hex::decode(&proof.signature)
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|_| SignerError::InvalidSignature("expected 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&bytes);

    let payload = WitnessProof::signing_payload(&proof.anchor_id, &proof.created);
    key.verify(&payload, &signature)
        .map_err(|_| SignerError::VerificationFailed(proof.witness.clone()))
}
