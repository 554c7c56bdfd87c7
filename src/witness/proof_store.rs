// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{WitnessProof, WitnessSet};
use crate::anchor::ContentHash;
use crate::clock::Clock;
use crate::store::{Collection, KeyValueStore, StoreError};

/// Error types for the witness proof store
#[derive(Debug, Error)]
pub enum ProofStoreError {
    #[error("Conflicting proof from {witness} for anchor {anchor_id}")]
    Conflict { anchor_id: String, witness: String },

    #[error("Witness selection for anchor {0} differs from the stored selection")]
    SelectionConflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Outcome of storing a proof
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// First time this proof was seen
    Stored,
    /// Byte-identical proof was already stored
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredProof {
    proof: WitnessProof,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSelection {
    witnesses: WitnessSet,
    expires_at: DateTime<Utc>,
}

/// Durable store of witness selections and the proofs received for them
pub struct WitnessProofStore {
    proofs: Collection<StoredProof>,
    selections: Collection<StoredSelection>,
    clock: Arc<dyn Clock>,
    expiry: Duration,
}

impl WitnessProofStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, expiry: Duration) -> Self {
        Self {
            proofs: Collection::new(store.clone(), "witness-proof"),
            selections: Collection::new(store, "witness-selection"),
            clock,
            expiry,
        }
    }

    fn proof_key(anchor_id: &ContentHash, witness: &str) -> String {
        format!("{}:{}", anchor_id, witness)
    }

    /// Record the witnesses selected for an anchor. Re-recording the same
    /// selection is a no-op.
    pub async fn put_witnesses(
        &self,
        anchor_id: &ContentHash,
        witnesses: &WitnessSet,
    ) -> Result<(), ProofStoreError> {
        let record = StoredSelection {
            witnesses: witnesses.clone(),
            expires_at: self.clock.now() + self.expiry,
        };

        if self.selections.insert_new(anchor_id.as_str(), &record).await? {
            debug!("Stored {} witnesses for anchor {}", witnesses.len(), anchor_id);
            return Ok(());
        }

        match self.selections.get(anchor_id.as_str()).await? {
            Some((existing, _)) if existing.witnesses == *witnesses => Ok(()),
            Some(_) => Err(ProofStoreError::SelectionConflict(anchor_id.to_string())),
            // Expired and removed in between; retry the insert once
            None => {
                self.selections.insert_new(anchor_id.as_str(), &record).await?;
                Ok(())
            }
        }
    }

    /// Witnesses selected for an anchor
    pub async fn witnesses(&self, anchor_id: &ContentHash) -> Result<Option<WitnessSet>, ProofStoreError> {
        Ok(self
            .selections
            .get(anchor_id.as_str())
            .await?
            .map(|(record, _)| record.witnesses))
    }

    /// Store a proof. A second, different proof from the same witness for
    /// the same anchor is a conflict; the first one stays authoritative.
    pub async fn store_proof(&self, proof: &WitnessProof) -> Result<StoreOutcome, ProofStoreError> {
        let key = Self::proof_key(&proof.anchor_id, &proof.witness);
        let record = StoredProof {
            proof: proof.clone(),
            expires_at: self.clock.now() + self.expiry,
        };

        if self.proofs.insert_new(&key, &record).await? {
            debug!("Stored proof from {} for anchor {}", proof.witness, proof.anchor_id);
            return Ok(StoreOutcome::Stored);
        }

        match self.proofs.get(&key).await? {
            Some((existing, _)) if existing.proof == *proof => Ok(StoreOutcome::Duplicate),
            Some(_) => {
                warn!(
                    "Rejecting conflicting proof from {} for anchor {}",
                    proof.witness, proof.anchor_id
                );
                Err(ProofStoreError::Conflict {
                    anchor_id: proof.anchor_id.to_string(),
                    witness: proof.witness.clone(),
                })
            }
            None => {
                self.proofs.insert_new(&key, &record).await?;
                Ok(StoreOutcome::Stored)
            }
        }
    }

    /// All proofs received for an anchor
    pub async fn proofs(&self, anchor_id: &ContentHash) -> Result<Vec<WitnessProof>, ProofStoreError> {
        let prefix = format!("{}:", anchor_id);
        Ok(self
            .proofs
            .list_prefix(&prefix)
            .await?
            .into_iter()
            .map(|(_, record, _)| record.proof)
            .collect())
    }

    /// Remove the selection and proofs for an anchor
    pub async fn delete(&self, anchor_id: &ContentHash) -> Result<(), ProofStoreError> {
        for proof in self.proofs(anchor_id).await? {
            self.proofs
                .delete(&Self::proof_key(anchor_id, &proof.witness))
                .await?;
        }
        self.selections.delete(anchor_id.as_str()).await?;
        Ok(())
    }

    /// Remove every selection and proof past its expiry
    pub async fn delete_expired(&self) -> Result<usize, ProofStoreError> {
        let now = self.clock.now();
        let mut removed = 0;

        for (key, record, _) in self.proofs.list().await? {
            if record.expires_at <= now && self.proofs.delete(&key).await? {
                removed += 1;
            }
        }
        for (key, record, _) in self.selections.list().await? {
            if record.expires_at <= now && self.selections.delete(&key).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Removed {} expired witness records", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{secs, ManualClock};
    use crate::store::MemoryStore;
    use crate::witness::Witness;

    fn store() -> (WitnessProofStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = WitnessProofStore::new(Arc::new(MemoryStore::new()), clock.clone(), secs(3600));
        (store, clock)
    }

    fn proof(anchor: &ContentHash, witness: &str, signature: &str) -> WitnessProof {
        WitnessProof {
            anchor_id: anchor.clone(),
            witness: witness.to_string(),
            signature: signature.to_string(),
            created: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_identical_proof_is_idempotent() {
        let (store, _) = store();
        let anchor = ContentHash::compute(b"h1");
        let p = proof(&anchor, "https://w1", "aa");

        assert_eq!(store.store_proof(&p).await.unwrap(), StoreOutcome::Stored);
        assert_eq!(store.store_proof(&p).await.unwrap(), StoreOutcome::Duplicate);
        assert_eq!(store.proofs(&anchor).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_different_proof_from_same_witness_conflicts() {
        let (store, _) = store();
        let anchor = ContentHash::compute(b"h1");
        let original = proof(&anchor, "https://w1", "aa");

        store.store_proof(&original).await.unwrap();
        let err = store
            .store_proof(&proof(&anchor, "https://w1", "bb"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProofStoreError::Conflict { .. }));

        // Original stays authoritative
        assert_eq!(store.proofs(&anchor).await.unwrap(), vec![original]);
    }

    #[tokio::test]
    async fn test_proofs_are_scoped_per_anchor() {
        let (store, _) = store();
        let h1 = ContentHash::compute(b"h1");
        let h2 = ContentHash::compute(b"h2");

        store.store_proof(&proof(&h1, "https://w1", "aa")).await.unwrap();
        store.store_proof(&proof(&h1, "https://w2", "bb")).await.unwrap();
        store.store_proof(&proof(&h2, "https://w1", "cc")).await.unwrap();

        assert_eq!(store.proofs(&h1).await.unwrap().len(), 2);
        store.delete(&h1).await.unwrap();
        assert!(store.proofs(&h1).await.unwrap().is_empty());
        assert_eq!(store.proofs(&h2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_selection_and_expiry() {
        let (store, clock) = store();
        let anchor = ContentHash::compute(b"h1");
        let selection = WitnessSet::new(vec![Witness::batch("https://w1")]);

        store.put_witnesses(&anchor, &selection).await.unwrap();
        store.put_witnesses(&anchor, &selection).await.unwrap();
        let other = WitnessSet::new(vec![Witness::batch("https://w2")]);
        assert!(matches!(
            store.put_witnesses(&anchor, &other).await,
            Err(ProofStoreError::SelectionConflict(_))
        ));

        store.store_proof(&proof(&anchor, "https://w1", "aa")).await.unwrap();
        assert_eq!(store.delete_expired().await.unwrap(), 0);

        clock.advance(secs(3601));
        assert_eq!(store.delete_expired().await.unwrap(), 2);
        assert!(store.witnesses(&anchor).await.unwrap().is_none());
    }
}
