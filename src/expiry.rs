// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::observer::{Observer, ObserverError};
use crate::status::{AnchorStatusStore, StatusError};
use crate::witness::{ProofStoreError, WitnessProofStore};

/// Error types for the data expiry service
#[derive(Debug, Error)]
pub enum ExpiryError {
    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    #[error("Proof store error: {0}")]
    ProofStore(#[from] ProofStoreError),

    #[error("Observer error: {0}")]
    Observer(#[from] ObserverError),
}

/// Records removed by one expiry pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExpirySummary {
    pub statuses: usize,
    pub proofs: usize,
}

/// Deletes terminal status records and witness data past their expiry
pub struct DataExpiryService {
    status: Arc<AnchorStatusStore>,
    proofs: Arc<WitnessProofStore>,
}

impl DataExpiryService {
    pub fn new(status: Arc<AnchorStatusStore>, proofs: Arc<WitnessProofStore>) -> Self {
        Self { status, proofs }
    }

    pub async fn run_once(&self) -> Result<ExpirySummary, ExpiryError> {
        let summary = ExpirySummary {
            statuses: self.status.delete_expired().await?,
            proofs: self.proofs.delete_expired().await?,
        };

        if summary.statuses + summary.proofs > 0 {
            info!(
                "Expired {} status records and {} witness records",
                summary.statuses, summary.proofs
            );
        }
        Ok(summary)
    }
}

/// Periodic retry of anchors the observer could not index yet
pub async fn retry_observer_queue(observer: &Observer) -> Result<(), ExpiryError> {
    let summary = observer.retry_pending().await?;
    if summary.indexed + summary.dropped > 0 {
        info!(
            "Observer retry: {} indexed, {} still pending, {} dropped",
            summary.indexed, summary.still_pending, summary.dropped
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::ContentHash;
    use crate::clock::{secs, ManualClock};
    use crate::status::{AnchorState, FailureReason};
    use crate::store::{KeyValueStore, MemoryStore};
    use crate::telemetry::TelemetryReporter;
    use crate::witness::{LocalWitness, Witness, WitnessSet};

    #[tokio::test]
    async fn test_terminal_records_expire_in_process_records_stay() {
        let clock = Arc::new(ManualClock::starting_now());
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let status = Arc::new(AnchorStatusStore::new(
            store.clone(),
            clock.clone(),
            Arc::new(TelemetryReporter::new(0)),
            secs(30),
            secs(660),
            secs(3600),
        ));
        let proofs = Arc::new(WitnessProofStore::new(store, clock.clone(), secs(7200)));
        let service = DataExpiryService::new(status.clone(), proofs.clone());

        let done = ContentHash::compute(b"done");
        let open = ContentHash::compute(b"open");
        for id in [&done, &open] {
            status.add_pending(id).await.unwrap();
            status.mark_in_process(id).await.unwrap();
        }
        status.fail(&done, FailureReason::Expired, "no quorum").await.unwrap();

        proofs
            .put_witnesses(&done, &WitnessSet::new(vec![Witness::batch("https://w")]))
            .await
            .unwrap();
        proofs
            .store_proof(&LocalWitness::new("https://w", &[2u8; 32], clock.clone()).witness(&done))
            .await
            .unwrap();

        assert_eq!(service.run_once().await.unwrap(), ExpirySummary::default());

        clock.advance(secs(3600));
        let summary = service.run_once().await.unwrap();
        assert_eq!(summary.statuses, 1);
        assert_eq!(summary.proofs, 0);
        assert_eq!(
            status.get_status(&open).await.unwrap().unwrap().state,
            AnchorState::InProcess
        );

        clock.advance(secs(3600));
        assert_eq!(service.run_once().await.unwrap().proofs, 2);
    }
}
