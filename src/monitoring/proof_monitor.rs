// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::registry::{LogEndpoint, LogEndpointRegistry};
use super::MonitorError;
use crate::anchor::ContentHash;
use crate::clock::Clock;
use crate::event_data;
use crate::status::{AnchorStatusStore, LogInclusion};
use crate::telemetry::TelemetryReporter;
use crate::translog::{merkle, LogError, TreeHash};

/// Counts from one proof monitor pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProofMonitorSummary {
    pub checked: usize,
    pub included: usize,
    pub expired: usize,
    pub waiting: usize,
    pub errors: usize,
}

enum Checked {
    Included,
    Expired,
    Waiting,
}

/// Polls logs for inclusion proofs of submitted anchors. Only the
/// `log_inclusion` annotation is written; anchor state is left alone.
pub struct ProofMonitor {
    registry: Arc<LogEndpointRegistry>,
    status: Arc<AnchorStatusStore>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<TelemetryReporter>,
    /// How long to wait for an inclusion proof
    expiry: Duration,
}

impl ProofMonitor {
    pub fn new(
        registry: Arc<LogEndpointRegistry>,
        status: Arc<AnchorStatusStore>,
        clock: Arc<dyn Clock>,
        telemetry: Arc<TelemetryReporter>,
        expiry: Duration,
    ) -> Self {
        Self {
            registry,
            status,
            clock,
            telemetry,
            expiry,
        }
    }

    /// Look for a verified inclusion proof; `None` while the log has not
    /// incorporated the leaf yet
    async fn find_inclusion(
        &self,
        endpoint: &LogEndpoint,
        leaf_hash: &TreeHash,
    ) -> Result<Option<(u64, u64)>, MonitorError> {
        let sth = endpoint.client.get_sth().await?;
        if sth.tree_size == 0 {
            return Ok(None);
        }

        if let Some(key) = &endpoint.public_key {
            if !sth.verify(key) {
                warn!("Ignoring tree head from {} with an invalid signature", endpoint.name());
                return Ok(None);
            }
        }

        let proof = match endpoint.client.get_proof_by_hash(leaf_hash, sth.tree_size).await {
            Ok(proof) => proof,
            Err(LogError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if merkle::verify_inclusion(
            proof.leaf_index,
            sth.tree_size,
            leaf_hash,
            &proof.audit_path,
            &sth.root_hash,
        ) {
            Ok(Some((proof.leaf_index, sth.tree_size)))
        } else {
            warn!(
                "Inclusion proof for {} from {} does not verify",
                leaf_hash,
                endpoint.name()
            );
            Ok(None)
        }
    }

    /// One pass over every anchor waiting for an inclusion proof. A failed
    /// update is logged and counted without stopping the pass.
    pub async fn check_pending(&self) -> Result<ProofMonitorSummary, MonitorError> {
        let now = self.clock.now();
        let mut summary = ProofMonitorSummary::default();

        for status in self.status.pending_inclusion().await? {
            let (endpoint, leaf_hash, submitted_at) = match &status.log_inclusion {
                LogInclusion::Pending {
                    endpoint,
                    leaf_hash,
                    submitted_at,
                } => (endpoint.clone(), *leaf_hash, *submitted_at),
                _ => continue,
            };
            summary.checked += 1;
            let anchor_id = &status.anchor_id;

            match self.check_one(anchor_id, endpoint, leaf_hash, submitted_at, now).await {
                Ok(Checked::Included) => summary.included += 1,
                Ok(Checked::Expired) => summary.expired += 1,
                Ok(Checked::Waiting) => summary.waiting += 1,
                Err(e) => {
                    warn!("Inclusion update for anchor {} failed: {}", anchor_id, e);
                    summary.errors += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn check_one(
        &self,
        anchor_id: &ContentHash,
        endpoint: String,
        leaf_hash: TreeHash,
        submitted_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Checked, MonitorError> {
        if now - submitted_at >= self.expiry {
            let reason = format!(
                "no inclusion proof from {} within {}s",
                endpoint,
                self.expiry.num_seconds()
            );
            warn!("Anchor {}: {}", anchor_id, reason);
            self.status
                .set_log_inclusion(anchor_id, LogInclusion::Failed { reason })
                .await?;
            self.telemetry.report_custom(
                "inclusion_proof_expired",
                event_data!("anchor_id" => anchor_id.to_string(), "endpoint" => endpoint),
            );
            return Ok(Checked::Expired);
        }

        let log = match self.registry.get(&endpoint) {
            Some(log) => log,
            None => {
                let reason = format!("log {} is no longer configured", endpoint);
                self.status
                    .set_log_inclusion(anchor_id, LogInclusion::Failed { reason })
                    .await?;
                return Ok(Checked::Expired);
            }
        };

        if self.registry.quarantine_reason(&endpoint).await?.is_some() {
            debug!("Log {} is quarantined; not polling for {}", endpoint, anchor_id);
            return Ok(Checked::Waiting);
        }

        match self.find_inclusion(log, &leaf_hash).await {
            Ok(Some((leaf_index, tree_size))) => {
                info!(
                    "Anchor {} included in {} at index {} of {}",
                    anchor_id, endpoint, leaf_index, tree_size
                );
                self.status
                    .set_log_inclusion(
                        anchor_id,
                        LogInclusion::Included {
                            endpoint,
                            leaf_index,
                            tree_size,
                        },
                    )
                    .await?;
                Ok(Checked::Included)
            }
            Ok(None) => Ok(Checked::Waiting),
            Err(e) => {
                warn!("Inclusion check for {} on {} failed: {}", anchor_id, endpoint, e);
                Ok(Checked::Waiting)
            }
        }
    }
}
