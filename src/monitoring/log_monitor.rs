// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::registry::{LogEndpoint, LogEndpointRegistry};
use super::MonitorError;
use crate::clock::Clock;
use crate::event_data;
use crate::telemetry::TelemetryReporter;
use crate::translog::{merkle, LogError, SignedTreeHead, TreeHash};

/// Last verified state of one transparency log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMonitorRecord {
    pub endpoint: String,
    /// Size of the last verified tree head
    pub tree_size: u64,
    /// Root of the last verified tree head
    pub root_hash: Option<TreeHash>,
    /// Timestamp of the last verified tree head, ms since the epoch
    pub sth_timestamp: u64,
    pub checked_at: Option<DateTime<Utc>>,
    /// Leaf hashes of the whole tree while it is small enough to re-hash
    pub leaf_hashes: Vec<TreeHash>,
    /// Set when the log was caught forking, shrinking or mis-signing
    pub quarantined: Option<String>,
}

impl LogMonitorRecord {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }
}

/// Outcome of checking one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    /// New tree head verified and recorded
    Verified { tree_size: u64 },
    /// Same tree head as last time
    Unchanged,
    /// The log failed verification on this check
    Quarantined(String),
    /// The log was already quarantined and was not contacted
    AlreadyQuarantined,
    /// Another monitor updated the record concurrently
    Raced,
}

/// Verifies that each log only ever grows by appending
pub struct LogMonitor {
    registry: Arc<LogEndpointRegistry>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<TelemetryReporter>,
    /// Trees above this size are trusted on their consistency proofs alone
    max_tree_size: u64,
    /// Entries fetched per request when re-hashing
    batch_size: u64,
}

impl LogMonitor {
    pub fn new(
        registry: Arc<LogEndpointRegistry>,
        clock: Arc<dyn Clock>,
        telemetry: Arc<TelemetryReporter>,
        max_tree_size: u64,
        batch_size: u64,
    ) -> Self {
        Self {
            registry,
            clock,
            telemetry,
            max_tree_size,
            batch_size: batch_size.max(1),
        }
    }

    /// Check every configured endpoint. A failure on one endpoint does not
    /// stop the others.
    pub async fn check_all(&self) -> Vec<(String, Result<CheckResult, MonitorError>)> {
        let mut results = Vec::new();
        for endpoint in self.registry.all() {
            let result = self.check_endpoint(endpoint).await;
            if let Err(e) = &result {
                warn!("Log monitor check of {} failed: {}", endpoint.name(), e);
            }
            results.push((endpoint.name().to_string(), result));
        }
        results
    }

    async fn save(
        &self,
        record: &LogMonitorRecord,
        version: Option<u64>,
    ) -> Result<bool, MonitorError> {
        let records = self.registry.records();
        let saved = match version {
            Some(version) => records.update(&record.endpoint, version, record).await?,
            None => records.insert_new(&record.endpoint, record).await?,
        };
        if !saved {
            debug!("Monitor record for {} changed concurrently", record.endpoint);
        }
        Ok(saved)
    }

    async fn quarantine(
        &self,
        mut record: LogMonitorRecord,
        version: Option<u64>,
        reason: String,
    ) -> Result<CheckResult, MonitorError> {
        error!("Log {} is inconsistent: {}", record.endpoint, reason);
        self.telemetry.report_custom(
            "log_inconsistent",
            event_data!(
                "endpoint" => record.endpoint.clone(),
                "reason" => reason.clone(),
                "verified_size" => record.tree_size,
            ),
        );

        // Verified size and root stay as they were
        record.quarantined = Some(reason.clone());
        record.checked_at = Some(self.clock.now());

        if self.save(&record, version).await? {
            Ok(CheckResult::Quarantined(reason))
        } else {
            Ok(CheckResult::Raced)
        }
    }

    /// Re-hash entries `[cached, tree_size)` onto the cached leaves
    async fn rehash(
        &self,
        endpoint: &LogEndpoint,
        mut leaves: Vec<TreeHash>,
        tree_size: u64,
    ) -> Result<Vec<TreeHash>, MonitorError> {
        let mut start = leaves.len() as u64;
        while start < tree_size {
            let end = (start + self.batch_size).min(tree_size);
            let entries = endpoint.client.get_entries(start, end).await?;
            if entries.is_empty() {
                return Err(LogError::InvalidResponse(format!(
                    "{} returned no entries for {}..{}",
                    endpoint.name(),
                    start,
                    end
                ))
                .into());
            }

            for entry in entries.iter().take((end - start) as usize) {
                leaves.push(merkle::leaf_hash(entry));
            }
            start = leaves.len() as u64;
        }
        Ok(leaves)
    }

    /// Fetch the endpoint's tree head and verify it against the last one
    pub async fn check_endpoint(&self, endpoint: &LogEndpoint) -> Result<CheckResult, MonitorError> {
        let records = self.registry.records();
        let (mut record, version) = match records.get(endpoint.name()).await? {
            Some((record, version)) => (record, Some(version)),
            None => (LogMonitorRecord::new(endpoint.name()), None),
        };

        if record.quarantined.is_some() {
            return Ok(CheckResult::AlreadyQuarantined);
        }

        let sth: SignedTreeHead = endpoint.client.get_sth().await?;

        if let Some(key) = &endpoint.public_key {
            if !sth.verify(key) {
                let reason = format!("tree head of size {} has an invalid signature", sth.tree_size);
                return self.quarantine(record, version, reason).await;
            }
        }

        if sth.tree_size < record.tree_size {
            let reason = format!(
                "tree size decreased from {} to {}",
                record.tree_size, sth.tree_size
            );
            return self.quarantine(record, version, reason).await;
        }

        if let Some(old_root) = record.root_hash {
            if sth.tree_size == record.tree_size {
                if sth.root_hash != old_root {
                    let reason = format!("root hash changed at tree size {}", sth.tree_size);
                    return self.quarantine(record, version, reason).await;
                }

                record.checked_at = Some(self.clock.now());
                self.save(&record, version).await?;
                return Ok(CheckResult::Unchanged);
            }

            if record.tree_size > 0 {
                let proof = endpoint
                    .client
                    .get_consistency_proof(record.tree_size, sth.tree_size)
                    .await?;
                if !merkle::verify_consistency(
                    record.tree_size,
                    sth.tree_size,
                    &old_root,
                    &sth.root_hash,
                    &proof,
                ) {
                    let reason = format!(
                        "no valid consistency proof from size {} to {}",
                        record.tree_size, sth.tree_size
                    );
                    return self.quarantine(record, version, reason).await;
                }
            }
        }

        if sth.tree_size <= self.max_tree_size {
            let cached = if record.root_hash.is_some() && record.leaf_hashes.len() as u64 == record.tree_size {
                std::mem::take(&mut record.leaf_hashes)
            } else {
                Vec::new()
            };

            let leaves = self.rehash(endpoint, cached, sth.tree_size).await?;
            if merkle::root(&leaves) != sth.root_hash {
                let reason = format!(
                    "entries do not hash to the signed root at size {}",
                    sth.tree_size
                );
                record.leaf_hashes.clear();
                return self.quarantine(record, version, reason).await;
            }
            record.leaf_hashes = leaves;
        } else {
            debug!(
                "Log {} has {} entries, above {}; skipping re-hash",
                endpoint.name(),
                sth.tree_size,
                self.max_tree_size
            );
            record.leaf_hashes.clear();
        }

        record.tree_size = sth.tree_size;
        record.root_hash = Some(sth.root_hash);
        record.sth_timestamp = sth.timestamp;
        record.checked_at = Some(self.clock.now());

        if !self.save(&record, version).await? {
            return Ok(CheckResult::Raced);
        }

        info!("Verified log {} at tree size {}", endpoint.name(), sth.tree_size);
        Ok(CheckResult::Verified {
            tree_size: sth.tree_size,
        })
    }
}
