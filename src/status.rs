// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Anchor status store.
//!
//! Every anchor moves `Pending -> InProcess -> Completed` or ends in
//! `Failed`. Terminal records are never reopened; transitions on them are
//! no-ops so duplicate deliveries stay harmless. All writes go through
//! compare-and-swap on the record version.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::anchor::ContentHash;
use crate::clock::Clock;
use crate::event_data;
use crate::store::{Collection, KeyValueStore, StoreError};
use crate::telemetry::TelemetryReporter;
use crate::translog::TreeHash;
use crate::witness::PolicyOutcome;

/// Attempts at a conditional write before giving up on a contended record
const MAX_CAS_RETRIES: usize = 8;

/// Error types for the anchor status store
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Anchor status not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for anchor {anchor_id}: {from} -> {to}")]
    InvalidTransition {
        anchor_id: String,
        from: String,
        to: String,
    },

    #[error("Anchor {0} is contended; retries exhausted")]
    Contended(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Why an anchor failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// No quorum within the witness window, or the policy cannot be met
    Expired,
    /// The anchor could not be built, stored or offered
    Error,
}

/// Anchor lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorState {
    Pending,
    InProcess,
    Completed,
    Failed(FailureReason),
}

impl AnchorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnchorState::Completed | AnchorState::Failed(_))
    }
}

impl fmt::Display for AnchorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorState::Pending => write!(f, "pending"),
            AnchorState::InProcess => write!(f, "in-process"),
            AnchorState::Completed => write!(f, "completed"),
            AnchorState::Failed(FailureReason::Expired) => write!(f, "failed(expired)"),
            AnchorState::Failed(FailureReason::Error) => write!(f, "failed(error)"),
        }
    }
}

/// Progress of an anchor through the transparency log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LogInclusion {
    NotSubmitted,
    Pending {
        endpoint: String,
        leaf_hash: TreeHash,
        submitted_at: DateTime<Utc>,
    },
    Included {
        endpoint: String,
        leaf_index: u64,
        tree_size: u64,
    },
    Failed {
        reason: String,
    },
}

/// Status record for one anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorStatus {
    pub anchor_id: ContentHash,
    pub state: AnchorState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// In-process anchors are not re-inspected before this time
    pub grace_until: Option<DateTime<Utc>>,
    /// Quorum must be reached before this time
    pub witness_deadline: DateTime<Utc>,
    /// Set once terminal; the record is deleted after this time
    pub expires_at: Option<DateTime<Utc>>,
    /// Most recent error or rejection
    pub last_error: Option<String>,
    pub log_inclusion: LogInclusion,
}

/// Result of re-inspecting one in-process anchor
#[async_trait]
pub trait AnchorInspector: Send + Sync {
    /// Evaluate the witness policy against the proofs received so far
    async fn evaluate(&self, anchor_id: &ContentHash) -> Result<PolicyOutcome, String>;

    /// Called once, by whichever caller moved the anchor to `Completed`
    async fn completed(&self, anchor_id: &ContentHash);

    /// Called once, by whichever caller moved the anchor to `Failed`
    async fn failed(&self, anchor_id: &ContentHash, reason: &str);
}

/// Counts from one pass over in-process anchors
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    pub inspected: usize,
    pub completed: usize,
    pub failed: usize,
    pub waiting: usize,
    /// Anchors whose update failed; retried on the next pass
    pub errors: usize,
}

/// Durable anchor status records
pub struct AnchorStatusStore {
    records: Collection<AnchorStatus>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<TelemetryReporter>,
    /// Delay between re-inspections of an in-process anchor
    grace_period: Duration,
    /// Max witness delay plus clock skew
    witness_timeout: Duration,
    /// Retention of terminal records
    expiry: Duration,
}

impl AnchorStatusStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        telemetry: Arc<TelemetryReporter>,
        grace_period: Duration,
        witness_timeout: Duration,
        expiry: Duration,
    ) -> Self {
        Self {
            records: Collection::new(store, "anchor-status"),
            clock,
            telemetry,
            grace_period,
            witness_timeout,
            expiry,
        }
    }

    /// Create a pending record. Returns `false` without touching the
    /// existing record if the anchor is already known.
    pub async fn add_pending(&self, anchor_id: &ContentHash) -> Result<bool, StatusError> {
        let now = self.clock.now();
        let status = AnchorStatus {
            anchor_id: anchor_id.clone(),
            state: AnchorState::Pending,
            created_at: now,
            updated_at: now,
            grace_until: None,
            witness_deadline: now + self.witness_timeout,
            expires_at: None,
            last_error: None,
            log_inclusion: LogInclusion::NotSubmitted,
        };

        let created = self.records.insert_new(anchor_id.as_str(), &status).await?;
        if created {
            debug!("Anchor {} is pending", anchor_id);
        } else {
            debug!("Anchor {} already has a status record", anchor_id);
        }
        Ok(created)
    }

    /// Current status of an anchor
    pub async fn get_status(&self, anchor_id: &ContentHash) -> Result<Option<AnchorStatus>, StatusError> {
        Ok(self.records.get(anchor_id.as_str()).await?.map(|(status, _)| status))
    }

    /// Apply `change` under compare-and-swap, retrying on lost races.
    /// `change` returns `Ok(false)` to leave the record untouched.
    async fn modify<F>(&self, anchor_id: &ContentHash, change: F) -> Result<Option<AnchorStatus>, StatusError>
    where
        F: Fn(&mut AnchorStatus, DateTime<Utc>) -> Result<bool, StatusError>,
    {
        for _ in 0..MAX_CAS_RETRIES {
            let (mut status, version) = self
                .records
                .get(anchor_id.as_str())
                .await?
                .ok_or_else(|| StatusError::NotFound(anchor_id.to_string()))?;

            let now = self.clock.now();
            if !change(&mut status, now)? {
                return Ok(None);
            }
            status.updated_at = now;

            if self.records.update(anchor_id.as_str(), version, &status).await? {
                return Ok(Some(status));
            }
            debug!("Lost status update race for anchor {}, retrying", anchor_id);
        }

        Err(StatusError::Contended(anchor_id.to_string()))
    }

    fn invalid(status: &AnchorStatus, to: &str) -> StatusError {
        StatusError::InvalidTransition {
            anchor_id: status.anchor_id.to_string(),
            from: status.state.to_string(),
            to: to.to_string(),
        }
    }

    /// `Pending -> InProcess`. Returns `false` if the anchor is already in
    /// process or terminal.
    pub async fn mark_in_process(&self, anchor_id: &ContentHash) -> Result<bool, StatusError> {
        let grace = self.grace_period;
        let updated = self
            .modify(anchor_id, |status, now| match status.state {
                AnchorState::Pending => {
                    status.state = AnchorState::InProcess;
                    status.grace_until = Some(now + grace);
                    Ok(true)
                }
                _ => Ok(false),
            })
            .await?;

        if updated.is_some() {
            info!("Anchor {} is in process", anchor_id);
        }
        Ok(updated.is_some())
    }

    /// `InProcess -> Completed`. Exactly one caller observes `true`.
    pub async fn complete(&self, anchor_id: &ContentHash) -> Result<bool, StatusError> {
        let expiry = self.expiry;
        let updated = self
            .modify(anchor_id, |status, now| match status.state {
                AnchorState::InProcess => {
                    status.state = AnchorState::Completed;
                    status.grace_until = None;
                    status.expires_at = Some(now + expiry);
                    Ok(true)
                }
                AnchorState::Pending => Err(Self::invalid(status, "completed")),
                _ => Ok(false),
            })
            .await?;

        if updated.is_some() {
            info!("Anchor {} completed", anchor_id);
            self.telemetry
                .report_custom("anchor_completed", event_data!("anchor_id" => anchor_id.to_string()));
        }
        Ok(updated.is_some())
    }

    /// Move a non-terminal anchor to `Failed`. Exactly one caller observes
    /// `true`; terminal anchors are left alone.
    pub async fn fail(
        &self,
        anchor_id: &ContentHash,
        reason: FailureReason,
        message: &str,
    ) -> Result<bool, StatusError> {
        let expiry = self.expiry;
        let updated = self
            .modify(anchor_id, |status, now| {
                if status.state.is_terminal() {
                    return Ok(false);
                }
                status.state = AnchorState::Failed(reason.clone());
                status.grace_until = None;
                status.expires_at = Some(now + expiry);
                status.last_error = Some(message.to_string());
                Ok(true)
            })
            .await?;

        if let Some(status) = &updated {
            error!("Anchor {} failed ({}): {}", anchor_id, status.state, message);
            self.telemetry.report_custom(
                "anchor_failed",
                event_data!(
                    "anchor_id" => anchor_id.to_string(),
                    "state" => status.state.to_string(),
                    "reason" => message,
                ),
            );
        }
        Ok(updated.is_some())
    }

    /// Record an error without changing state
    pub async fn record_error(&self, anchor_id: &ContentHash, message: &str) -> Result<(), StatusError> {
        self.modify(anchor_id, |status, _| {
            if status.last_error.as_deref() == Some(message) {
                return Ok(false);
            }
            status.last_error = Some(message.to_string());
            Ok(true)
        })
        .await?;
        Ok(())
    }

    /// Annotate log inclusion progress. Never changes `state`.
    pub async fn set_log_inclusion(
        &self,
        anchor_id: &ContentHash,
        inclusion: LogInclusion,
    ) -> Result<(), StatusError> {
        self.modify(anchor_id, |status, _| {
            if status.log_inclusion == inclusion {
                return Ok(false);
            }
            if let LogInclusion::Failed { reason } = &inclusion {
                status.last_error = Some(reason.clone());
            }
            status.log_inclusion = inclusion.clone();
            Ok(true)
        })
        .await?;
        Ok(())
    }

    /// All status records
    pub async fn list(&self) -> Result<Vec<AnchorStatus>, StatusError> {
        Ok(self
            .records
            .list()
            .await?
            .into_iter()
            .map(|(_, status, _)| status)
            .collect())
    }

    /// Anchors waiting for an inclusion proof
    pub async fn pending_inclusion(&self) -> Result<Vec<AnchorStatus>, StatusError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| matches!(s.log_inclusion, LogInclusion::Pending { .. }))
            .collect())
    }

    async fn defer(&self, anchor_id: &ContentHash) -> Result<(), StatusError> {
        let grace = self.grace_period;
        self.modify(anchor_id, |status, now| {
            if status.state != AnchorState::InProcess {
                return Ok(false);
            }
            status.grace_until = Some(now + grace);
            Ok(true)
        })
        .await?;
        Ok(())
    }

    /// Re-inspect every in-process anchor whose grace period has elapsed.
    /// Satisfied anchors complete, anchors past their witness deadline or
    /// with an unsatisfiable policy fail as expired, the rest wait another
    /// grace period. Pending anchors that were never offered fail once
    /// their witness deadline passes. An error on one anchor is logged and
    /// counted; the pass continues with the next.
    pub async fn check_in_process_anchors(
        &self,
        inspector: &dyn AnchorInspector,
    ) -> Result<CheckSummary, StatusError> {
        let now = self.clock.now();
        let mut summary = CheckSummary::default();

        for status in self.list().await? {
            let due = match status.state {
                AnchorState::Pending => now >= status.witness_deadline,
                AnchorState::InProcess => status.grace_until.map_or(true, |until| now >= until),
                _ => false,
            };
            if !due {
                continue;
            }

            summary.inspected += 1;
            if let Err(e) = self.inspect(&status, now, inspector, &mut summary).await {
                warn!("Could not update anchor {}: {}", status.anchor_id, e);
                summary.errors += 1;
            }
        }

        if summary.inspected > 0 {
            debug!(
                "Checked {} anchors: {} completed, {} failed, {} waiting, {} errors",
                summary.inspected, summary.completed, summary.failed, summary.waiting, summary.errors
            );
        }
        Ok(summary)
    }

    async fn inspect(
        &self,
        status: &AnchorStatus,
        now: DateTime<Utc>,
        inspector: &dyn AnchorInspector,
        summary: &mut CheckSummary,
    ) -> Result<(), StatusError> {
        let anchor_id = &status.anchor_id;

        if status.state == AnchorState::Pending {
            let message = format!(
                "never offered to witnesses by {}",
                status.witness_deadline.to_rfc3339()
            );
            if self.fail(anchor_id, FailureReason::Error, &message).await? {
                inspector.failed(anchor_id, &message).await;
                summary.failed += 1;
            }
            return Ok(());
        }

        match inspector.evaluate(anchor_id).await {
            Ok(PolicyOutcome::Satisfied) => {
                if self.complete(anchor_id).await? {
                    inspector.completed(anchor_id).await;
                    summary.completed += 1;
                }
            }
            Ok(PolicyOutcome::Unsatisfiable(reason)) => {
                let message = format!("witness policy cannot be satisfied: {}", reason);
                if self.fail(anchor_id, FailureReason::Expired, &message).await? {
                    inspector.failed(anchor_id, &message).await;
                    summary.failed += 1;
                }
            }
            Ok(PolicyOutcome::Pending) if now >= status.witness_deadline => {
                let message = format!(
                    "no witness quorum by {}",
                    status.witness_deadline.to_rfc3339()
                );
                if self.fail(anchor_id, FailureReason::Expired, &message).await? {
                    inspector.failed(anchor_id, &message).await;
                    summary.failed += 1;
                }
            }
            Ok(PolicyOutcome::Pending) => {
                self.defer(anchor_id).await?;
                summary.waiting += 1;
            }
            Err(e) => {
                warn!("Could not inspect anchor {}: {}", anchor_id, e);
                self.record_error(anchor_id, &e).await?;
                self.defer(anchor_id).await?;
                summary.waiting += 1;
            }
        }
        Ok(())
    }

    /// Delete terminal records past their expiry
    pub async fn delete_expired(&self) -> Result<usize, StatusError> {
        let now = self.clock.now();
        let mut removed = 0;

        for (id, status, _) in self.records.list().await? {
            let expired = status.state.is_terminal() && status.expires_at.map_or(false, |at| at <= now);
            if expired && self.records.delete(&id).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Removed {} expired anchor status records", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{secs, ManualClock};
    use crate::store::MemoryStore;
    use parking_lot::Mutex;

    struct FixedInspector {
        outcome: PolicyOutcome,
        completed: Mutex<Vec<ContentHash>>,
        failed: Mutex<Vec<ContentHash>>,
    }

    impl FixedInspector {
        fn new(outcome: PolicyOutcome) -> Self {
            Self {
                outcome,
                completed: Mutex::new(Vec::new()),
                failed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AnchorInspector for FixedInspector {
        async fn evaluate(&self, _anchor_id: &ContentHash) -> Result<PolicyOutcome, String> {
            Ok(self.outcome.clone())
        }

        async fn completed(&self, anchor_id: &ContentHash) {
            self.completed.lock().push(anchor_id.clone());
        }

        async fn failed(&self, anchor_id: &ContentHash, _reason: &str) {
            self.failed.lock().push(anchor_id.clone());
        }
    }

    /// Deletes one anchor's record while it is being evaluated, the way
    /// data expiry can between the listing and the update
    struct VanishingInspector {
        store: Arc<dyn KeyValueStore>,
        doomed: ContentHash,
    }

    #[async_trait]
    impl AnchorInspector for VanishingInspector {
        async fn evaluate(&self, anchor_id: &ContentHash) -> Result<PolicyOutcome, String> {
            if *anchor_id == self.doomed {
                let key = format!("anchor-status:{}", anchor_id);
                self.store.delete(&key).await.map_err(|e| e.to_string())?;
            }
            Ok(PolicyOutcome::Satisfied)
        }

        async fn completed(&self, _anchor_id: &ContentHash) {}

        async fn failed(&self, _anchor_id: &ContentHash, _reason: &str) {}
    }

    fn status_store() -> (AnchorStatusStore, Arc<ManualClock>) {
        status_store_on(Arc::new(MemoryStore::new()))
    }

    fn status_store_on(records: Arc<dyn KeyValueStore>) -> (AnchorStatusStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = AnchorStatusStore::new(
            records,
            clock.clone(),
            Arc::new(TelemetryReporter::new(16)),
            secs(30),
            secs(660),
            secs(3600),
        );
        (store, clock)
    }

    #[tokio::test]
    async fn test_lifecycle_to_completed() {
        let (store, _) = status_store();
        let id = ContentHash::compute(b"h1");

        assert!(store.add_pending(&id).await.unwrap());
        assert!(!store.add_pending(&id).await.unwrap());
        assert!(store.mark_in_process(&id).await.unwrap());
        assert!(store.complete(&id).await.unwrap());
        assert!(!store.complete(&id).await.unwrap());

        let status = store.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.state, AnchorState::Completed);
        assert!(status.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_requires_in_process() {
        let (store, _) = status_store();
        let id = ContentHash::compute(b"h1");
        store.add_pending(&id).await.unwrap();

        assert!(matches!(
            store.complete(&id).await,
            Err(StatusError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_terminal_state_is_not_reopened() {
        let (store, _) = status_store();
        let id = ContentHash::compute(b"h1");
        store.add_pending(&id).await.unwrap();
        store.mark_in_process(&id).await.unwrap();
        assert!(store.fail(&id, FailureReason::Expired, "no quorum").await.unwrap());

        assert!(!store.add_pending(&id).await.unwrap());
        assert!(!store.mark_in_process(&id).await.unwrap());
        assert!(!store.complete(&id).await.unwrap());

        let status = store.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.state, AnchorState::Failed(FailureReason::Expired));
        assert_eq!(status.last_error.as_deref(), Some("no quorum"));
    }

    #[tokio::test]
    async fn test_grace_period_delays_inspection() {
        let (store, clock) = status_store();
        let id = ContentHash::compute(b"h1");
        store.add_pending(&id).await.unwrap();
        store.mark_in_process(&id).await.unwrap();

        let inspector = FixedInspector::new(PolicyOutcome::Satisfied);
        let summary = store.check_in_process_anchors(&inspector).await.unwrap();
        assert_eq!(summary.inspected, 0);

        clock.advance(secs(31));
        let summary = store.check_in_process_anchors(&inspector).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(inspector.completed.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unsatisfiable_policy_never_completes() {
        let (store, clock) = status_store();
        let id = ContentHash::compute(b"h1");
        store.add_pending(&id).await.unwrap();
        store.mark_in_process(&id).await.unwrap();
        clock.advance(secs(31));

        let inspector = FixedInspector::new(PolicyOutcome::Unsatisfiable(
            "no system witnesses selected".to_string(),
        ));
        let summary = store.check_in_process_anchors(&inspector).await.unwrap();
        assert_eq!(summary.failed, 1);

        let status = store.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.state, AnchorState::Failed(FailureReason::Expired));
    }

    #[tokio::test]
    async fn test_pending_anchor_expires_after_deadline() {
        let (store, clock) = status_store();
        let id = ContentHash::compute(b"h1");
        store.add_pending(&id).await.unwrap();
        store.mark_in_process(&id).await.unwrap();

        let inspector = FixedInspector::new(PolicyOutcome::Pending);
        clock.advance(secs(600));
        let summary = store.check_in_process_anchors(&inspector).await.unwrap();
        assert_eq!(summary.waiting, 1);

        clock.advance(secs(60));
        let summary = store.check_in_process_anchors(&inspector).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(inspector.failed.lock().as_slice(), &[id.clone()]);
    }

    #[tokio::test]
    async fn test_log_inclusion_does_not_touch_state() {
        let (store, _) = status_store();
        let id = ContentHash::compute(b"h1");
        store.add_pending(&id).await.unwrap();
        store.mark_in_process(&id).await.unwrap();
        store.complete(&id).await.unwrap();

        store
            .set_log_inclusion(&id, LogInclusion::Failed { reason: "timed out".to_string() })
            .await
            .unwrap();

        let status = store.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.state, AnchorState::Completed);
        assert_eq!(status.last_error.as_deref(), Some("timed out"));
    }

    #[tokio::test]
    async fn test_delete_expired_keeps_live_records() {
        let (store, clock) = status_store();
        let done = ContentHash::compute(b"done");
        let live = ContentHash::compute(b"live");
        for id in [&done, &live] {
            store.add_pending(id).await.unwrap();
            store.mark_in_process(id).await.unwrap();
        }
        store.complete(&done).await.unwrap();

        clock.advance(secs(3601));
        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert!(store.get_status(&done).await.unwrap().is_none());
        assert!(store.get_status(&live).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_never_offered_anchor_fails_and_is_cleaned_up() {
        let (store, clock) = status_store();
        let id = ContentHash::compute(b"stuck");
        store.add_pending(&id).await.unwrap();

        let inspector = FixedInspector::new(PolicyOutcome::Satisfied);
        clock.advance(secs(659));
        let summary = store.check_in_process_anchors(&inspector).await.unwrap();
        assert_eq!(summary.inspected, 0);

        clock.advance(secs(1));
        let summary = store.check_in_process_anchors(&inspector).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(inspector.completed.lock().is_empty());
        assert_eq!(inspector.failed.lock().as_slice(), &[id.clone()]);

        let status = store.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.state, AnchorState::Failed(FailureReason::Error));
        assert!(status.last_error.unwrap().contains("never offered"));

        clock.advance(secs(3600));
        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert!(store.get_status(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_failed_update_does_not_stop_the_pass() {
        let records: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let (store, clock) = status_store_on(records.clone());
        let gone = ContentHash::compute(b"gone");
        let kept = ContentHash::compute(b"kept");
        for id in [&gone, &kept] {
            store.add_pending(id).await.unwrap();
            store.mark_in_process(id).await.unwrap();
        }
        clock.advance(secs(31));

        let inspector = VanishingInspector {
            store: records,
            doomed: gone.clone(),
        };
        let summary = store.check_in_process_anchors(&inspector).await.unwrap();
        assert_eq!(summary.inspected, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.completed, 1);

        let status = store.get_status(&kept).await.unwrap().unwrap();
        assert_eq!(status.state, AnchorState::Completed);
        assert!(store.get_status(&gone).await.unwrap().is_none());
    }
}
