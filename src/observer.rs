// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Replays confirmed anchors into the local DID anchor index.
//!
//! Ancestors not yet indexed are fetched with an explicit work list, then
//! applied parents-first. Anchors whose ancestors cannot be fetched yet are
//! parked in a retry queue instead of being dropped.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::anchor::{AnchorGraph, AnchorRecord, ContentHash, GraphError, OperationType};
use crate::clock::Clock;
use crate::store::{Collection, KeyValueStore, StoreError};

/// Attempts at a conditional index write before giving up
const MAX_CAS_RETRIES: usize = 8;

/// Error types for the observer
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("Anchor graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Anchor graph contains a cycle through {0}")]
    Cycle(String),

    #[error("Index entry for {0} is contended; retries exhausted")]
    Contended(String),
}

impl ObserverError {
    /// Failures worth retrying later: missing ancestors and transient I/O
    pub fn is_retryable(&self) -> bool {
        match self {
            ObserverError::Graph(GraphError::NotFound(_)) => true,
            ObserverError::Graph(e) => e.is_transient(),
            ObserverError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// One operation as recorded in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedOperation {
    pub anchor_id: ContentHash,
    pub operation_hash: String,
    pub operation_type: OperationType,
}

/// Index entry for one DID
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DidEntry {
    latest: Option<ContentHash>,
    operations: Vec<IndexedOperation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedMarker {
    indexed_at: DateTime<Utc>,
}

/// Per-DID anchor index
#[async_trait]
pub trait DidAnchorIndex: Send + Sync {
    /// Most recent anchor applied for a DID
    async fn latest_anchor(&self, did: &str) -> Result<Option<ContentHash>, ObserverError>;

    async fn is_indexed(&self, anchor_id: &ContentHash) -> Result<bool, ObserverError>;

    /// Apply an anchor's operations. Returns `false` if it was already
    /// applied.
    async fn apply(&self, anchor_id: &ContentHash, record: &AnchorRecord) -> Result<bool, ObserverError>;

    /// Operations applied for a DID, oldest first
    async fn operations(&self, did: &str) -> Result<Vec<IndexedOperation>, ObserverError>;
}

/// [`DidAnchorIndex`] over the key-value store
pub struct KvDidAnchorIndex {
    entries: Collection<DidEntry>,
    indexed: Collection<IndexedMarker>,
    clock: Arc<dyn Clock>,
}

impl KvDidAnchorIndex {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Collection::new(store.clone(), "did-index"),
            indexed: Collection::new(store, "anchor-indexed"),
            clock,
        }
    }

    async fn apply_to_did(&self, did: &str, anchor_id: &ContentHash, record: &AnchorRecord) -> Result<(), ObserverError> {
        for _ in 0..MAX_CAS_RETRIES {
            let existing = self.entries.get(did).await?;
            let (mut entry, version) = match existing {
                Some((entry, version)) => (entry, Some(version)),
                None => (DidEntry::default(), None),
            };

            // A crash between the DID writes and the marker can replay an anchor
            if entry.operations.iter().any(|op| op.anchor_id == *anchor_id) {
                return Ok(());
            }

            entry.operations.extend(record.operations_for(did).map(|op| IndexedOperation {
                anchor_id: anchor_id.clone(),
                operation_hash: op.operation_hash.clone(),
                operation_type: op.operation_type,
            }));
            entry.latest = Some(anchor_id.clone());

            let written = match version {
                Some(version) => self.entries.update(did, version, &entry).await?,
                None => self.entries.insert_new(did, &entry).await?,
            };
            if written {
                return Ok(());
            }
        }

        Err(ObserverError::Contended(did.to_string()))
    }
}

#[async_trait]
impl DidAnchorIndex for KvDidAnchorIndex {
    async fn latest_anchor(&self, did: &str) -> Result<Option<ContentHash>, ObserverError> {
        Ok(self.entries.get(did).await?.and_then(|(entry, _)| entry.latest))
    }

    async fn is_indexed(&self, anchor_id: &ContentHash) -> Result<bool, ObserverError> {
        Ok(self.indexed.get(anchor_id.as_str()).await?.is_some())
    }

    async fn apply(&self, anchor_id: &ContentHash, record: &AnchorRecord) -> Result<bool, ObserverError> {
        if self.is_indexed(anchor_id).await? {
            return Ok(false);
        }

        for did in record.dids() {
            self.apply_to_did(did, anchor_id, record).await?;
        }

        let marker = IndexedMarker {
            indexed_at: self.clock.now(),
        };
        Ok(self.indexed.insert_new(anchor_id.as_str(), &marker).await?)
    }

    async fn operations(&self, did: &str) -> Result<Vec<IndexedOperation>, ObserverError> {
        Ok(self
            .entries
            .get(did)
            .await?
            .map(|(entry, _)| entry.operations)
            .unwrap_or_default())
    }
}

/// Result of observing one anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// The anchor and `applied` anchors in total (ancestors included) were indexed
    Indexed { applied: usize },
    /// Nothing to do
    AlreadyIndexed,
    /// Ancestors are not available yet; parked for retry
    Queued(String),
}

/// Anchor waiting for its ancestors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAnchor {
    pub anchor_id: ContentHash,
    pub origin: Option<String>,
    pub attempts: u32,
    pub last_error: String,
    pub queued_at: DateTime<Utc>,
}

/// Counts from one retry pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetrySummary {
    pub indexed: usize,
    pub still_pending: usize,
    pub dropped: usize,
}

/// Feeds anchors into a [`DidAnchorIndex`]
pub struct Observer {
    graph: Arc<AnchorGraph>,
    index: Arc<dyn DidAnchorIndex>,
    pending: Collection<PendingAnchor>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl Observer {
    pub fn new(
        graph: Arc<AnchorGraph>,
        index: Arc<dyn DidAnchorIndex>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
    ) -> Self {
        Self {
            graph,
            index,
            pending: Collection::new(store, "observer-pending"),
            clock,
            max_attempts,
        }
    }

    pub fn index(&self) -> &Arc<dyn DidAnchorIndex> {
        &self.index
    }

    /// Fetch every not-yet-indexed anchor reachable from `anchor_id`
    async fn collect_unindexed(
        &self,
        anchor_id: &ContentHash,
        origin: Option<&str>,
    ) -> Result<BTreeMap<ContentHash, AnchorRecord>, ObserverError> {
        let mut work: Vec<(ContentHash, Option<String>)> =
            vec![(anchor_id.clone(), origin.map(str::to_string))];
        let mut visited: HashSet<ContentHash> = HashSet::new();
        let mut fetched = BTreeMap::new();

        while let Some((id, hint)) = work.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if self.index.is_indexed(&id).await? {
                continue;
            }

            let record = self.graph.read_from(&id, hint.as_deref()).await?;
            for parent in record.parent_ids() {
                if !visited.contains(parent) {
                    // The child's author referenced the parent, so it can serve it
                    work.push((parent.clone(), Some(record.origin.clone())));
                }
            }
            fetched.insert(id, record);
        }

        Ok(fetched)
    }

    /// Order anchors so every parent comes before its children
    fn ancestors_first(fetched: &BTreeMap<ContentHash, AnchorRecord>) -> Result<Vec<ContentHash>, ObserverError> {
        let mut waiting_on: BTreeMap<&ContentHash, usize> = BTreeMap::new();
        let mut children: BTreeMap<&ContentHash, Vec<&ContentHash>> = BTreeMap::new();

        for (id, record) in fetched {
            let parents: Vec<&ContentHash> = record
                .parent_ids()
                .into_iter()
                .filter(|p| fetched.contains_key(*p))
                .collect();
            waiting_on.insert(id, parents.len());
            for parent in parents {
                children.entry(parent).or_default().push(id);
            }
        }

        let mut ready: VecDeque<&ContentHash> = waiting_on
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(fetched.len());

        while let Some(id) = ready.pop_front() {
            order.push(id.clone());
            for child in children.get(id).into_iter().flatten() {
                if let Some(count) = waiting_on.get_mut(*child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*child);
                    }
                }
            }
        }

        if order.len() != fetched.len() {
            let stuck = waiting_on
                .iter()
                .find(|(_, count)| **count > 0)
                .map(|(id, _)| id.to_string())
                .unwrap_or_default();
            return Err(ObserverError::Cycle(stuck));
        }
        Ok(order)
    }

    async fn index_anchor(&self, anchor_id: &ContentHash, origin: Option<&str>) -> Result<ObserveOutcome, ObserverError> {
        let fetched = self.collect_unindexed(anchor_id, origin).await?;
        if fetched.is_empty() {
            return Ok(ObserveOutcome::AlreadyIndexed);
        }

        let mut applied = 0;
        for id in Self::ancestors_first(&fetched)? {
            if let Some(record) = fetched.get(&id) {
                if self.index.apply(&id, record).await? {
                    debug!("Indexed anchor {} ({} operations)", id, record.operations.len());
                    applied += 1;
                }
            }
        }

        if applied == 0 {
            return Ok(ObserveOutcome::AlreadyIndexed);
        }
        info!("Observed anchor {}: {} anchors indexed", anchor_id, applied);
        Ok(ObserveOutcome::Indexed { applied })
    }

    async fn enqueue(&self, anchor_id: &ContentHash, origin: Option<&str>, error: &ObserverError) -> Result<(), ObserverError> {
        let entry = PendingAnchor {
            anchor_id: anchor_id.clone(),
            origin: origin.map(str::to_string),
            attempts: 1,
            last_error: error.to_string(),
            queued_at: self.clock.now(),
        };
        if self.pending.insert_new(anchor_id.as_str(), &entry).await? {
            warn!("Anchor {} queued for retry: {}", anchor_id, error);
        }
        Ok(())
    }

    /// Index a confirmed anchor and any missing ancestors. Safe to call
    /// repeatedly with the same anchor.
    pub async fn observe(&self, anchor_id: &ContentHash, origin: Option<&str>) -> Result<ObserveOutcome, ObserverError> {
        match self.index_anchor(anchor_id, origin).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_retryable() => {
                self.enqueue(anchor_id, origin, &e).await?;
                Ok(ObserveOutcome::Queued(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Anchors parked for retry
    pub async fn pending(&self) -> Result<Vec<PendingAnchor>, ObserverError> {
        Ok(self
            .pending
            .list()
            .await?
            .into_iter()
            .map(|(_, entry, _)| entry)
            .collect())
    }

    /// Retry parked anchors, dropping those that used up their attempts
    pub async fn retry_pending(&self) -> Result<RetrySummary, ObserverError> {
        let mut summary = RetrySummary::default();

        for (key, mut entry, version) in self.pending.list().await? {
            match self.index_anchor(&entry.anchor_id, entry.origin.as_deref()).await {
                Ok(_) => {
                    self.pending.delete(&key).await?;
                    summary.indexed += 1;
                }
                Err(e) if e.is_retryable() && entry.attempts + 1 < self.max_attempts => {
                    entry.attempts += 1;
                    entry.last_error = e.to_string();
                    self.pending.update(&key, version, &entry).await?;
                    summary.still_pending += 1;
                }
                Err(e) => {
                    error!(
                        "Dropping anchor {} after {} attempts: {}",
                        entry.anchor_id,
                        entry.attempts + 1,
                        e
                    );
                    self.pending.delete(&key).await?;
                    summary.dropped += 1;
                }
            }
        }

        Ok(summary)
    }
}
