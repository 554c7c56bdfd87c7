// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Anchor writer.
//!
//! Drives one batch through `Building -> Offering -> AwaitingWitnesses ->
//! Submitting -> Published`. Waiting for witnesses holds no task: proofs
//! arriving through the inbox and the periodic status check both
//! re-evaluate the policy, and whichever moves the status record to
//! `Completed` first carries the anchor through submission and publishing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::anchor::{AnchorGraph, AnchorRecord, ContentHash, GraphError, OperationRef};
use crate::broker::{Message, MessageBroker, ANCHORS_TOPIC};
use crate::clock::{secs, Clock};
use crate::config::OrbConfig;
use crate::federation::{Activity, FederationError, Outbox, PeerStore};
use crate::monitoring::{LogEndpointRegistry, MonitorError};
use crate::observer::{Observer, ObserverError};
use crate::status::{
    AnchorInspector, AnchorState, AnchorStatus, AnchorStatusStore, FailureReason, LogInclusion, StatusError,
};
use crate::witness::{
    verify_proof, LocalWitness, PolicyError, PolicyOutcome, PolicyProvider, ProofStoreError, SignerError,
    StoreOutcome, Witness, WitnessProof, WitnessProofStore, WitnessSet,
};

/// Error types for the anchor writer
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Anchor graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    #[error("Proof store error: {0}")]
    ProofStore(#[from] ProofStoreError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Observer error: {0}")]
    Observer(#[from] ObserverError),

    #[error("Log error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Invalid witness proof: {0}")]
    InvalidProof(#[from] SignerError),

    #[error("Federation error: {0}")]
    Federation(String),

    #[error("Timed out waiting for anchor {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Local witness selected but no signing key is configured")]
    NoSigningKey,
}

impl From<FederationError> for WriterError {
    fn from(e: FederationError) -> Self {
        WriterError::Federation(e.to_string())
    }
}

impl WriterError {
    pub fn is_transient(&self) -> bool {
        match self {
            WriterError::Graph(e) => e.is_transient(),
            WriterError::Status(StatusError::Contended(_)) => true,
            WriterError::Status(StatusError::Storage(e)) => e.is_transient(),
            WriterError::ProofStore(ProofStoreError::Storage(e)) => e.is_transient(),
            WriterError::Policy(PolicyError::Store(_)) => true,
            WriterError::Observer(e) => e.is_retryable(),
            WriterError::Monitor(e) => e.is_transient(),
            WriterError::Federation(_) | WriterError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Where an anchor is in the write pipeline on this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStage {
    Building,
    Offering,
    AwaitingWitnesses,
    Submitting,
}

impl fmt::Display for WriterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriterStage::Building => write!(f, "building"),
            WriterStage::Offering => write!(f, "offering"),
            WriterStage::AwaitingWitnesses => write!(f, "awaiting-witnesses"),
            WriterStage::Submitting => write!(f, "submitting"),
        }
    }
}

/// A completed anchor, published on the anchors topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorNotice {
    pub anchor_id: ContentHash,
    pub origin: Option<String>,
}

/// Final result reported to callers waiting on an anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorOutcome {
    Published,
    Failed(String),
}

/// What happened to an incoming witness proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofDisposition {
    /// Not counted, with the reason
    Ignored(String),
    /// Already stored
    Duplicate,
    /// Stored; quorum not reached yet
    Recorded,
    /// Stored and completed the anchor
    Completed,
}

/// Witness selection and identity settings
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub node_id: String,
    pub sign_with_local_witness: bool,
    pub system_witnesses: Vec<String>,
    pub batch_witnesses: Vec<String>,
    pub max_batch_witnesses: usize,
    /// Lifetime of an offer
    pub max_witness_delay: Duration,
}

impl WriterSettings {
    pub fn from_config(config: &OrbConfig) -> Self {
        Self {
            node_id: config.node.node_id.clone(),
            sign_with_local_witness: config.witness.sign_with_local_witness,
            system_witnesses: config.witness.system_witnesses.clone(),
            batch_witnesses: config.witness.batch_witnesses.clone(),
            max_batch_witnesses: config.witness.max_batch_witnesses,
            max_witness_delay: secs(config.witness.max_witness_delay_secs),
        }
    }
}

/// Builds anchors, collects witness proofs and publishes completed anchors
pub struct AnchorWriter {
    settings: WriterSettings,
    graph: Arc<AnchorGraph>,
    observer: Arc<Observer>,
    policy: Arc<PolicyProvider>,
    proofs: Arc<WitnessProofStore>,
    status: Arc<AnchorStatusStore>,
    logs: Arc<LogEndpointRegistry>,
    peers: Arc<PeerStore>,
    outbox: Arc<dyn Outbox>,
    clock: Arc<dyn Clock>,
    local_witness: Option<Arc<LocalWitness>>,
    anchor_topic: Option<Arc<dyn MessageBroker>>,
    stages: DashMap<ContentHash, WriterStage>,
    waiters: DashMap<ContentHash, Vec<oneshot::Sender<AnchorOutcome>>>,
}

impl AnchorWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: WriterSettings,
        graph: Arc<AnchorGraph>,
        observer: Arc<Observer>,
        policy: Arc<PolicyProvider>,
        proofs: Arc<WitnessProofStore>,
        status: Arc<AnchorStatusStore>,
        logs: Arc<LogEndpointRegistry>,
        peers: Arc<PeerStore>,
        outbox: Arc<dyn Outbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            graph,
            observer,
            policy,
            proofs,
            status,
            logs,
            peers,
            outbox,
            clock,
            local_witness: None,
            anchor_topic: None,
            stages: DashMap::new(),
            waiters: DashMap::new(),
        }
    }

    /// Sign as the local system witness
    pub fn with_local_witness(mut self, witness: Arc<LocalWitness>) -> Self {
        self.local_witness = Some(witness);
        self
    }

    /// Hand completed anchors to the anchors topic; its subscribers index
    /// and announce them with broker redelivery
    pub fn with_anchor_topic(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.anchor_topic = Some(broker);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.settings.node_id
    }

    /// Pipeline stage of an anchor this node is still working on
    pub fn stage(&self, anchor_id: &ContentHash) -> Option<WriterStage> {
        self.stages.get(anchor_id).map(|stage| *stage)
    }

    fn set_stage(&self, anchor_id: &ContentHash, stage: WriterStage) {
        debug!("Anchor {} stage: {}", anchor_id, stage);
        self.stages.insert(anchor_id.clone(), stage);
    }

    /// Anchor a batch of operations. Returns once the anchor has been
    /// offered to its witnesses, or completed if the policy is already
    /// satisfied.
    pub async fn write_anchor(&self, operations: Vec<OperationRef>) -> Result<ContentHash, WriterError> {
        let dids: BTreeSet<String> = operations.iter().map(|op| op.did.clone()).collect();
        let mut parents = BTreeMap::new();
        for did in dids {
            if let Some(latest) = self.observer.index().latest_anchor(&did).await? {
                parents.insert(did, latest);
            }
        }

        let (anchor_id, record) = self
            .graph
            .build(parents, operations, &self.settings.node_id)
            .await?;
        self.set_stage(&anchor_id, WriterStage::Building);

        if !self.status.add_pending(&anchor_id).await? {
            let state = self.status.get_status(&anchor_id).await?.map(|s| s.state);
            if state.as_ref().map_or(false, |s| *s != AnchorState::Pending) {
                debug!("Anchor {} is already {:?}; not offering again", anchor_id, state);
                self.stages.remove(&anchor_id);
                return Ok(anchor_id);
            }
        }

        if let Err(e) = self.offer(&anchor_id, &record).await {
            let message = format!("offering failed: {}", e);
            if self.status.fail(&anchor_id, FailureReason::Error, &message).await? {
                self.finish(&anchor_id, AnchorOutcome::Failed(message));
            }
            return Err(e);
        }

        self.try_complete(&anchor_id).await?;
        Ok(anchor_id)
    }

    /// Anchor a batch and wait for it to be published or to fail
    pub async fn anchor_and_wait(
        &self,
        operations: Vec<OperationRef>,
        timeout: StdDuration,
    ) -> Result<(ContentHash, AnchorOutcome), WriterError> {
        let anchor_id = self.write_anchor(operations).await?;
        let outcome = self.wait_for_outcome(&anchor_id, timeout).await?;
        Ok((anchor_id, outcome))
    }

    /// Witnesses for a new anchor: system witnesses (the local node first
    /// when it signs), then batch witnesses drawn from the origins of the
    /// parent anchors, accepted witness peers and configured peers.
    async fn select_witnesses(&self, record: &AnchorRecord) -> Result<WitnessSet, WriterError> {
        let node_id = &self.settings.node_id;
        let mut selected = WitnessSet::default();

        if self.settings.sign_with_local_witness {
            selected.insert(Witness::local(node_id));
        }
        for id in &self.settings.system_witnesses {
            if id != node_id {
                selected.insert(Witness::system(id));
            }
        }

        let mut candidates = Vec::new();
        for parent in record.parent_ids() {
            match self.graph.read(parent).await {
                Ok(parent_record) => candidates.push(parent_record.origin),
                Err(e) => warn!("Cannot read parent anchor {}: {}", parent, e),
            }
        }
        candidates.extend(self.peers.witnesses().await?);
        candidates.extend(self.settings.batch_witnesses.iter().cloned());

        let mut batch = 0;
        for candidate in candidates {
            if batch >= self.settings.max_batch_witnesses {
                break;
            }
            if candidate == *node_id || selected.contains(&candidate) {
                continue;
            }
            selected.insert(Witness::batch(&candidate));
            batch += 1;
        }

        Ok(selected)
    }

    async fn offer(&self, anchor_id: &ContentHash, record: &AnchorRecord) -> Result<(), WriterError> {
        self.set_stage(anchor_id, WriterStage::Offering);

        let witnesses = self.select_witnesses(record).await?;
        self.proofs.put_witnesses(anchor_id, &witnesses).await?;
        self.status.mark_in_process(anchor_id).await?;
        info!("Anchor {} offered to {} witnesses", anchor_id, witnesses.len());

        let now = self.clock.now();
        let expires = now + self.settings.max_witness_delay;

        for witness in witnesses.iter() {
            if witness.is_local {
                self.sign_locally(anchor_id).await?;
                continue;
            }

            let offer = Activity::offer(
                &self.settings.node_id,
                &witness.id,
                anchor_id,
                &record.origin,
                now,
                expires,
            );
            if let Err(e) = self.outbox.send(&offer).await {
                // The status check expires the anchor if the witness never answers
                warn!("Offer of {} to {} failed: {}", anchor_id, witness.id, e);
                self.status
                    .record_error(anchor_id, &format!("offer to {} failed: {}", witness.id, e))
                    .await?;
            }
        }

        self.set_stage(anchor_id, WriterStage::AwaitingWitnesses);
        Ok(())
    }

    async fn sign_locally(&self, anchor_id: &ContentHash) -> Result<(), WriterError> {
        let signer = self.local_witness.as_ref().ok_or(WriterError::NoSigningKey)?;

        match self.proofs.store_proof(&signer.witness(anchor_id)).await {
            Ok(_) => Ok(()),
            // Signed before a restart; the first proof stands
            Err(ProofStoreError::Conflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Evaluate the witness policy against the proofs received so far
    pub async fn evaluate(&self, anchor_id: &ContentHash) -> Result<PolicyOutcome, WriterError> {
        let selected = match self.proofs.witnesses(anchor_id).await? {
            Some(selected) => selected,
            None => return Ok(PolicyOutcome::Unsatisfiable("no witnesses were selected".to_string())),
        };
        let proofs = self.proofs.proofs(anchor_id).await?;
        let policy = self.policy.policy().await?;
        Ok(policy.outcome(&proofs, &selected))
    }

    /// Complete the anchor if the policy is satisfied. `true` if this call
    /// completed it.
    async fn try_complete(&self, anchor_id: &ContentHash) -> Result<bool, WriterError> {
        match self.evaluate(anchor_id).await? {
            PolicyOutcome::Satisfied => {
                if self.status.complete(anchor_id).await? {
                    self.publish(anchor_id).await;
                    return Ok(true);
                }
                Ok(false)
            }
            PolicyOutcome::Unsatisfiable(reason) => {
                let message = format!("witness policy cannot be satisfied: {}", reason);
                if self.status.fail(anchor_id, FailureReason::Expired, &message).await? {
                    self.finish(anchor_id, AnchorOutcome::Failed(message));
                }
                Ok(false)
            }
            PolicyOutcome::Pending => Ok(false),
        }
    }

    /// Count a proof returned by a witness
    pub async fn handle_witness_proof(&self, proof: &WitnessProof) -> Result<ProofDisposition, WriterError> {
        let anchor_id = &proof.anchor_id;

        let status = match self.status.get_status(anchor_id).await? {
            Some(status) => status,
            None => return Ok(ProofDisposition::Ignored(format!("unknown anchor {}", anchor_id))),
        };
        if status.state.is_terminal() {
            debug!("Ignoring proof from {} for {} anchor {}", proof.witness, status.state, anchor_id);
            return Ok(ProofDisposition::Ignored(format!("anchor is {}", status.state)));
        }

        let selected = self.proofs.witnesses(anchor_id).await?;
        if !selected.map_or(false, |s| s.contains(&proof.witness)) {
            warn!("Ignoring proof for {} from unselected witness {}", anchor_id, proof.witness);
            return Ok(ProofDisposition::Ignored(format!("{} was not selected", proof.witness)));
        }

        if let Some(key) = self.peers.key(&proof.witness).await? {
            verify_proof(proof, &key)?;
        }

        if self.proofs.store_proof(proof).await? == StoreOutcome::Duplicate {
            return Ok(ProofDisposition::Duplicate);
        }
        info!("Received proof from {} for anchor {}", proof.witness, anchor_id);

        // Still offering; write_anchor evaluates once the offers are out
        if status.state != AnchorState::InProcess {
            return Ok(ProofDisposition::Recorded);
        }

        if self.try_complete(anchor_id).await? {
            Ok(ProofDisposition::Completed)
        } else {
            Ok(ProofDisposition::Recorded)
        }
    }

    async fn submit_to_log(&self, record: &AnchorRecord) -> Result<LogInclusion, WriterError> {
        let entry = record
            .canonical_bytes()
            .map_err(|e| WriterError::Serialization(e.to_string()))?;

        let endpoints = self.logs.active().await?;
        if endpoints.is_empty() {
            return Ok(LogInclusion::NotSubmitted);
        }

        let mut failures = Vec::new();
        for endpoint in endpoints {
            match endpoint.client.add_chain(&entry).await {
                Ok(sct) => {
                    return Ok(LogInclusion::Pending {
                        endpoint: endpoint.name().to_string(),
                        leaf_hash: sct.leaf_hash,
                        submitted_at: self.clock.now(),
                    })
                }
                Err(e) => {
                    warn!("Submission to log {} failed: {}", endpoint.name(), e);
                    failures.push(format!("{}: {}", endpoint.name(), e));
                }
            }
        }

        Ok(LogInclusion::Failed {
            reason: format!("every log rejected the anchor ({})", failures.join("; ")),
        })
    }

    async fn submit_and_index(&self, anchor_id: &ContentHash) -> Result<AnchorRecord, WriterError> {
        let record = self.graph.read(anchor_id).await?;

        let inclusion = self.submit_to_log(&record).await?;
        self.status.set_log_inclusion(anchor_id, inclusion).await?;

        self.observer.observe(anchor_id, Some(&record.origin)).await?;
        Ok(record)
    }

    async fn announce(&self, anchor_id: &ContentHash, origin: &str) -> Result<(), WriterError> {
        let followers = self.peers.followers().await?;
        if followers.is_empty() {
            return Ok(());
        }

        let count = followers.len();
        let announce = Activity::announce(&self.settings.node_id, followers, anchor_id, origin, self.clock.now());
        self.outbox.send(&announce).await?;
        debug!("Announced anchor {} to {} followers", anchor_id, count);
        Ok(())
    }

    /// Everything after `Completed`: log submission, local indexing and
    /// the announcement. Failures here are recorded on the status but do
    /// not undo the completion.
    async fn publish(&self, anchor_id: &ContentHash) {
        self.set_stage(anchor_id, WriterStage::Submitting);

        match self.submit_and_index(anchor_id).await {
            Ok(record) => self.hand_off(anchor_id, &record.origin).await,
            Err(e) => {
                error!("Submitting anchor {} failed: {}", anchor_id, e);
                self.note_error(anchor_id, &format!("submission failed: {}", e)).await;
            }
        }

        info!("Anchor {} published", anchor_id);
        self.finish(anchor_id, AnchorOutcome::Published);
    }

    /// Put the anchor on the anchors topic, announcing directly when no
    /// topic is attached or it cannot take the notice
    async fn hand_off(&self, anchor_id: &ContentHash, origin: &str) {
        if let Some(broker) = &self.anchor_topic {
            let notice = AnchorNotice {
                anchor_id: anchor_id.clone(),
                origin: Some(origin.to_string()),
            };
            let sent = match Message::json(ANCHORS_TOPIC, &notice) {
                Ok(message) => broker.publish(message).await,
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => {
                    debug!("Anchor {} queued on {}", anchor_id, ANCHORS_TOPIC);
                    return;
                }
                Err(e) => warn!("Queueing anchor {} failed, announcing directly: {}", anchor_id, e),
            }
        }

        if let Err(e) = self.announce(anchor_id, origin).await {
            warn!("Announcing anchor {} failed: {}", anchor_id, e);
            self.note_error(anchor_id, &format!("announce failed: {}", e)).await;
        }
    }

    /// Handle a notice from the anchors topic: index it, and announce it to
    /// followers if this node wrote it. Safe to repeat.
    pub async fn handle_anchor_notice(&self, notice: &AnchorNotice) -> Result<(), WriterError> {
        self.observer
            .observe(&notice.anchor_id, notice.origin.as_deref())
            .await?;

        if let Some(origin) = notice.origin.as_deref().filter(|o| *o == self.settings.node_id) {
            self.announce(&notice.anchor_id, origin).await?;
        }
        Ok(())
    }

    async fn note_error(&self, anchor_id: &ContentHash, message: &str) {
        if let Err(e) = self.status.record_error(anchor_id, message).await {
            warn!("Could not record error on anchor {}: {}", anchor_id, e);
        }
    }

    fn finish(&self, anchor_id: &ContentHash, outcome: AnchorOutcome) {
        self.stages.remove(anchor_id);
        if let Some((_, waiters)) = self.waiters.remove(anchor_id) {
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    /// Outcome from the status record, unless this node is still
    /// publishing the anchor
    async fn settled(&self, anchor_id: &ContentHash) -> Result<Option<AnchorOutcome>, WriterError> {
        if self.stage(anchor_id) == Some(WriterStage::Submitting) {
            return Ok(None);
        }

        Ok(self.status.get_status(anchor_id).await?.and_then(outcome_of))
    }

    /// Drop local tracking of anchors another node has settled, waking
    /// anyone waiting on them. Returns how many were dropped.
    pub async fn sweep_stages(&self) -> usize {
        let awaiting: Vec<ContentHash> = self
            .stages
            .iter()
            .filter(|entry| *entry.value() == WriterStage::AwaitingWitnesses)
            .map(|entry| entry.key().clone())
            .collect();

        let mut swept = 0;
        for anchor_id in awaiting {
            let outcome = match self.status.get_status(&anchor_id).await {
                Ok(Some(status)) => match outcome_of(status) {
                    Some(outcome) => outcome,
                    None => continue,
                },
                Ok(None) => AnchorOutcome::Failed(format!("status of {} has expired", anchor_id)),
                Err(e) => {
                    warn!("Could not read status of anchor {}: {}", anchor_id, e);
                    continue;
                }
            };
            debug!("Anchor {} was settled elsewhere: {:?}", anchor_id, outcome);
            self.finish(&anchor_id, outcome);
            swept += 1;
        }
        swept
    }

    /// Wait until the anchor is published or fails. An anchor completed on
    /// another node is picked up from the status store when the wait ends.
    pub async fn wait_for_outcome(
        &self,
        anchor_id: &ContentHash,
        timeout: StdDuration,
    ) -> Result<AnchorOutcome, WriterError> {
        let (sender, receiver) = oneshot::channel();
        self.waiters.entry(anchor_id.clone()).or_default().push(sender);

        let outcome = match self.settled(anchor_id).await? {
            Some(outcome) => Some(outcome),
            None => match tokio::time::timeout(timeout, receiver).await {
                Ok(Ok(outcome)) => Some(outcome),
                _ => self.settled(anchor_id).await?,
            },
        };

        self.waiters
            .remove_if(anchor_id, |_, waiters| waiters.iter().all(|w| w.is_closed()));

        outcome.ok_or_else(|| WriterError::Timeout(anchor_id.to_string()))
    }
}

fn outcome_of(status: AnchorStatus) -> Option<AnchorOutcome> {
    match status.state {
        AnchorState::Completed => Some(AnchorOutcome::Published),
        AnchorState::Failed(_) => Some(AnchorOutcome::Failed(
            status.last_error.unwrap_or_else(|| status.state.to_string()),
        )),
        _ => None,
    }
}

#[async_trait]
impl AnchorInspector for AnchorWriter {
    async fn evaluate(&self, anchor_id: &ContentHash) -> Result<PolicyOutcome, String> {
        AnchorWriter::evaluate(self, anchor_id).await.map_err(|e| e.to_string())
    }

    async fn completed(&self, anchor_id: &ContentHash) {
        self.publish(anchor_id).await;
    }

    async fn failed(&self, anchor_id: &ContentHash, reason: &str) {
        self.finish(anchor_id, AnchorOutcome::Failed(reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::OperationType;
    use crate::cas::{CasResolver, LocalCas};
    use crate::clock::ManualClock;
    use crate::federation::{ActivityObject, ActivityType, MemoryOutbox};
    use crate::monitoring::LogEndpoint;
    use crate::observer::KvDidAnchorIndex;
    use crate::store::{KeyValueStore, MemoryStore};
    use crate::telemetry::TelemetryReporter;
    use crate::translog::MemoryLog;

    const NODE: &str = "https://orb.a.example";

    struct Fixture {
        clock: Arc<ManualClock>,
        status: Arc<AnchorStatusStore>,
        outbox: Arc<MemoryOutbox>,
        observer: Arc<Observer>,
        writer: AnchorWriter,
    }

    fn fixture(policy: &str, sign_locally: bool, batch_witnesses: &[&str], with_log: bool) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let telemetry = Arc::new(TelemetryReporter::new(16));

        let cas = Arc::new(CasResolver::new(Arc::new(LocalCas::new(store.clone())), 16));
        let graph = Arc::new(AnchorGraph::new(cas, clock.clone()));
        let index = Arc::new(KvDidAnchorIndex::new(store.clone(), clock.clone()));
        let observer = Arc::new(Observer::new(graph.clone(), index, store.clone(), clock.clone(), 3));
        let policy = Arc::new(PolicyProvider::new(store.clone(), policy, secs(60), clock.clone()));
        let proofs = Arc::new(WitnessProofStore::new(store.clone(), clock.clone(), secs(86_400)));
        let status = Arc::new(AnchorStatusStore::new(
            store.clone(),
            clock.clone(),
            telemetry,
            secs(30),
            secs(660),
            secs(86_400),
        ));

        let mut endpoints = Vec::new();
        if with_log {
            let log = Arc::new(MemoryLog::new("memory://log", &[5u8; 32], clock.clone()));
            endpoints.push(LogEndpoint::new(log.clone(), Some(log.verifying_key())));
        }
        let logs = Arc::new(LogEndpointRegistry::new(store.clone(), endpoints));
        let peers = Arc::new(PeerStore::new(store, clock.clone()));
        let outbox = Arc::new(MemoryOutbox::new());

        let settings = WriterSettings {
            node_id: NODE.to_string(),
            sign_with_local_witness: sign_locally,
            system_witnesses: Vec::new(),
            batch_witnesses: batch_witnesses.iter().map(|w| w.to_string()).collect(),
            max_batch_witnesses: 3,
            max_witness_delay: secs(600),
        };
        let writer = AnchorWriter::new(
            settings,
            graph,
            observer.clone(),
            policy,
            proofs,
            status.clone(),
            logs,
            peers,
            outbox.clone(),
            clock.clone(),
        )
        .with_local_witness(Arc::new(LocalWitness::new(NODE, &[1u8; 32], clock.clone())));

        Fixture {
            clock,
            status,
            outbox,
            observer,
            writer,
        }
    }

    fn ops(did: &str, n: u32) -> Vec<OperationRef> {
        (0..n)
            .map(|i| OperationRef::new(did, &format!("{}-op-{}", did, i), OperationType::Update))
            .collect()
    }

    fn witness_proof(witness: &str, seed: u8, anchor_id: &ContentHash, clock: &Arc<ManualClock>) -> WitnessProof {
        LocalWitness::new(witness, &[seed; 32], clock.clone()).witness(anchor_id)
    }

    #[tokio::test]
    async fn test_single_node_completes_immediately() {
        let f = fixture("MinPercent(100,system)", true, &[], true);

        let (anchor_id, outcome) = f
            .writer
            .anchor_and_wait(ops("did:orb:abc", 3), StdDuration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, AnchorOutcome::Published);

        let status = f.status.get_status(&anchor_id).await.unwrap().unwrap();
        assert_eq!(status.state, AnchorState::Completed);
        assert!(matches!(status.log_inclusion, LogInclusion::Pending { .. }));
        assert_eq!(f.observer.index().operations("did:orb:abc").await.unwrap().len(), 3);
        assert!(f.outbox.sent().is_empty());
        assert!(f.writer.stage(&anchor_id).is_none());
    }

    #[tokio::test]
    async fn test_batch_quorum_completes_on_first_of_two() {
        let f = fixture("MinPercent(50,batch)", false, &["https://w1", "https://w2"], false);

        let anchor_id = f.writer.write_anchor(ops("did:orb:abc", 3)).await.unwrap();
        assert_eq!(f.writer.stage(&anchor_id), Some(WriterStage::AwaitingWitnesses));

        let offers = f.outbox.sent_of_type(ActivityType::Offer);
        assert_eq!(offers.len(), 2);
        assert!(matches!(offers[0].object, ActivityObject::Anchor { anchor_id: ref id, .. } if *id == anchor_id));

        let disposition = f
            .writer
            .handle_witness_proof(&witness_proof("https://w1", 11, &anchor_id, &f.clock))
            .await
            .unwrap();
        assert_eq!(disposition, ProofDisposition::Completed);

        let status = f.status.get_status(&anchor_id).await.unwrap().unwrap();
        assert_eq!(status.state, AnchorState::Completed);
        assert_eq!(status.log_inclusion, LogInclusion::NotSubmitted);

        // A late proof does not change anything
        let late = f
            .writer
            .handle_witness_proof(&witness_proof("https://w2", 12, &anchor_id, &f.clock))
            .await
            .unwrap();
        assert!(matches!(late, ProofDisposition::Ignored(_)));
        assert_eq!(
            f.writer
                .wait_for_outcome(&anchor_id, StdDuration::from_millis(10))
                .await
                .unwrap(),
            AnchorOutcome::Published
        );
    }

    #[tokio::test]
    async fn test_proofs_from_unselected_witnesses_are_ignored() {
        let f = fixture("MinPercent(50,batch)", false, &["https://w1"], false);
        let anchor_id = f.writer.write_anchor(ops("did:orb:abc", 1)).await.unwrap();

        let disposition = f
            .writer
            .handle_witness_proof(&witness_proof("https://intruder", 13, &anchor_id, &f.clock))
            .await
            .unwrap();
        assert!(matches!(disposition, ProofDisposition::Ignored(_)));
        assert_eq!(
            f.status.get_status(&anchor_id).await.unwrap().unwrap().state,
            AnchorState::InProcess
        );
    }

    #[tokio::test]
    async fn test_no_batch_witnesses_fails_the_anchor() {
        let f = fixture("MinPercent(50,batch)", true, &[], false);
        let anchor_id = f.writer.write_anchor(ops("did:orb:abc", 1)).await.unwrap();

        let status = f.status.get_status(&anchor_id).await.unwrap().unwrap();
        assert_eq!(status.state, AnchorState::Failed(FailureReason::Expired));
        assert!(matches!(
            f.writer
                .wait_for_outcome(&anchor_id, StdDuration::from_millis(10))
                .await
                .unwrap(),
            AnchorOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_next_anchor_links_to_previous() {
        let f = fixture("MinPercent(100,system)", true, &[], false);

        let first = f.writer.write_anchor(ops("did:orb:abc", 1)).await.unwrap();
        f.clock.advance(secs(1));
        let second = f.writer.write_anchor(ops("did:orb:abc", 1)).await.unwrap();
        assert_ne!(first, second);

        let index = f.observer.index();
        assert_eq!(index.latest_anchor("did:orb:abc").await.unwrap(), Some(second));
        let applied = index.operations("did:orb:abc").await.unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].anchor_id, first);
    }

    #[tokio::test]
    async fn test_wait_times_out_while_awaiting_witnesses() {
        let f = fixture("MinPercent(100,batch)", false, &["https://w1"], false);
        let anchor_id = f.writer.write_anchor(ops("did:orb:abc", 1)).await.unwrap();

        assert!(matches!(
            f.writer.wait_for_outcome(&anchor_id, StdDuration::from_millis(20)).await,
            Err(WriterError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_wakes_waiters_when_status_is_gone() {
        let f = fixture("MinPercent(100,batch)", false, &["https://w1"], false);
        let anchor_id = f.writer.write_anchor(ops("did:orb:abc", 1)).await.unwrap();
        assert_eq!(f.writer.sweep_stages().await, 0);

        // Settled and cleaned up by another instance
        f.status.fail(&anchor_id, FailureReason::Expired, "no quorum").await.unwrap();
        f.clock.advance(secs(86_401));
        assert_eq!(f.status.delete_expired().await.unwrap(), 1);

        let (outcome, swept) = tokio::join!(
            f.writer.wait_for_outcome(&anchor_id, StdDuration::from_secs(1)),
            f.writer.sweep_stages()
        );
        assert_eq!(swept, 1);
        assert!(matches!(outcome, Ok(AnchorOutcome::Failed(ref m)) if m.contains("expired")));
        assert!(f.writer.stage(&anchor_id).is_none());
    }
}
