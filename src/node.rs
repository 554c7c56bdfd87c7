// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Assembles every component from configuration and runs the periodic
//! tasks and broker subscribers until shutdown.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::anchor::{AnchorGraph, OperationRef};
use crate::broker::{
    spawn_subscriber_pool, BrokerError, Message, MessageBroker, MessageHandler, RedeliveryPolicy,
    ACTIVITY_INBOUND_TOPIC, ANCHORS_TOPIC, OPERATIONS_TOPIC,
};
use crate::cas::CasResolver;
use crate::clock::{secs, Clock};
use crate::config::OrbConfig;
use crate::errors::OrbError;
use crate::expiry::{retry_observer_queue, DataExpiryService};
use crate::federation::{AcceptListAuthorizer, Inbox, Outbox, PeerStore};
use crate::monitoring::{CheckResult, LogEndpoint, LogEndpointRegistry, LogMonitor, ProofMonitor};
use crate::observer::{KvDidAnchorIndex, Observer};
use crate::status::AnchorStatusStore;
use crate::store::KeyValueStore;
use crate::task_manager::{TaskManager, TaskResult};
use crate::telemetry::TelemetryReporter;
use crate::witness::{LocalWitness, PolicyProvider, WitnessProofStore};
use crate::writer::{AnchorNotice, AnchorWriter, WriterSettings};

/// Collaborators supplied by the embedder
pub struct NodeDependencies {
    pub store: Arc<dyn KeyValueStore>,
    pub cas: Arc<CasResolver>,
    pub logs: Vec<LogEndpoint>,
    pub broker: Arc<dyn MessageBroker>,
    pub outbox: Arc<dyn Outbox>,
    pub clock: Arc<dyn Clock>,
    /// ed25519 secret key used to witness
    pub signing_key: Option<[u8; 32]>,
}

/// One Orb node
pub struct OrbNode {
    config: OrbConfig,
    broker: Arc<dyn MessageBroker>,
    telemetry: Arc<TelemetryReporter>,
    status: Arc<AnchorStatusStore>,
    observer: Arc<Observer>,
    writer: Arc<AnchorWriter>,
    inbox: Arc<Inbox>,
    peers: Arc<PeerStore>,
    logs: Arc<LogEndpointRegistry>,
    tasks: Arc<TaskManager>,
}

/// Running node; dropping it without `shutdown` leaves the tasks running
pub struct NodeHandle {
    stop: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// Signal every task and subscriber to stop and wait for in-flight
    /// work to finish
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Worker ended abnormally: {}", e);
            }
        }
        info!("Node stopped");
    }
}

impl OrbNode {
    /// Validate the configuration and wire every component
    pub async fn build(config: OrbConfig, deps: NodeDependencies) -> Result<Self, OrbError> {
        config.validate()?;
        config.validate_signing(deps.signing_key.is_some())?;

        let node_id = config.node.node_id.clone();
        let NodeDependencies {
            store,
            cas,
            logs,
            broker,
            outbox,
            clock,
            signing_key,
        } = deps;

        let telemetry = Arc::new(TelemetryReporter::new(256));

        let policy = Arc::new(PolicyProvider::new(
            store.clone(),
            &config.witness.policy,
            secs(config.witness.policy_cache_secs),
            clock.clone(),
        ));
        // A stored policy that does not parse stops startup
        let active_policy = policy.policy().await?;
        info!("Witness policy: {}", active_policy);

        let proofs = Arc::new(WitnessProofStore::new(
            store.clone(),
            clock.clone(),
            secs(config.witness.proof_store_expiry_secs),
        ));
        let status = Arc::new(AnchorStatusStore::new(
            store.clone(),
            clock.clone(),
            telemetry.clone(),
            secs(config.status.grace_period_secs),
            config.witness.witness_timeout(),
            secs(config.status.expiry_secs),
        ));

        let graph = Arc::new(AnchorGraph::new(cas, clock.clone()));
        let index = Arc::new(KvDidAnchorIndex::new(store.clone(), clock.clone()));
        let observer = Arc::new(Observer::new(
            graph.clone(),
            index,
            store.clone(),
            clock.clone(),
            config.observer.max_attempts,
        ));

        let logs = Arc::new(LogEndpointRegistry::new(store.clone(), logs));
        if logs.all().is_empty() {
            info!("No transparency log configured; anchors will not be submitted");
        }
        let peers = Arc::new(PeerStore::new(store.clone(), clock.clone()));
        let local_witness =
            signing_key.map(|key| Arc::new(LocalWitness::new(&node_id, &key, clock.clone())));

        let mut writer = AnchorWriter::new(
            WriterSettings::from_config(&config),
            graph,
            observer.clone(),
            policy,
            proofs.clone(),
            status.clone(),
            logs.clone(),
            peers.clone(),
            outbox.clone(),
            clock.clone(),
        )
        .with_anchor_topic(broker.clone());
        if let Some(witness) = &local_witness {
            writer = writer.with_local_witness(witness.clone());
        }
        let writer = Arc::new(writer);

        let mut inbox = Inbox::new(
            &node_id,
            writer.clone(),
            observer.clone(),
            status.clone(),
            peers.clone(),
            AcceptListAuthorizer::from_config(&config.federation),
            outbox,
            clock.clone(),
        );
        if let Some(witness) = local_witness {
            inbox = inbox.with_witness(witness);
        }

        let tasks = Arc::new(TaskManager::new(
            &node_id,
            store,
            clock.clone(),
            telemetry.clone(),
            secs(config.task_manager.lease_secs),
        ));

        let node = Self {
            broker,
            telemetry,
            status,
            observer,
            writer,
            inbox: Arc::new(inbox),
            peers,
            logs,
            tasks,
            config,
        };
        node.register_tasks(clock, proofs);
        Ok(node)
    }

    fn register_tasks(&self, clock: Arc<dyn Clock>, proofs: Arc<WitnessProofStore>) {
        let proof_monitor = Arc::new(ProofMonitor::new(
            self.logs.clone(),
            self.status.clone(),
            clock.clone(),
            self.telemetry.clone(),
            secs(self.config.proof_monitor.expiry_secs),
        ));
        let log_monitor = Arc::new(LogMonitor::new(
            self.logs.clone(),
            clock,
            self.telemetry.clone(),
            self.config.log_monitor.max_tree_size,
            self.config.log_monitor.batch_size,
        ));
        let expiry = Arc::new(DataExpiryService::new(self.status.clone(), proofs));

        for (name, interval) in self.config.task_intervals() {
            let interval = StdDuration::from_secs(interval);
            match name {
                "check-in-process-anchors" => {
                    let status = self.status.clone();
                    let writer = self.writer.clone();
                    self.tasks.register_task(name, interval, move || {
                        let status = status.clone();
                        let writer = writer.clone();
                        async move {
                            status.check_in_process_anchors(&*writer).await?;
                            TaskResult::Ok(())
                        }
                    });
                }
                "data-expiry" => {
                    let expiry = expiry.clone();
                    self.tasks.register_task(name, interval, move || {
                        let expiry = expiry.clone();
                        async move {
                            expiry.run_once().await?;
                            TaskResult::Ok(())
                        }
                    });
                }
                "proof-monitor" => {
                    let monitor = proof_monitor.clone();
                    self.tasks.register_task(name, interval, move || {
                        let monitor = monitor.clone();
                        async move {
                            monitor.check_pending().await?;
                            TaskResult::Ok(())
                        }
                    });
                }
                "log-monitor" => {
                    let monitor = log_monitor.clone();
                    self.tasks.register_task(name, interval, move || {
                        let monitor = monitor.clone();
                        async move {
                            for (endpoint, result) in monitor.check_all().await {
                                if let Ok(CheckResult::Quarantined(reason)) = result {
                                    let error = OrbError::LogInconsistent { endpoint, reason };
                                    warn!("{} ({})", error, error.kind());
                                }
                            }
                            TaskResult::Ok(())
                        }
                    });
                }
                "observer-retry" => {
                    let observer = self.observer.clone();
                    self.tasks.register_task(name, interval, move || {
                        let observer = observer.clone();
                        async move {
                            retry_observer_queue(&observer).await?;
                            TaskResult::Ok(())
                        }
                    });
                }
                other => debug!("No handler for task {}", other),
            }
        }

        // Stages are per instance, so every instance sweeps its own
        let writer = self.writer.clone();
        self.tasks.register_local_task(
            "writer-stage-sweep",
            StdDuration::from_secs(self.config.status.check_interval_secs),
            move || {
                let writer = writer.clone();
                async move {
                    writer.sweep_stages().await;
                    TaskResult::Ok(())
                }
            },
        );
    }

    pub fn config(&self) -> &OrbConfig {
        &self.config
    }

    pub fn writer(&self) -> &Arc<AnchorWriter> {
        &self.writer
    }

    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    pub fn status(&self) -> &Arc<AnchorStatusStore> {
        &self.status
    }

    pub fn inbox(&self) -> &Arc<Inbox> {
        &self.inbox
    }

    pub fn peers(&self) -> &Arc<PeerStore> {
        &self.peers
    }

    pub fn logs(&self) -> &Arc<LogEndpointRegistry> {
        &self.logs
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn telemetry(&self) -> &Arc<TelemetryReporter> {
        &self.telemetry
    }

    /// Start the periodic tasks and the broker subscribers
    pub fn start(&self) -> NodeHandle {
        let (stop, shutdown) = watch::channel(false);
        let policy = RedeliveryPolicy::from(&self.config.broker);
        let pool_size = self.config.broker.pool_size;

        let mut workers = self.tasks.start(shutdown.clone());

        let operations: Arc<dyn MessageHandler> = Arc::new(OperationBatchHandler {
            writer: self.writer.clone(),
        });
        let anchors: Arc<dyn MessageHandler> = Arc::new(AnchorNoticeHandler {
            writer: self.writer.clone(),
        });
        let activities: Arc<dyn MessageHandler> = self.inbox.clone();
        let subscribers = [
            (OPERATIONS_TOPIC, operations),
            (ANCHORS_TOPIC, anchors),
            (ACTIVITY_INBOUND_TOPIC, activities),
        ];
        let pools = subscribers.len();
        for (topic, handler) in subscribers {
            workers.extend(spawn_subscriber_pool(
                self.broker.clone(),
                topic,
                pool_size,
                policy,
                handler,
                shutdown.clone(),
            ));
        }

        info!(
            "Node {} started: {} tasks, {} subscriber pools of {}",
            self.config.node.node_id,
            self.tasks.tasks().len(),
            pools,
            pool_size
        );
        NodeHandle { stop, workers }
    }
}

/// Anchors operation batches published on the operations topic
struct OperationBatchHandler {
    writer: Arc<AnchorWriter>,
}

#[async_trait]
impl MessageHandler for OperationBatchHandler {
    async fn handle(&self, message: &Message) -> Result<(), BrokerError> {
        let operations: Vec<OperationRef> = message.decode()?;
        if operations.is_empty() {
            return Ok(());
        }

        match self.writer.write_anchor(operations).await {
            Ok(anchor_id) => {
                debug!("Batch {} anchored as {}", message.id, anchor_id);
                Ok(())
            }
            Err(e) if e.is_transient() => Err(BrokerError::Handler(e.to_string())),
            Err(e) => {
                warn!("Dropping batch {}: {}", message.id, e);
                Ok(())
            }
        }
    }
}

/// Indexes and announces anchors published on the anchors topic
struct AnchorNoticeHandler {
    writer: Arc<AnchorWriter>,
}

#[async_trait]
impl MessageHandler for AnchorNoticeHandler {
    async fn handle(&self, message: &Message) -> Result<(), BrokerError> {
        let notice: AnchorNotice = message.decode()?;
        match self.writer.handle_anchor_notice(&notice).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => Err(BrokerError::Handler(e.to_string())),
            Err(e) => {
                warn!("Dropping notice for anchor {}: {}", notice.anchor_id, e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::OperationType;
    use crate::broker::MemoryBroker;
    use crate::cas::LocalCas;
    use crate::clock::ManualClock;
    use crate::federation::MemoryOutbox;
    use crate::status::AnchorState;
    use crate::store::MemoryStore;
    use crate::translog::MemoryLog;

    fn deps(clock: Arc<ManualClock>, broker: Arc<MemoryBroker>) -> NodeDependencies {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let log = Arc::new(MemoryLog::new("memory://log", &[6u8; 32], clock.clone()));
        NodeDependencies {
            cas: Arc::new(CasResolver::new(Arc::new(LocalCas::new(store.clone())), 64)),
            store,
            logs: vec![LogEndpoint::new(log.clone(), Some(log.verifying_key()))],
            broker,
            outbox: Arc::new(MemoryOutbox::new()),
            clock,
            signing_key: Some([1u8; 32]),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_stops_startup() {
        let mut config = OrbConfig::default();
        config.witness.policy = "MinPercent(50".to_string();

        let clock = Arc::new(ManualClock::starting_now());
        let result = OrbNode::build(config, deps(clock, Arc::new(MemoryBroker::new()))).await;
        assert!(matches!(result, Err(OrbError::Config(_))));
    }

    #[tokio::test]
    async fn test_local_witness_without_key_stops_startup() {
        let clock = Arc::new(ManualClock::starting_now());
        let mut keyless = deps(clock.clone(), Arc::new(MemoryBroker::new()));
        keyless.signing_key = None;
        let result = OrbNode::build(OrbConfig::default(), keyless).await;
        assert!(matches!(result, Err(OrbError::Config(_))));

        let mut config = OrbConfig::default();
        config.witness.sign_with_local_witness = false;
        let mut keyless = deps(clock, Arc::new(MemoryBroker::new()));
        keyless.signing_key = None;
        assert!(OrbNode::build(config, keyless).await.is_ok());
    }

    #[tokio::test]
    async fn test_all_tasks_registered() {
        let clock = Arc::new(ManualClock::starting_now());
        let node = OrbNode::build(OrbConfig::default(), deps(clock, Arc::new(MemoryBroker::new())))
            .await
            .unwrap();

        let mut tasks = node.tasks().tasks();
        tasks.sort();
        assert_eq!(
            tasks,
            vec![
                "check-in-process-anchors",
                "data-expiry",
                "log-monitor",
                "observer-retry",
                "proof-monitor",
                "writer-stage-sweep"
            ]
        );
        assert!(node.tasks().run_tick("check-in-process-anchors").await.unwrap());
        assert!(node.tasks().run_tick("log-monitor").await.unwrap());
    }

    #[tokio::test]
    async fn test_operations_topic_is_anchored() {
        let clock = Arc::new(ManualClock::starting_now());
        let broker = Arc::new(MemoryBroker::new());
        let node = OrbNode::build(OrbConfig::default(), deps(clock, broker.clone()))
            .await
            .unwrap();
        let handle = node.start();

        let batch = vec![OperationRef::new("did:orb:abc", "op-1", OperationType::Create)];
        broker
            .publish(Message::json(OPERATIONS_TOPIC, &batch).unwrap())
            .await
            .unwrap();

        let index = node.observer().index().clone();
        tokio::time::timeout(StdDuration::from_secs(5), async {
            while index.operations("did:orb:abc").await.unwrap().is_empty() {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let statuses = node.status().list().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, AnchorState::Completed);

        handle.shutdown().await;
    }
}
