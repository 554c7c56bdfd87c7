// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

#![allow(dead_code)]

use std::sync::Arc;

use orb_core::broker::MemoryBroker;
use orb_core::cas::{CasResolver, LocalCas};
use orb_core::clock::ManualClock;
use orb_core::config::OrbConfig;
use orb_core::federation::MemoryOutbox;
use orb_core::monitoring::LogEndpoint;
use orb_core::store::{KeyValueStore, MemoryStore};
use orb_core::translog::MemoryLog;
use orb_core::{NodeDependencies, OrbNode};

pub const NODE_A: &str = "https://orb.a.example/services/orb";
pub const NODE_B: &str = "https://orb.b.example/services/orb";
pub const NODE_C: &str = "https://orb.c.example/services/orb";

pub fn config(node_id: &str, policy: &str, batch_witnesses: &[&str], sign_locally: bool) -> OrbConfig {
    let mut config = OrbConfig::default();
    config.node.node_id = node_id.to_string();
    config.witness.policy = policy.to_string();
    config.witness.batch_witnesses = batch_witnesses.iter().map(|w| w.to_string()).collect();
    config.witness.sign_with_local_witness = sign_locally;
    config
}

/// CAS every test node reads and writes, standing in for IPFS
pub fn shared_cas() -> Arc<CasResolver> {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    Arc::new(CasResolver::new(Arc::new(LocalCas::new(store)), 64))
}

pub fn memory_log(clock: Arc<ManualClock>) -> Arc<MemoryLog> {
    Arc::new(MemoryLog::new("memory://log", &[9u8; 32], clock))
}

pub fn log_endpoint(log: &Arc<MemoryLog>) -> LogEndpoint {
    LogEndpoint::new(log.clone(), Some(log.verifying_key()))
}

pub struct TestNode {
    pub node: OrbNode,
    pub outbox: Arc<MemoryOutbox>,
    pub store: Arc<dyn KeyValueStore>,
}

pub struct NodeBuilder {
    config: OrbConfig,
    clock: Arc<ManualClock>,
    cas: Arc<CasResolver>,
    store: Option<Arc<dyn KeyValueStore>>,
    logs: Vec<LogEndpoint>,
    signing_key: Option<[u8; 32]>,
}

impl NodeBuilder {
    pub fn new(config: OrbConfig, clock: Arc<ManualClock>, cas: Arc<CasResolver>) -> Self {
        Self {
            config,
            clock,
            cas,
            store: None,
            logs: Vec::new(),
            signing_key: None,
        }
    }

    /// Share node state with another instance of the same deployment
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn log(mut self, endpoint: LogEndpoint) -> Self {
        self.logs.push(endpoint);
        self
    }

    pub fn signing_key(mut self, key: [u8; 32]) -> Self {
        self.signing_key = Some(key);
        self
    }

    pub async fn build(self) -> TestNode {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let outbox = Arc::new(MemoryOutbox::new());

        let deps = NodeDependencies {
            store: store.clone(),
            cas: self.cas,
            logs: self.logs,
            broker: Arc::new(MemoryBroker::new()),
            outbox: outbox.clone(),
            clock: self.clock,
            signing_key: self.signing_key,
        };
        let node = OrbNode::build(self.config, deps).await.expect("node builds");

        TestNode { node, outbox, store }
    }
}
