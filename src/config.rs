// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Node configuration.
//!
//! Values come from an optional file plus `ORB__SECTION__FIELD` environment
//! variables (a `.env` file is honoured). [`OrbConfig::validate`] must pass
//! before a node starts.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::clock::secs;
use crate::store::RedisStoreConfig;
use crate::witness::WitnessPolicy;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<::config::ConfigError> for ConfigError {
    fn from(e: ::config::ConfigError) -> Self {
        ConfigError::Load(e.to_string())
    }
}

/// Identity of this node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Actor URI of this node, used as anchor origin and witness id
    pub node_id: String,

    /// Hex ed25519 secret key for local witness proofs and the in-memory log
    pub signing_key_hex: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "https://orb.local/services/orb".to_string(),
            signing_key_hex: None,
        }
    }
}

/// Witness selection, policy and proof retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WitnessConfig {
    /// Fallback policy text when none is stored
    pub policy: String,

    /// Lifetime of the cached parsed policy in seconds
    pub policy_cache_secs: u64,

    /// Count the local node as a system witness
    pub sign_with_local_witness: bool,

    /// Fixed system witnesses
    pub system_witnesses: Vec<String>,

    /// Batch witness peers considered after parent-anchor origins
    pub batch_witnesses: Vec<String>,

    /// Upper bound on batch witnesses per anchor
    pub max_batch_witnesses: usize,

    /// How long an anchor may wait for quorum, in seconds
    pub max_witness_delay_secs: u64,

    /// Tolerated clock difference between nodes, in seconds
    pub max_clock_skew_secs: u64,

    /// Retention of witness selections and proofs, in seconds
    pub proof_store_expiry_secs: u64,
}

impl Default for WitnessConfig {
    fn default() -> Self {
        Self {
            policy: "MinPercent(100,system)".to_string(),
            policy_cache_secs: 60,
            sign_with_local_witness: true,
            system_witnesses: Vec::new(),
            batch_witnesses: Vec::new(),
            max_batch_witnesses: 3,
            max_witness_delay_secs: 600,
            max_clock_skew_secs: 60,
            proof_store_expiry_secs: 86_400,
        }
    }
}

impl WitnessConfig {
    /// Deadline after which an anchor without quorum fails
    pub fn witness_timeout(&self) -> chrono::Duration {
        secs(self.max_witness_delay_secs + self.max_clock_skew_secs)
    }
}

/// Anchor status store and its periodic tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Interval of the in-process anchor check, in seconds
    pub check_interval_secs: u64,

    /// Delay before an in-process anchor is re-inspected, in seconds
    pub grace_period_secs: u64,

    /// Retention of terminal status records, in seconds
    pub expiry_secs: u64,

    /// Interval of the data expiry service, in seconds
    pub expiry_check_interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            grace_period_secs: 30,
            expiry_secs: 86_400,
            expiry_check_interval_secs: 300,
        }
    }
}

/// Inclusion proof polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofMonitorConfig {
    pub interval_secs: u64,

    /// Give up waiting for an inclusion proof after this many seconds
    pub expiry_secs: u64,
}

impl Default for ProofMonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            expiry_secs: 3_600,
        }
    }
}

/// One configured transparency log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEndpointConfig {
    pub url: String,

    /// Hex ed25519 key verifying the log's tree heads
    pub public_key: Option<String>,
}

/// Log consistency monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogMonitorConfig {
    pub interval_secs: u64,

    /// Above this tree size entries are not re-hashed locally
    pub max_tree_size: u64,

    /// Entries fetched per request when re-hashing
    pub batch_size: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    pub endpoints: Vec<LogEndpointConfig>,
}

impl Default for LogMonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_tree_size: 10_000,
            batch_size: 500,
            request_timeout_secs: 10,
            endpoints: Vec::new(),
        }
    }
}

/// Distributed task leases
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// Lease duration in seconds; must exceed every task interval
    pub lease_secs: u64,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self { lease_secs: 600 }
    }
}

/// Broker subscriber pools and redelivery backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Workers per subscribed topic
    pub pool_size: usize,

    /// First redelivery delay in milliseconds
    pub initial_interval_ms: u64,

    pub multiplier: f64,

    /// Redelivery delay cap in milliseconds
    pub max_interval_ms: u64,

    /// Deliveries before a message is dead-lettered
    pub max_attempts: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            initial_interval_ms: 500,
            multiplier: 2.0,
            max_interval_ms: 30_000,
            max_attempts: 5,
        }
    }
}

/// Content-addressable storage transports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CasConfig {
    /// Entries kept in the resolver cache
    pub cache_size: usize,

    /// IPFS HTTP API, used as an alternate transport when set
    pub ipfs_endpoint: Option<String>,

    /// Resolve missing content from the origin node via WebFinger
    pub remote_resolution: bool,

    pub request_timeout_secs: u64,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            cache_size: 1_000,
            ipfs_endpoint: None,
            remote_resolution: true,
            request_timeout_secs: 10,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis: RedisStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis: RedisStoreConfig::default(),
        }
    }
}

/// Observer retry queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub retry_interval_secs: u64,

    /// Attempts before a pending anchor is dropped
    pub max_attempts: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 30,
            max_attempts: 10,
        }
    }
}

/// Authorization of inbound federation requests. `None` accepts everyone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub follow_accept_list: Option<Vec<String>>,
    pub invite_witness_accept_list: Option<Vec<String>>,
    /// Nodes whose announcements are indexed without being followed
    pub announce_accept_list: Vec<String>,
}

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbConfig {
    pub node: NodeConfig,
    pub witness: WitnessConfig,
    pub status: StatusConfig,
    pub proof_monitor: ProofMonitorConfig,
    pub log_monitor: LogMonitorConfig,
    pub task_manager: TaskManagerConfig,
    pub broker: BrokerConfig,
    pub cas: CasConfig,
    pub store: StoreConfig,
    pub observer: ObserverConfig,
    pub federation: FederationConfig,
}

impl OrbConfig {
    /// Load from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // A missing .env file is fine
        let _ = dotenv::dotenv();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("ORB")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: OrbConfig = builder.build()?.try_deserialize()?;
        debug!("Loaded configuration for node {}", config.node.node_id);
        Ok(config)
    }

    /// Intervals of every periodic task, in seconds
    pub fn task_intervals(&self) -> [(&'static str, u64); 5] {
        [
            ("check-in-process-anchors", self.status.check_interval_secs),
            ("data-expiry", self.status.expiry_check_interval_secs),
            ("proof-monitor", self.proof_monitor.interval_secs),
            ("log-monitor", self.log_monitor.interval_secs),
            ("observer-retry", self.observer.retry_interval_secs),
        ]
    }

    /// Reject configurations that cannot run correctly
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.node.node_id.trim().is_empty() {
            return invalid("node.node_id must be set".to_string());
        }

        let witness = &self.witness;
        let window = witness.max_witness_delay_secs + witness.max_clock_skew_secs;
        if witness.proof_store_expiry_secs <= window {
            return invalid(format!(
                "witness.proof_store_expiry_secs ({}) must exceed max_witness_delay_secs + max_clock_skew_secs ({})",
                witness.proof_store_expiry_secs, window
            ));
        }

        if let Err(e) = WitnessPolicy::parse(&witness.policy) {
            return invalid(e.to_string());
        }

        for (task, interval) in self.task_intervals() {
            if interval == 0 {
                return invalid(format!("interval of task '{}' must be positive", task));
            }
            if self.task_manager.lease_secs <= interval {
                return invalid(format!(
                    "task_manager.lease_secs ({}) must exceed the '{}' interval ({})",
                    self.task_manager.lease_secs, task, interval
                ));
            }
        }

        if self.log_monitor.batch_size == 0 {
            return invalid("log_monitor.batch_size must be positive".to_string());
        }

        if self.broker.pool_size == 0 || self.broker.max_attempts == 0 {
            return invalid("broker.pool_size and broker.max_attempts must be positive".to_string());
        }
        if self.broker.multiplier < 1.0 {
            return invalid("broker.multiplier must be at least 1.0".to_string());
        }

        Ok(())
    }

    /// Check the configuration against the signing key the node was given
    pub fn validate_signing(&self, key_supplied: bool) -> Result<(), ConfigError> {
        if self.witness.sign_with_local_witness && !key_supplied {
            return Err(ConfigError::Invalid(
                "witness.sign_with_local_witness is set but no signing key was supplied".to_string(),
            ));
        }
        Ok(())
    }
}
