// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use tracing::{info, warn};

use super::log_monitor::LogMonitorRecord;
use super::MonitorError;
use crate::store::{Collection, KeyValueStore};
use crate::translog::LogClient;

/// A configured log and the key that verifies its tree heads
#[derive(Clone)]
pub struct LogEndpoint {
    pub client: Arc<dyn LogClient>,
    pub public_key: Option<VerifyingKey>,
}

impl LogEndpoint {
    pub fn new(client: Arc<dyn LogClient>, public_key: Option<VerifyingKey>) -> Self {
        Self { client, public_key }
    }

    pub fn name(&self) -> &str {
        self.client.endpoint()
    }
}

/// Configured log endpoints plus their monitor records. An endpoint whose
/// record is quarantined is excluded from submissions until reinstated.
pub struct LogEndpointRegistry {
    endpoints: Vec<LogEndpoint>,
    records: Collection<LogMonitorRecord>,
}

impl LogEndpointRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, endpoints: Vec<LogEndpoint>) -> Self {
        Self {
            endpoints: endpoints
                .into_iter()
                .filter(|e| e.client.is_enabled())
                .collect(),
            records: Collection::new(store, "log-monitor"),
        }
    }

    /// Monitor records, one per endpoint
    pub fn records(&self) -> &Collection<LogMonitorRecord> {
        &self.records
    }

    /// Every enabled endpoint
    pub fn all(&self) -> &[LogEndpoint] {
        &self.endpoints
    }

    pub fn get(&self, endpoint: &str) -> Option<&LogEndpoint> {
        self.endpoints.iter().find(|e| e.name() == endpoint)
    }

    /// Quarantine reason, if any
    pub async fn quarantine_reason(&self, endpoint: &str) -> Result<Option<String>, MonitorError> {
        Ok(self
            .records
            .get(endpoint)
            .await?
            .and_then(|(record, _)| record.quarantined))
    }

    /// Endpoints that may receive submissions
    pub async fn active(&self) -> Result<Vec<LogEndpoint>, MonitorError> {
        let mut active = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            match self.quarantine_reason(endpoint.name()).await? {
                Some(reason) => warn!("Skipping quarantined log {}: {}", endpoint.name(), reason),
                None => active.push(endpoint.clone()),
            }
        }
        Ok(active)
    }

    /// Operator intervention: clear a quarantine and forget the verified
    /// state so monitoring starts over from the log's current head
    pub async fn reinstate(&self, endpoint: &str) -> Result<bool, MonitorError> {
        if self.get(endpoint).is_none() {
            return Err(MonitorError::UnknownEndpoint(endpoint.to_string()));
        }

        let removed = self.records.delete(endpoint).await?;
        if removed {
            info!("Log endpoint {} reinstated", endpoint);
        }
        Ok(removed)
    }
}
