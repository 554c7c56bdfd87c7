// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Transparency log monitoring: inclusion proofs for submitted anchors and
//! append-only verification of each configured log.

pub mod log_monitor;
pub mod proof_monitor;
pub mod registry;

use thiserror::Error;

use crate::status::StatusError;
use crate::store::StoreError;
use crate::translog::LogError;

pub use log_monitor::{CheckResult, LogMonitor, LogMonitorRecord};
pub use proof_monitor::{ProofMonitor, ProofMonitorSummary};
pub use registry::{LogEndpoint, LogEndpointRegistry};

/// Error types for the monitoring services
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Unknown log endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl MonitorError {
    pub fn is_transient(&self) -> bool {
        match self {
            MonitorError::Log(e) => e.is_transient(),
            MonitorError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}
