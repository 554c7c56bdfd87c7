// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Crate-wide error type and its classification

use std::fmt;

use thiserror::Error;

use crate::anchor::GraphError;
use crate::broker::BrokerError;
use crate::cas::CasError;
use crate::config::ConfigError;
use crate::expiry::ExpiryError;
use crate::federation::FederationError;
use crate::monitoring::MonitorError;
use crate::observer::ObserverError;
use crate::status::StatusError;
use crate::store::StoreError;
use crate::task_manager::TaskError;
use crate::translog::LogError;
use crate::witness::{PolicyError, ProofStoreError, SignerError};
use crate::writer::WriterError;

/// How a failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network or timeout; retry with backoff
    Transient,
    /// The witness policy cannot be met for this anchor
    PolicyUnsatisfiable,
    /// Fatal at startup
    ConfigInvalid,
    /// A log endpoint forked or rolled back
    LogInconsistent,
    /// Duplicate non-identical write; the original stands
    Conflict,
    NotFound,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::PolicyUnsatisfiable => "policy-unsatisfiable",
            ErrorKind::ConfigInvalid => "config-invalid",
            ErrorKind::LogInconsistent => "log-inconsistent",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Any error raised by the crate
#[derive(Debug, Error)]
pub enum OrbError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cas(#[from] CasError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    ProofStore(#[from] ProofStoreError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Observer(#[from] ObserverError),

    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Expiry(#[from] ExpiryError),

    /// An endpoint was found inconsistent and quarantined
    #[error("Log {endpoint} is inconsistent: {reason}")]
    LogInconsistent { endpoint: String, reason: String },
}

fn store_kind(e: &StoreError) -> ErrorKind {
    if e.is_transient() {
        ErrorKind::Transient
    } else {
        ErrorKind::Internal
    }
}

fn status_kind(e: &StatusError) -> ErrorKind {
    match e {
        StatusError::NotFound(_) => ErrorKind::NotFound,
        StatusError::Contended(_) => ErrorKind::Transient,
        StatusError::InvalidTransition { .. } => ErrorKind::Internal,
        StatusError::Storage(e) => store_kind(e),
    }
}

fn policy_kind(e: &PolicyError) -> ErrorKind {
    match e {
        PolicyError::Parse { .. } => ErrorKind::ConfigInvalid,
        PolicyError::Unsatisfiable(_) => ErrorKind::PolicyUnsatisfiable,
        PolicyError::Store(_) => ErrorKind::Transient,
    }
}

fn proof_store_kind(e: &ProofStoreError) -> ErrorKind {
    match e {
        ProofStoreError::Conflict { .. } | ProofStoreError::SelectionConflict(_) => ErrorKind::Conflict,
        ProofStoreError::Storage(e) => store_kind(e),
    }
}

fn log_kind(e: &LogError) -> ErrorKind {
    match e {
        LogError::NotFound(_) => ErrorKind::NotFound,
        e if e.is_transient() => ErrorKind::Transient,
        _ => ErrorKind::Internal,
    }
}

fn graph_kind(e: &GraphError) -> ErrorKind {
    match e {
        GraphError::NotFound(_) => ErrorKind::NotFound,
        e if e.is_transient() => ErrorKind::Transient,
        _ => ErrorKind::Internal,
    }
}

fn observer_kind(e: &ObserverError) -> ErrorKind {
    match e {
        ObserverError::Graph(e) => graph_kind(e),
        ObserverError::Storage(e) => store_kind(e),
        ObserverError::Contended(_) => ErrorKind::Transient,
        ObserverError::Cycle(_) => ErrorKind::Internal,
    }
}

fn monitor_kind(e: &MonitorError) -> ErrorKind {
    match e {
        MonitorError::UnknownEndpoint(_) => ErrorKind::NotFound,
        MonitorError::Log(e) => log_kind(e),
        MonitorError::Status(e) => status_kind(e),
        MonitorError::Storage(e) => store_kind(e),
    }
}

fn writer_kind(e: &WriterError) -> ErrorKind {
    match e {
        WriterError::Graph(e) => graph_kind(e),
        WriterError::Status(e) => status_kind(e),
        WriterError::ProofStore(e) => proof_store_kind(e),
        WriterError::Policy(e) => policy_kind(e),
        WriterError::Observer(e) => observer_kind(e),
        WriterError::Monitor(e) => monitor_kind(e),
        WriterError::NoSigningKey => ErrorKind::ConfigInvalid,
        e if e.is_transient() => ErrorKind::Transient,
        _ => ErrorKind::Internal,
    }
}

impl OrbError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrbError::Config(_) => ErrorKind::ConfigInvalid,
            OrbError::Store(e) => store_kind(e),
            OrbError::Cas(CasError::NotFound(_)) => ErrorKind::NotFound,
            OrbError::Cas(e) if e.is_transient() => ErrorKind::Transient,
            OrbError::Cas(_) => ErrorKind::Internal,
            OrbError::Graph(e) => graph_kind(e),
            OrbError::Policy(e) => policy_kind(e),
            OrbError::ProofStore(e) => proof_store_kind(e),
            OrbError::Signer(_) => ErrorKind::Internal,
            OrbError::Status(e) => status_kind(e),
            OrbError::Log(e) => log_kind(e),
            OrbError::Monitor(e) => monitor_kind(e),
            OrbError::Writer(e) => writer_kind(e),
            OrbError::Task(TaskError::UnknownTask(_)) => ErrorKind::NotFound,
            OrbError::Task(TaskError::Storage(e)) => store_kind(e),
            OrbError::Task(TaskError::Failed { .. }) => ErrorKind::Internal,
            OrbError::Observer(e) => observer_kind(e),
            OrbError::Federation(FederationError::Writer(e)) => writer_kind(e),
            OrbError::Federation(e) if e.is_transient() => ErrorKind::Transient,
            OrbError::Federation(_) => ErrorKind::Internal,
            OrbError::Broker(_) => ErrorKind::Transient,
            OrbError::Expiry(ExpiryError::Status(e)) => status_kind(e),
            OrbError::Expiry(ExpiryError::ProofStore(e)) => proof_store_kind(e),
            OrbError::Expiry(ExpiryError::Observer(e)) => observer_kind(e),
            OrbError::LogInconsistent { .. } => ErrorKind::LogInconsistent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let conflict: OrbError = ProofStoreError::Conflict {
            anchor_id: "h1".to_string(),
            witness: "https://w".to_string(),
        }
        .into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let bad_policy: OrbError = PolicyError::Parse {
            policy: "MinPercent(".to_string(),
            reason: "unexpected end".to_string(),
        }
        .into();
        assert_eq!(bad_policy.kind(), ErrorKind::ConfigInvalid);

        let timeout: OrbError = StoreError::Timeout.into();
        assert!(timeout.is_transient());

        let nested: OrbError = FederationError::Writer(WriterError::Policy(PolicyError::Unsatisfiable(
            "no batch witnesses".to_string(),
        )))
        .into();
        assert_eq!(nested.kind(), ErrorKind::PolicyUnsatisfiable);

        let forked = OrbError::LogInconsistent {
            endpoint: "https://log".to_string(),
            reason: "tree shrank".to_string(),
        };
        assert_eq!(forked.kind(), ErrorKind::LogInconsistent);
    }
}
