// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Minimal actor/activity exchange between nodes: witness offers and their
//! replies, follow and witness invitations, and anchor announcements.

pub mod acceptlist;
pub mod activity;
pub mod inbox;
pub mod outbox;
pub mod peers;

use thiserror::Error;

use crate::broker::BrokerError;
use crate::observer::ObserverError;
use crate::status::StatusError;
use crate::store::StoreError;
use crate::witness::SignerError;
use crate::writer::WriterError;

pub use acceptlist::AcceptListAuthorizer;
pub use activity::{Activity, ActivityObject, ActivityType};
pub use inbox::{Inbox, InboxOutcome};
pub use outbox::{BrokerOutbox, MemoryOutbox, Outbox};
pub use peers::{PeerRecord, PeerStore};

/// Error types for federation handling
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid activity: {0}")]
    Invalid(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Signature error: {0}")]
    Signer(#[from] SignerError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Observer error: {0}")]
    Observer(#[from] ObserverError),

    #[error("Status error: {0}")]
    Status(#[from] StatusError),
}

impl FederationError {
    /// Whether redelivering the activity may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            FederationError::Storage(e) => e.is_transient(),
            FederationError::Broker(_) => true,
            FederationError::Writer(e) => e.is_transient(),
            FederationError::Observer(e) => e.is_retryable(),
            FederationError::Status(StatusError::Contended(_)) => true,
            FederationError::Status(StatusError::Storage(e)) => e.is_transient(),
            _ => false,
        }
    }
}
