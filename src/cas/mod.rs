// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Content-addressable storage transports and the resolver that chains them

pub mod ipfs;
pub mod local;
pub mod resolver;

use async_trait::async_trait;
use thiserror::Error;

use crate::anchor::ContentHash;

pub use ipfs::IpfsCas;
pub use local::LocalCas;
pub use resolver::{CasResolver, RemoteCasResolver, WebFingerCasResolver};

/// Error types for content-addressable storage operations
#[derive(Debug, Error)]
pub enum CasError {
    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CasError {
    /// Whether retrying (possibly on another transport) may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CasError::Network(_) | CasError::Timeout(_) | CasError::Unavailable(_)
        )
    }
}

/// Content-addressable storage transport
#[async_trait]
pub trait CasClient: Send + Sync {
    /// Name of this transport
    fn name(&self) -> &str;

    /// Store content and return its hash. Writing content that already
    /// exists succeeds without creating a second entry.
    async fn write(&self, content: &[u8]) -> Result<ContentHash, CasError>;

    /// Fetch content by hash
    async fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, CasError>;
}
