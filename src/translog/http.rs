// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{InclusionProof, LogClient, LogError, SignedEntryTimestamp, SignedTreeHead, TreeHash};

#[derive(Deserialize)]
struct SthResponse {
    tree_size: u64,
    timestamp: u64,
    sha256_root_hash: TreeHash,
    tree_head_signature: String,
}

#[derive(Deserialize)]
struct ConsistencyResponse {
    consistency: Vec<TreeHash>,
}

#[derive(Deserialize)]
struct EntriesResponse {
    entries: Vec<LeafEntry>,
}

#[derive(Deserialize)]
struct LeafEntry {
    /// Hex-encoded entry bytes
    leaf_input: String,
}

#[derive(Serialize)]
struct AddChainRequest {
    chain: Vec<String>,
}

#[derive(Deserialize)]
struct AddChainResponse {
    leaf_hash: TreeHash,
    timestamp: u64,
    signature: String,
}

#[derive(Deserialize)]
struct ProofByHashResponse {
    leaf_index: u64,
    audit_path: Vec<TreeHash>,
}

/// Log client speaking a CT-style JSON API under `{base}/`
pub struct HttpLogClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpLogClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, LogError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LogError::Network(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn request_error(e: reqwest::Error) -> LogError {
        if e.is_timeout() {
            LogError::Timeout(e.to_string())
        } else {
            LogError::Network(e.to_string())
        }
    }

    async fn decode<T: DeserializeOwned>(&self, path: &str, response: reqwest::Response) -> Result<T, LogError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LogError::NotFound(format!("{}/{}", self.endpoint, path)));
        }
        if status.is_server_error() {
            return Err(LogError::Network(format!("{} returned {}", path, status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LogError::Rejected(format!("{} returned {}: {}", path, status, body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| LogError::InvalidResponse(format!("{}: {}", path, e)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, LogError> {
        let url = format!("{}/{}", self.endpoint, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(Self::request_error)?;
        self.decode(path, response).await
    }
}

#[async_trait]
impl LogClient for HttpLogClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_sth(&self) -> Result<SignedTreeHead, LogError> {
        let sth: SthResponse = self.get("get-sth", &[]).await?;
        Ok(SignedTreeHead {
            tree_size: sth.tree_size,
            timestamp: sth.timestamp,
            root_hash: sth.sha256_root_hash,
            signature: sth.tree_head_signature,
        })
    }

    async fn get_consistency_proof(&self, first: u64, second: u64) -> Result<Vec<TreeHash>, LogError> {
        let response: ConsistencyResponse = self
            .get(
                "get-sth-consistency",
                &[("first", first.to_string()), ("second", second.to_string())],
            )
            .await?;
        Ok(response.consistency)
    }

    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<Vec<u8>>, LogError> {
        if end <= start {
            return Ok(Vec::new());
        }

        // The wire API takes an inclusive end
        let response: EntriesResponse = self
            .get(
                "get-entries",
                &[("start", start.to_string()), ("end", (end - 1).to_string())],
            )
            .await?;

        response
            .entries
            .into_iter()
            .map(|e| hex::decode(&e.leaf_input).map_err(|err| LogError::InvalidResponse(err.to_string())))
            .collect()
    }

    async fn add_chain(&self, entry: &[u8]) -> Result<SignedEntryTimestamp, LogError> {
        let url = format!("{}/add-chain", self.endpoint);
        let request = AddChainRequest {
            chain: vec![hex::encode(entry)],
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(Self::request_error)?;
        let added: AddChainResponse = self.decode("add-chain", response).await?;

        debug!("Submitted entry {} to {}", added.leaf_hash, self.endpoint);
        Ok(SignedEntryTimestamp {
            endpoint: self.endpoint.clone(),
            leaf_hash: added.leaf_hash,
            timestamp: added.timestamp,
            signature: added.signature,
        })
    }

    async fn get_proof_by_hash(&self, leaf_hash: &TreeHash, tree_size: u64) -> Result<InclusionProof, LogError> {
        let response: ProofByHashResponse = self
            .get(
                "get-proof-by-hash",
                &[("hash", leaf_hash.to_hex()), ("tree_size", tree_size.to_string())],
            )
            .await?;

        Ok(InclusionProof {
            leaf_index: response.leaf_index,
            tree_size,
            audit_path: response.audit_path,
        })
    }
}
