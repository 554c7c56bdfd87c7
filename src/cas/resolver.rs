// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{CasClient, CasError};
use crate::anchor::ContentHash;

/// Fetches content from the node that originated it
#[async_trait]
pub trait RemoteCasResolver: Send + Sync {
    async fn read(&self, origin: &str, hash: &ContentHash) -> Result<Vec<u8>, CasError>;
}

#[derive(Debug, Deserialize)]
struct WebFingerLink {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct WebFingerResponse {
    #[serde(default)]
    links: Vec<WebFingerLink>,
}

/// Remote resolution through WebFinger discovery on the origin host
pub struct WebFingerCasResolver {
    client: reqwest::Client,
}

impl WebFingerCasResolver {
    pub fn new(timeout: Duration) -> Result<Self, CasError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CasError::Unavailable(e.to_string()))?;

        Ok(Self { client })
    }

    fn network_error(e: reqwest::Error) -> CasError {
        if e.is_timeout() {
            CasError::Timeout(e.to_string())
        } else {
            CasError::Network(e.to_string())
        }
    }

    async fn fetch(&self, url: &str) -> Result<reqwest::Response, CasError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::network_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CasError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(CasError::Unavailable(format!("{} returned status: {}", url, status)));
        }

        Ok(response)
    }
}

#[async_trait]
impl RemoteCasResolver for WebFingerCasResolver {
    async fn read(&self, origin: &str, hash: &ContentHash) -> Result<Vec<u8>, CasError> {
        let url = format!(
            "{}/.well-known/webfinger?resource={}",
            origin.trim_end_matches('/'),
            hash
        );

        let discovery = self
            .fetch(&url)
            .await?
            .json::<WebFingerResponse>()
            .await
            .map_err(|e| CasError::Serialization(format!("Invalid WebFinger response: {}", e)))?;

        let mut last_error = CasError::NotFound(hash.to_string());
        for link in discovery
            .links
            .iter()
            .filter(|l| l.rel == "working-copy" || l.rel == "alternate")
        {
            match self.fetch(&link.href).await {
                Ok(response) => {
                    let bytes = response.bytes().await.map_err(Self::network_error)?;
                    return Ok(bytes.to_vec());
                }
                Err(e) => {
                    debug!("WebFinger link {} for {} failed: {}", link.href, hash, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Bounded insertion-ordered cache of resolved content
struct ContentCache {
    capacity: usize,
    entries: HashMap<ContentHash, Arc<Vec<u8>>>,
    order: VecDeque<ContentHash>,
}

impl ContentCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, hash: &ContentHash) -> Option<Arc<Vec<u8>>> {
        self.entries.get(hash).cloned()
    }

    fn insert(&mut self, hash: ContentHash, content: Vec<u8>) {
        if self.capacity == 0 || self.entries.contains_key(&hash) {
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(hash.clone());
        self.entries.insert(hash, Arc::new(content));
    }
}

/// Resolves content through cache, local CAS, alternate transports and
/// finally the origin node, in that order.
pub struct CasResolver {
    local: Arc<dyn CasClient>,
    alternates: Vec<Arc<dyn CasClient>>,
    remote: Option<Arc<dyn RemoteCasResolver>>,
    cache: Mutex<ContentCache>,
}

impl CasResolver {
    /// Create a resolver over the local CAS
    pub fn new(local: Arc<dyn CasClient>, cache_size: usize) -> Self {
        Self {
            local,
            alternates: Vec::new(),
            remote: None,
            cache: Mutex::new(ContentCache::new(cache_size)),
        }
    }

    /// Add a transport tried after the local CAS
    pub fn with_alternate(mut self, transport: Arc<dyn CasClient>) -> Self {
        self.alternates.push(transport);
        self
    }

    /// Add origin-based remote resolution
    pub fn with_remote(mut self, remote: Arc<dyn RemoteCasResolver>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Write to the local CAS and mirror to the alternates
    pub async fn write(&self, content: &[u8]) -> Result<ContentHash, CasError> {
        let hash = self.local.write(content).await?;

        for transport in &self.alternates {
            if let Err(e) = transport.write(content).await {
                warn!("Mirroring {} to {} failed: {}", hash, transport.name(), e);
            }
        }

        self.cache.lock().insert(hash.clone(), content.to_vec());
        Ok(hash)
    }

    /// Resolve content, using `origin` for remote discovery when it is
    /// not held locally
    pub async fn read(&self, hash: &ContentHash, origin: Option<&str>) -> Result<Vec<u8>, CasError> {
        if let Some(content) = self.cache.lock().get(hash) {
            return Ok(content.as_ref().clone());
        }

        let mut transient: Option<CasError> = None;

        let transports = std::iter::once(&self.local).chain(self.alternates.iter());
        for transport in transports {
            match transport.read(hash).await {
                Ok(content) => {
                    if !hash.matches(&content) {
                        warn!("{} returned content not matching {}", transport.name(), hash);
                        continue;
                    }
                    self.cache.lock().insert(hash.clone(), content.clone());
                    return Ok(content);
                }
                Err(e) => {
                    debug!("{} could not resolve {}: {}", transport.name(), hash, e);
                    if e.is_transient() {
                        transient = Some(e);
                    }
                }
            }
        }

        if let (Some(remote), Some(origin)) = (&self.remote, origin) {
            match remote.read(origin, hash).await {
                Ok(content) => {
                    if !hash.matches(&content) {
                        return Err(CasError::HashMismatch {
                            expected: hash.to_string(),
                            actual: ContentHash::compute(&content).to_string(),
                        });
                    }

                    self.local.write(&content).await?;
                    self.cache.lock().insert(hash.clone(), content.clone());
                    info!("Resolved {} from origin {}", hash, origin);
                    return Ok(content);
                }
                Err(e) => {
                    warn!("Remote resolution of {} from {} failed: {}", hash, origin, e);
                    if e.is_transient() {
                        transient = Some(e);
                    }
                }
            }
        }

        Err(transient.unwrap_or_else(|| CasError::NotFound(hash.to_string())))
    }
}
