// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::FederationError;
use crate::clock::Clock;
use crate::store::{Collection, KeyValueStore};

/// A peer relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub actor: String,
    pub since: DateTime<Utc>,
}

/// Durable follower and witness relationships, plus known witness keys
pub struct PeerStore {
    /// Nodes that receive our announcements
    followers: Collection<PeerRecord>,
    /// Nodes that agreed to witness our anchors
    witnesses: Collection<PeerRecord>,
    /// Nodes we agreed to witness for
    witnessing: Collection<PeerRecord>,
    /// Nodes that accepted our follow request
    following: Collection<PeerRecord>,
    /// Hex ed25519 verifying keys of witnesses
    keys: Collection<String>,
    clock: Arc<dyn Clock>,
}

impl PeerStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            followers: Collection::new(store.clone(), "federation-followers"),
            witnesses: Collection::new(store.clone(), "federation-witnesses"),
            witnessing: Collection::new(store.clone(), "federation-witnessing"),
            following: Collection::new(store.clone(), "federation-following"),
            keys: Collection::new(store, "federation-keys"),
            clock,
        }
    }

    async fn add(&self, collection: &Collection<PeerRecord>, actor: &str) -> Result<bool, FederationError> {
        let record = PeerRecord {
            actor: actor.to_string(),
            since: self.clock.now(),
        };
        Ok(collection.insert_new(actor, &record).await?)
    }

    async fn actors(collection: &Collection<PeerRecord>) -> Result<Vec<String>, FederationError> {
        let mut records: Vec<PeerRecord> = collection
            .list()
            .await?
            .into_iter()
            .map(|(_, record, _)| record)
            .collect();
        records.sort_by(|a, b| a.since.cmp(&b.since).then_with(|| a.actor.cmp(&b.actor)));
        Ok(records.into_iter().map(|r| r.actor).collect())
    }

    pub async fn add_follower(&self, actor: &str) -> Result<bool, FederationError> {
        let added = self.add(&self.followers, actor).await?;
        if added {
            info!("{} now follows us", actor);
        }
        Ok(added)
    }

    /// Followers, oldest first
    pub async fn followers(&self) -> Result<Vec<String>, FederationError> {
        Self::actors(&self.followers).await
    }

    pub async fn add_witness(&self, actor: &str) -> Result<bool, FederationError> {
        let added = self.add(&self.witnesses, actor).await?;
        if added {
            info!("{} accepted our witness invitation", actor);
        }
        Ok(added)
    }

    /// Peers available as batch witnesses, oldest first
    pub async fn witnesses(&self) -> Result<Vec<String>, FederationError> {
        Self::actors(&self.witnesses).await
    }

    pub async fn add_witnessing(&self, actor: &str) -> Result<bool, FederationError> {
        self.add(&self.witnessing, actor).await
    }

    /// Whether we agreed to witness for `actor`
    pub async fn is_witnessing(&self, actor: &str) -> Result<bool, FederationError> {
        Ok(self.witnessing.get(actor).await?.is_some())
    }

    pub async fn add_following(&self, actor: &str) -> Result<bool, FederationError> {
        let added = self.add(&self.following, actor).await?;
        if added {
            info!("Now following {}", actor);
        }
        Ok(added)
    }

    /// Whether `actor` accepted our follow request
    pub async fn is_following(&self, actor: &str) -> Result<bool, FederationError> {
        Ok(self.following.get(actor).await?.is_some())
    }

    pub async fn register_key(&self, actor: &str, key: &VerifyingKey) -> Result<(), FederationError> {
        self.keys.upsert(actor, &hex::encode(key.as_bytes())).await?;
        Ok(())
    }

    /// Verifying key of a witness, if known
    pub async fn key(&self, actor: &str) -> Result<Option<VerifyingKey>, FederationError> {
        let encoded = match self.keys.get(actor).await? {
            Some((encoded, _)) => encoded,
            None => return Ok(None),
        };

        let bytes: Option<[u8; 32]> = hex::decode(&encoded).ok().and_then(|b| b.try_into().ok());
        match bytes.map(|b| VerifyingKey::from_bytes(&b)) {
            Some(Ok(key)) => Ok(Some(key)),
            _ => {
                warn!("Stored key for {} is malformed", actor);
                Err(FederationError::Invalid(format!("malformed key for {}", actor)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{secs, ManualClock};
    use crate::store::MemoryStore;
    use ed25519_dalek::SigningKey;

    #[tokio::test]
    async fn test_relationships_are_idempotent_and_ordered() {
        let clock = Arc::new(ManualClock::starting_now());
        let peers = PeerStore::new(Arc::new(MemoryStore::new()), clock.clone());

        assert!(peers.add_witness("https://b").await.unwrap());
        clock.advance(secs(1));
        assert!(peers.add_witness("https://a").await.unwrap());
        assert!(!peers.add_witness("https://b").await.unwrap());

        assert_eq!(peers.witnesses().await.unwrap(), vec!["https://b", "https://a"]);
        assert!(peers.followers().await.unwrap().is_empty());
        assert!(!peers.is_witnessing("https://a").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys() {
        let peers = PeerStore::new(Arc::new(MemoryStore::new()), Arc::new(ManualClock::starting_now()));
        let key = SigningKey::from_bytes(&[9u8; 32]).verifying_key();

        assert!(peers.key("https://w").await.unwrap().is_none());
        peers.register_key("https://w", &key).await.unwrap();
        assert_eq!(peers.key("https://w").await.unwrap(), Some(key));
    }
}
