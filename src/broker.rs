// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Topic-based message broker with at-least-once worker pools.
//!
//! Handlers must tolerate duplicates: a failed message is published again
//! after an exponential backoff until `max_attempts` deliveries have
//! failed, then moved to `<topic>.dead-letter`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::BrokerConfig;

/// Operation batches waiting to be anchored
pub const OPERATIONS_TOPIC: &str = "orb.operations";
/// Anchors to feed to the observer
pub const ANCHORS_TOPIC: &str = "orb.anchors";
/// Activities received from other nodes
pub const ACTIVITY_INBOUND_TOPIC: &str = "orb.activity.inbound";
/// Activities to deliver to other nodes
pub const ACTIVITY_OUTBOUND_TOPIC: &str = "orb.activity.outbound";

pub fn dead_letter_topic(topic: &str) -> String {
    format!("{}.dead-letter", topic)
}

/// Error types for the message broker
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Topic closed: {0}")]
    Closed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Handler error: {0}")]
    Handler(String),
}

/// A message on a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    /// Failed deliveries so far
    pub attempt: u32,
}

impl Message {
    pub fn new(topic: &str, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            payload,
            attempt: 0,
        }
    }

    /// Message carrying a JSON payload
    pub fn json<T: Serialize>(topic: &str, value: &T) -> Result<Self, BrokerError> {
        let payload = serde_json::to_vec(value).map_err(|e| BrokerError::Serialization(e.to_string()))?;
        Ok(Self::new(topic, payload))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BrokerError> {
        serde_json::from_slice(&self.payload).map_err(|e| BrokerError::Serialization(e.to_string()))
    }
}

/// Publish/subscribe transport
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), BrokerError>;

    /// Receiver shared by every subscriber of `topic`; each message goes
    /// to exactly one of them
    fn subscribe(&self, topic: &str) -> flume::Receiver<Message>;
}

/// In-process broker on flume channels
#[derive(Default)]
pub struct MemoryBroker {
    topics: DashMap<String, (flume::Sender<Message>, flume::Receiver<Message>)>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, topic: &str) -> (flume::Sender<Message>, flume::Receiver<Message>) {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(flume::unbounded)
            .clone()
    }

    /// Messages queued on a topic
    pub fn pending(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |entry| entry.1.len())
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(&self, message: Message) -> Result<(), BrokerError> {
        let (sender, _) = self.channel(&message.topic);
        let topic = message.topic.clone();
        sender
            .send_async(message)
            .await
            .map_err(|_| BrokerError::Closed(topic))
    }

    fn subscribe(&self, topic: &str) -> flume::Receiver<Message> {
        self.channel(topic).1
    }
}

/// Consumer of one topic
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), BrokerError>;
}

/// Exponential redelivery backoff
#[derive(Debug, Clone, Copy)]
pub struct RedeliveryPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl From<&BrokerConfig> for RedeliveryPolicy {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(config.initial_interval_ms),
            multiplier: config.multiplier,
            max_interval: Duration::from_millis(config.max_interval_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl RedeliveryPolicy {
    /// Delay before redelivery number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let millis = self.initial_interval.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

async fn deliver(
    broker: &Arc<dyn MessageBroker>,
    handler: &Arc<dyn MessageHandler>,
    policy: RedeliveryPolicy,
    message: Message,
) {
    let error = match handler.handle(&message).await {
        Ok(()) => {
            debug!("Handled message {} on {}", message.id, message.topic);
            return;
        }
        Err(e) => e,
    };

    let attempt = message.attempt + 1;
    if attempt >= policy.max_attempts {
        error!(
            "Dead-lettering message {} on {} after {} attempts: {}",
            message.id, message.topic, attempt, error
        );
        let mut dead = message;
        dead.topic = dead_letter_topic(&dead.topic);
        dead.attempt = attempt;
        if let Err(e) = broker.publish(dead).await {
            error!("Failed to dead-letter message: {}", e);
        }
        return;
    }

    let delay = policy.delay(attempt);
    warn!(
        "Message {} on {} failed (attempt {}): {}; redelivering in {:?}",
        message.id, message.topic, attempt, error, delay
    );

    let mut retry = message;
    retry.attempt = attempt;
    let broker = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = broker.publish(retry).await {
            error!("Failed to redeliver message: {}", e);
        }
    });
}

/// Start `pool_size` workers consuming `topic`. Workers stop when the
/// shutdown signal flips; a message being handled is finished first.
pub fn spawn_subscriber_pool(
    broker: Arc<dyn MessageBroker>,
    topic: &str,
    pool_size: usize,
    policy: RedeliveryPolicy,
    handler: Arc<dyn MessageHandler>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let receiver = broker.subscribe(topic);

    (0..pool_size.max(1))
        .map(|worker| {
            let broker = broker.clone();
            let handler = handler.clone();
            let receiver = receiver.clone();
            let mut shutdown = shutdown.clone();
            let topic = topic.to_string();

            tokio::spawn(async move {
                debug!("Subscriber {} on {} started", worker, topic);
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        received = receiver.recv_async() => match received {
                            Ok(message) => deliver(&broker, &handler, policy, message).await,
                            Err(_) => break,
                        },
                    }
                }
                debug!("Subscriber {} on {} stopped", worker, topic);
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        async fn handle(&self, _message: &Message) -> Result<(), BrokerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(BrokerError::Handler(format!("failure {}", call)))
            } else {
                Ok(())
            }
        }
    }

    fn policy(max_attempts: u32) -> RedeliveryPolicy {
        RedeliveryPolicy {
            initial_interval: Duration::from_millis(5),
            multiplier: 2.0,
            max_interval: Duration::from_millis(20),
            max_attempts,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = policy(10);
        assert_eq!(p.delay(1), Duration::from_millis(5));
        assert_eq!(p.delay(2), Duration::from_millis(10));
        assert_eq!(p.delay(3), Duration::from_millis(20));
        assert_eq!(p.delay(9), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_failed_messages_are_redelivered() {
        let broker: Arc<dyn MessageBroker> = Arc::new(MemoryBroker::new());
        let handler = Arc::new(FlakyHandler {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let (stop, shutdown) = watch::channel(false);
        let workers = spawn_subscriber_pool(broker.clone(), "t", 2, policy(5), handler.clone(), shutdown);

        broker.publish(Message::new("t", b"x".to_vec())).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.calls.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop.send(true).unwrap();
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_exhausted_messages_are_dead_lettered() {
        let broker: Arc<dyn MessageBroker> = Arc::new(MemoryBroker::new());
        let handler = Arc::new(FlakyHandler {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let dead = broker.subscribe(&dead_letter_topic("t"));
        let (_stop, shutdown) = watch::channel(false);
        spawn_subscriber_pool(broker.clone(), "t", 1, policy(2), handler.clone(), shutdown);

        broker.publish(Message::new("t", b"x".to_vec())).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), dead.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.attempt, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }
}
