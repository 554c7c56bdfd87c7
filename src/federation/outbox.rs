// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{Activity, ActivityType, FederationError};
use crate::broker::{Message, MessageBroker, ACTIVITY_OUTBOUND_TOPIC};

/// Outgoing activity sink. Delivery is at-least-once.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send(&self, activity: &Activity) -> Result<(), FederationError>;
}

/// Queues activities on the outbound broker topic for delivery
pub struct BrokerOutbox {
    broker: Arc<dyn MessageBroker>,
}

impl BrokerOutbox {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Outbox for BrokerOutbox {
    async fn send(&self, activity: &Activity) -> Result<(), FederationError> {
        let message = Message::json(ACTIVITY_OUTBOUND_TOPIC, activity)?;
        self.broker.publish(message).await?;
        debug!("Queued {} {} to {:?}", activity.activity_type, activity.id, activity.to);
        Ok(())
    }
}

/// Records sent activities in memory
#[derive(Default)]
pub struct MemoryOutbox {
    sent: Mutex<Vec<Activity>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Activity> {
        self.sent.lock().clone()
    }

    pub fn sent_of_type(&self, activity_type: ActivityType) -> Vec<Activity> {
        self.sent
            .lock()
            .iter()
            .filter(|a| a.activity_type == activity_type)
            .cloned()
            .collect()
    }

    /// Drain everything sent so far
    pub fn take(&self) -> Vec<Activity> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl Outbox for MemoryOutbox {
    async fn send(&self, activity: &Activity) -> Result<(), FederationError> {
        self.sent.lock().push(activity.clone());
        Ok(())
    }
}
