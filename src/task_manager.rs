// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Lease-based scheduling of periodic tasks across node instances.
//!
//! Every node registers the same tasks and ticks them on its own timer.
//! On each tick a node tries to acquire or extend the task's lease with a
//! conditional write; only the holder runs the task. An owner that stops
//! ticking loses the lease when it expires and the next node to tick takes
//! it over.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::event_data;
use crate::store::{Collection, KeyValueStore, StoreError};
use crate::telemetry::TelemetryReporter;

/// Result of one task run
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// Error types for the task manager
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task {task} failed: {reason}")]
    Failed { task: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Time-bounded ownership of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLease {
    pub task: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

struct RegisteredTask {
    interval: StdDuration,
    run: TaskFn,
    /// Runs on every node without a lease
    local: bool,
}

/// Runs registered tasks on whichever node holds each task's lease
pub struct TaskManager {
    node_id: String,
    leases: Collection<TaskLease>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<TelemetryReporter>,
    lease_duration: Duration,
    tasks: RwLock<BTreeMap<String, RegisteredTask>>,
}

impl TaskManager {
    pub fn new(
        node_id: &str,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        telemetry: Arc<TelemetryReporter>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            leases: Collection::new(store, "task-lease"),
            clock,
            telemetry,
            lease_duration,
            tasks: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Register a periodic task. Re-registering a name replaces it.
    pub fn register_task<F, Fut>(&self, name: &str, interval: StdDuration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        if self.lease_duration.to_std().map_or(true, |lease| lease <= interval) {
            warn!(
                "Lease of {}s does not exceed the interval of task {} ({:?})",
                self.lease_duration.num_seconds(),
                name,
                interval
            );
        }

        self.insert(name, interval, false, task);
    }

    /// Register a periodic task over this node's own in-memory state. It
    /// runs on every node and takes no lease.
    pub fn register_local_task<F, Fut>(&self, name: &str, interval: StdDuration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.insert(name, interval, true, task);
    }

    fn insert<F, Fut>(&self, name: &str, interval: StdDuration, local: bool, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let run: TaskFn = Arc::new(move || -> BoxFuture<'static, TaskResult> { Box::pin(task()) });
        self.tasks
            .write()
            .insert(name.to_string(), RegisteredTask { interval, run, local });
        debug!("Registered task {} every {:?}", name, interval);
    }

    /// Names of registered tasks
    pub fn tasks(&self) -> Vec<String> {
        self.tasks.read().keys().cloned().collect()
    }

    /// Current lease for a task
    pub async fn lease(&self, task: &str) -> Result<Option<TaskLease>, TaskError> {
        Ok(self.leases.get(task).await?.map(|(lease, _)| lease))
    }

    /// Acquire, extend or take over the lease. `false` if another node
    /// holds a live lease or won a concurrent write.
    async fn acquire(&self, task: &str) -> Result<bool, TaskError> {
        let now = self.clock.now();
        let expires_at = now + self.lease_duration;

        match self.leases.get(task).await? {
            None => {
                let lease = TaskLease {
                    task: task.to_string(),
                    owner: self.node_id.clone(),
                    acquired_at: now,
                    expires_at,
                };
                let acquired = self.leases.insert_new(task, &lease).await?;
                if acquired {
                    info!("Node {} acquired lease for task {}", self.node_id, task);
                }
                Ok(acquired)
            }
            Some((mut lease, version)) if lease.owner == self.node_id => {
                lease.expires_at = expires_at;
                Ok(self.leases.update(task, version, &lease).await?)
            }
            Some((lease, version)) if lease.expires_at <= now => {
                let previous_owner = lease.owner;
                let lease = TaskLease {
                    task: task.to_string(),
                    owner: self.node_id.clone(),
                    acquired_at: now,
                    expires_at,
                };
                let taken = self.leases.update(task, version, &lease).await?;
                if taken {
                    info!(
                        "Node {} took over task {} from {}",
                        self.node_id, task, previous_owner
                    );
                    self.telemetry.report_custom(
                        "task_lease_takeover",
                        event_data!(
                            "task" => task,
                            "owner" => self.node_id.clone(),
                            "previous_owner" => previous_owner,
                        ),
                    );
                }
                Ok(taken)
            }
            Some((lease, _)) => {
                debug!("Task {} is leased to {} until {}", task, lease.owner, lease.expires_at);
                Ok(false)
            }
        }
    }

    /// One tick of a task: run it if this node holds the lease.
    /// Returns whether the task ran.
    pub async fn run_tick(&self, task: &str) -> Result<bool, TaskError> {
        let (run, local) = self
            .tasks
            .read()
            .get(task)
            .map(|t| (t.run.clone(), t.local))
            .ok_or_else(|| TaskError::UnknownTask(task.to_string()))?;

        if !local && !self.acquire(task).await? {
            return Ok(false);
        }

        run().await.map_err(|e| TaskError::Failed {
            task: task.to_string(),
            reason: e.to_string(),
        })?;
        Ok(true)
    }

    /// Expire our lease on a task so another node can take it at once
    pub async fn release(&self, task: &str) -> Result<bool, TaskError> {
        match self.leases.get(task).await? {
            Some((mut lease, version)) if lease.owner == self.node_id => {
                lease.expires_at = self.clock.now();
                let released = self.leases.update(task, version, &lease).await?;
                if released {
                    debug!("Node {} released task {}", self.node_id, task);
                }
                Ok(released)
            }
            _ => Ok(false),
        }
    }

    /// Start one timer per registered task. Each loop checks the shutdown
    /// signal between ticks; a running tick finishes before the loop exits
    /// and the lease is released.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let tasks: Vec<(String, StdDuration)> = self
            .tasks
            .read()
            .iter()
            .map(|(name, task)| (name.clone(), task.interval))
            .collect();

        tasks
            .into_iter()
            .map(|(name, interval)| {
                let manager = self.clone();
                let mut shutdown = shutdown.clone();

                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = ticker.tick() => {
                                match manager.run_tick(&name).await {
                                    Ok(true) => debug!("Task {} ran on {}", name, manager.node_id),
                                    Ok(false) => {}
                                    Err(e) => warn!("Task {} tick failed: {}", name, e),
                                }
                            }
                        }
                    }

                    if let Err(e) = manager.release(&name).await {
                        warn!("Failed to release lease for {}: {}", name, e);
                    }
                    debug!("Task {} stopped on {}", name, manager.node_id);
                })
            })
            .collect()
    }
}
