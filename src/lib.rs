// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

pub mod clock;
pub mod store;
pub mod anchor;
pub mod cas;
pub mod witness;
pub mod telemetry;
pub mod translog;
pub mod config;
pub mod status;
pub mod monitoring;
pub mod broker;
pub mod task_manager;
pub mod observer;
pub mod federation;
pub mod writer;
pub mod expiry;
pub mod errors;
pub mod node;

// Re-export common types
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{Collection, KeyValueStore, MemoryStore, RedisStore, StoreError};
pub use anchor::{AnchorGraph, AnchorRecord, ContentHash, GraphError, OperationRef, OperationType};
pub use cas::{CasClient, CasError, CasResolver, IpfsCas, LocalCas};
pub use witness::{
    LocalWitness, PolicyOutcome, PolicyProvider, Witness, WitnessPolicy, WitnessProof,
    WitnessProofStore, WitnessSet, WitnessType,
};
pub use telemetry::TelemetryReporter;
pub use translog::{HttpLogClient, LogClient, LogError, MemoryLog, SignedTreeHead};
pub use config::{ConfigError, OrbConfig};
pub use status::{AnchorState, AnchorStatus, AnchorStatusStore, FailureReason, LogInclusion};
pub use monitoring::{
    CheckResult, LogEndpoint, LogEndpointRegistry, LogMonitor, ProofMonitor,
};
pub use broker::{MemoryBroker, Message, MessageBroker, MessageHandler};
pub use task_manager::{TaskError, TaskManager};
pub use observer::{DidAnchorIndex, KvDidAnchorIndex, ObserveOutcome, Observer, ObserverError};
pub use federation::{Activity, ActivityType, Inbox, InboxOutcome, Outbox, PeerStore};
pub use writer::{AnchorOutcome, AnchorWriter, ProofDisposition, WriterError};
pub use expiry::DataExpiryService;
pub use errors::{ErrorKind, OrbError};
pub use node::{NodeDependencies, NodeHandle, OrbNode};
