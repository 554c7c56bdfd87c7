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

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ed25519_dalek::VerifyingKey;
use rand::RngCore;
use tracing::{error, info, warn};

use orb_core::broker::{MemoryBroker, MessageBroker};
use orb_core::cas::{CasResolver, IpfsCas, LocalCas, WebFingerCasResolver};
use orb_core::clock::{Clock, SystemClock};
use orb_core::config::{ConfigError, LogEndpointConfig, OrbConfig, StoreBackend};
use orb_core::federation::BrokerOutbox;
use orb_core::monitoring::LogEndpoint;
use orb_core::store::{KeyValueStore, MemoryStore, RedisStore};
use orb_core::telemetry::init_tracing;
use orb_core::translog::{HttpLogClient, LogClient, MemoryLog};
use orb_core::{NodeDependencies, OrbError, OrbNode};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file; ORB__* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default tracing filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_filter: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node until interrupted (default)
    Run,

    /// Load and validate the configuration, then exit
    CheckConfig,
}

fn parse_key(endpoint: &LogEndpointConfig) -> Result<Option<VerifyingKey>, ConfigError> {
    let Some(text) = &endpoint.public_key else {
        return Ok(None);
    };
    let invalid = |reason: String| ConfigError::Invalid(format!("public key of {}: {}", endpoint.url, reason));

    let bytes: [u8; 32] = hex::decode(text)
        .map_err(|e| invalid(e.to_string()))?
        .try_into()
        .map_err(|_| invalid("expected 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes)
        .map(Some)
        .map_err(|e| invalid(e.to_string()))
}

fn signing_key(config: &OrbConfig) -> Result<[u8; 32], ConfigError> {
    match &config.node.signing_key_hex {
        Some(text) => hex::decode(text)
            .map_err(|e| ConfigError::Invalid(format!("node.signing_key_hex: {}", e)))?
            .try_into()
            .map_err(|_| ConfigError::Invalid("node.signing_key_hex must be 32 bytes".to_string())),
        None => {
            warn!("No signing key configured; generating an ephemeral one");
            let mut key = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            Ok(key)
        }
    }
}

async fn dependencies(config: &OrbConfig) -> Result<NodeDependencies, OrbError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let timeout = Duration::from_secs(config.cas.request_timeout_secs);

    let store: Arc<dyn KeyValueStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Redis => Arc::new(RedisStore::connect(config.store.redis.clone()).await?),
    };

    let mut cas = CasResolver::new(Arc::new(LocalCas::new(store.clone())), config.cas.cache_size);
    if let Some(endpoint) = &config.cas.ipfs_endpoint {
        cas = cas.with_alternate(Arc::new(IpfsCas::new(endpoint, timeout)?));
    }
    if config.cas.remote_resolution {
        cas = cas.with_remote(Arc::new(WebFingerCasResolver::new(timeout)?));
    }

    let key = signing_key(config)?;
    let mut logs = Vec::new();
    let log_timeout = Duration::from_secs(config.log_monitor.request_timeout_secs);
    for endpoint in &config.log_monitor.endpoints {
        let client: Arc<dyn LogClient> = Arc::new(HttpLogClient::new(&endpoint.url, log_timeout)?);
        logs.push(LogEndpoint::new(client, parse_key(endpoint)?));
    }
    if logs.is_empty() {
        info!("No log endpoints configured; running an in-memory log");
        let log = Arc::new(MemoryLog::new("memory://orb-log", &key, clock.clone()));
        let verifying_key = log.verifying_key();
        logs.push(LogEndpoint::new(log, Some(verifying_key)));
    }

    let broker: Arc<dyn MessageBroker> = Arc::new(MemoryBroker::new());
    Ok(NodeDependencies {
        store,
        cas: Arc::new(cas),
        logs,
        outbox: Arc::new(BrokerOutbox::new(broker.clone())),
        broker,
        clock,
        signing_key: Some(key),
    })
}

async fn run(config: OrbConfig) -> Result<(), OrbError> {
    let deps = dependencies(&config).await?;
    let node = OrbNode::build(config, deps).await?;
    let handle = node.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter);

    let config = OrbConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await?,
        Commands::CheckConfig => {
            config.validate()?;
            println!("Configuration for {} is valid", config.node.node_id);
        }
    }

    Ok(())
}
