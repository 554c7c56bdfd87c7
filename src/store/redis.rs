// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, RedisError, Script};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{KeyValueStore, StoreError, StoreResult, Versioned};

const PUT_SCRIPT: &str = r#"
local ver = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'v', ARGV[1], 'ver', ver)
return ver
"#;

const PUT_IF_ABSENT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
local ver = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'v', ARGV[1], 'ver', ver)
return 1
"#;

const CAS_SCRIPT: &str = r#"
local cur = redis.call('HGET', KEYS[1], 'ver')
if not cur or tonumber(cur) ~= tonumber(ARGV[2]) then
  return 0
end
local ver = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'v', ARGV[1], 'ver', ver)
return 1
"#;

const VERSION_KEY: &str = "__version__";

/// Redis store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,

    /// Key prefix for namespacing
    pub key_prefix: String,

    /// Per-command timeout in seconds
    pub command_timeout_secs: u64,

    /// Keys fetched per SCAN round trip
    pub scan_count: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "orb".to_string(),
            command_timeout_secs: 5,
            scan_count: 200,
        }
    }
}

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        if e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

/// Key-value store on Redis. Conditional writes run as Lua scripts so the
/// version check and the write are atomic on the server.
pub struct RedisStore {
    config: RedisStoreConfig,
    connection: ConnectionManager,
    put: Script,
    put_if_absent: Script,
    cas: Script,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.clone())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!("Redis store connected to {}", config.url);

        Ok(Self {
            config,
            connection,
            put: Script::new(PUT_SCRIPT),
            put_if_absent: Script::new(PUT_IF_ABSENT_SCRIPT),
            cas: Script::new(CAS_SCRIPT),
        })
    }

    fn full_key(&self, key: &str) -> String {
        if self.config.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.config.key_prefix, key)
        }
    }

    fn strip_key<'a>(&self, full_key: &'a str) -> &'a str {
        if self.config.key_prefix.is_empty() {
            full_key
        } else {
            &full_key[self.config.key_prefix.len() + 1..]
        }
    }

    fn version_key(&self) -> String {
        self.full_key(VERSION_KEY)
    }

    async fn timed<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        let timeout = Duration::from_secs(self.config.command_timeout_secs);
        match tokio::time::timeout(timeout, f).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout),
        }
    }

    async fn read_hash(&self, full_key: &str) -> StoreResult<Option<Versioned>> {
        let mut conn = self.connection.clone();
        let (value, version): (Option<Vec<u8>>, Option<u64>) = self
            .timed(
                redis::cmd("HMGET")
                    .arg(full_key)
                    .arg("v")
                    .arg("ver")
                    .query_async(&mut conn),
            )
            .await?;

        match (value, version) {
            (Some(value), Some(version)) => Ok(Some(Versioned { value, version })),
            _ => Ok(None),
        }
    }
}

fn escape_glob(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>> {
        self.read_hash(&self.full_key(key)).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<u64> {
        let mut conn = self.connection.clone();
        let mut invocation = self.put.key(self.full_key(key));
        invocation.key(self.version_key()).arg(value);

        let version: u64 = self.timed(invocation.invoke_async(&mut conn)).await?;
        debug!("Set Redis key: {}", key);
        Ok(version)
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let mut invocation = self.put_if_absent.key(self.full_key(key));
        invocation.key(self.version_key()).arg(value);

        let written: i64 = self.timed(invocation.invoke_async(&mut conn)).await?;
        Ok(written == 1)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: Vec<u8>,
    ) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let mut invocation = self.cas.key(self.full_key(key));
        invocation
            .key(self.version_key())
            .arg(value)
            .arg(expected_version);

        let swapped: i64 = self.timed(invocation.invoke_async(&mut conn)).await?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .timed(redis::cmd("DEL").arg(self.full_key(key)).query_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Versioned)>> {
        let pattern = format!("{}*", escape_glob(&self.full_key(prefix)));
        let version_key = self.version_key();

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let mut conn = self.connection.clone();
            let (next, batch): (u64, Vec<String>) = self
                .timed(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(self.config.scan_count)
                        .query_async(&mut conn),
                )
                .await?;

            keys.extend(batch.into_iter().filter(|k| *k != version_key));
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();

        let mut entries = Vec::with_capacity(keys.len());
        for full_key in keys {
            // Deleted between SCAN and HMGET
            if let Some(versioned) = self.read_hash(&full_key).await? {
                entries.push((self.strip_key(&full_key).to_string(), versioned));
            }
        }

        Ok(entries)
    }
}
