//! Request deduplication.
//!
//! A recorder remembers every idempotency key it has been shown. The check
//! and the mark are one atomic step, so when several requests race with the
//! same fresh key exactly one of them sees it as new.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{Config, IdempotencyBackend};

pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";
const IDEMPOTENCY_PREFIX: &str = "idempotency:";

/// A client-supplied idempotency key. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Returns `None` for blank input: a request without a usable key skips
    /// deduplication entirely.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait IdempotencyRecorder: Send + Sync {
    /// Returns whether `key` was recorded before this call, and records it.
    /// Already-seen keys are re-marked rather than rejected; the caller
    /// decides what a repeat means.
    async fn seen_before(&self, key: &IdempotencyKey) -> bool;
}

/// Process-local recorder. Keys live for the life of the process.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    keys: Mutex<HashSet<String>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyRecorder for InMemoryRecorder {
    async fn seen_before(&self, key: &IdempotencyKey) -> bool {
        // `insert` reports whether the key was absent, under the same lock.
        !self.keys.lock().await.insert(key.as_str().to_string())
    }
}

/// Recorder shared across instances through Redis `SET NX`.
#[derive(Clone)]
pub struct RedisRecorder {
    redis_client: redis::Client,
    ttl_secs: Option<u64>,
}

impl RedisRecorder {
    pub fn new(redis_url: &str, ttl_secs: Option<u64>) -> anyhow::Result<Self> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self {
            redis_client,
            ttl_secs,
        })
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    /// `true` when the key was newly set, `false` when it already existed.
    async fn try_mark(&self, key: &IdempotencyKey) -> anyhow::Result<bool> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let redis_key = format!("{}{}", IDEMPOTENCY_PREFIX, key);

        let mut cmd = redis::cmd("SET");
        cmd.arg(&redis_key).arg(1).arg("NX");
        if let Some(ttl) = self.ttl_secs {
            cmd.arg("EX").arg(ttl);
        }

        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl IdempotencyRecorder for RedisRecorder {
    async fn seen_before(&self, key: &IdempotencyKey) -> bool {
        match self.try_mark(key).await {
            Ok(newly_marked) => !newly_marked,
            Err(e) => {
                // Fail open: an outage of the dedup store must not stop writes.
                tracing::error!(idempotency_key = %key, "idempotency check failed: {}", e);
                false
            }
        }
    }
}

/// Builds the recorder selected by `IDEMPOTENCY_BACKEND`.
pub fn recorder_from_config(config: &Config) -> anyhow::Result<Arc<dyn IdempotencyRecorder>> {
    match config.idempotency_backend {
        IdempotencyBackend::Memory => Ok(Arc::new(InMemoryRecorder::new())),
        IdempotencyBackend::Redis => Ok(Arc::new(RedisRecorder::new(
            &config.redis_url,
            config.idempotency_ttl_secs,
        )?)),
    }
}
