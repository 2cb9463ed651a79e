//! Dead-letter sinks for notifications whose retries ran out.
//!
//! Only used with `ExhaustionPolicy::DeadLetter`. The record itself is marked
//! `dead_lettered`; the sink keeps a queue an operator (or a later replay job)
//! can drain.

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Redis list holding dead-lettered notifications, newest first.
pub const DEAD_LETTER_KEY: &str = "notifications:dead_letter";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub entry_id: Uuid,
    pub record_id: String,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            record_id: record_id.into(),
            reason: reason.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait DeadLetterSink: Send + Sync {
    fn park(&self, entry: &DeadLetterEntry)
    -> impl Future<Output = Result<(), DeadLetterError>> + Send;
}

impl<T: DeadLetterSink> DeadLetterSink for Arc<T> {
    fn park(
        &self,
        entry: &DeadLetterEntry,
    ) -> impl Future<Output = Result<(), DeadLetterError>> + Send {
        (**self).park(entry)
    }
}

/// Drops every entry. Paired with `ExhaustionPolicy::Fail`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardDeadLetters;

impl DeadLetterSink for DiscardDeadLetters {
    async fn park(&self, _entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        Ok(())
    }
}

/// Redis `LPUSH` queue of JSON-encoded entries.
#[derive(Clone)]
pub struct RedisDeadLetterQueue {
    redis: ConnectionManager,
    key: String,
}

impl RedisDeadLetterQueue {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            key: DEAD_LETTER_KEY.to_string(),
        }
    }
}

impl DeadLetterSink for RedisDeadLetterQueue {
    async fn park(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        let payload = serde_json::to_string(entry)?;
        let mut redis = self.redis.clone();
        redis.lpush::<_, _, ()>(&self.key, payload).await?;

        tracing::info!(
            record_id = %entry.record_id,
            entry_id = %entry.entry_id,
            key = %self.key,
            "Notification dead-lettered"
        );
        Ok(())
    }
}

/// Collects entries in memory. For tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryDeadLetters {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl MemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl DeadLetterSink for MemoryDeadLetters {
    async fn park(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }
}
