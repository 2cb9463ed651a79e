//! Notification record storage.
//!
//! `RecordStore` is the write-back interface used by the outcome recorder and
//! the read side used by the watcher. Updates must be idempotent for the same
//! terminal values and must never move a terminal record to another status.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;

use chatpush_common::error::AppError;
use chatpush_common::types::{DeliveryStatus, NotificationRecord};

/// Fields written when a record reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("notification {0} not found")]
    NotFound(String),

    #[error("notification {id} is already {current}, refusing to mark it {requested}")]
    InvalidTransition {
        id: String,
        current: DeliveryStatus,
        requested: DeliveryStatus,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => AppError::NotFound(format!("notification {}", id)),
            StorageError::Database(e) => AppError::Database(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

pub trait RecordStore: Send + Sync {
    fn fetch(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<NotificationRecord>, StorageError>> + Send;

    /// Oldest pending records first, at most `limit`.
    fn pending(
        &self,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<NotificationRecord>, StorageError>> + Send;

    /// Apply a terminal status update.
    ///
    /// Allowed when the record is `pending` or already carries the same
    /// status. An existing `sent_at`/`message_id` is kept, so restating a
    /// delivery does not produce a second timestamp. Returns `true` only when
    /// this call moved the record out of `pending`.
    fn update(
        &self,
        id: &str,
        update: &StatusUpdate,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;
}

impl<T: RecordStore> RecordStore for Arc<T> {
    fn fetch(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<NotificationRecord>, StorageError>> + Send {
        (**self).fetch(id)
    }

    fn pending(
        &self,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<NotificationRecord>, StorageError>> + Send {
        (**self).pending(limit)
    }

    fn update(
        &self,
        id: &str,
        update: &StatusUpdate,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send {
        (**self).update(id, update)
    }
}

/// Apply `update` to an in-memory record using the store transition rules.
/// Returns whether the record left `pending`.
pub fn apply_update(
    record: &mut NotificationRecord,
    update: &StatusUpdate,
) -> Result<bool, StorageError> {
    if record.status.is_terminal() && record.status != update.status {
        return Err(StorageError::InvalidTransition {
            id: record.id.clone(),
            current: record.status,
            requested: update.status,
        });
    }

    let transitioned = record.status == DeliveryStatus::Pending;
    record.status = update.status;
    record.sent_at = record.sent_at.or(update.sent_at);
    if record.message_id.is_none() {
        record.message_id = update.message_id.clone();
    }
    record.error = update.error.clone();
    Ok(transitioned)
}

const RECORD_COLUMNS: &str = "id, recipient_token, title, body, chat_id, sender_id, status, error, message_id, sent_at, created_at";

/// PostgreSQL-backed store over the `notifications` table.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new pending record. Used by producers and tests; the insert
    /// fires the `notification_created` trigger.
    pub async fn insert(&self, record: &NotificationRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, recipient_token, title, body, chat_id, sender_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.id)
        .bind(&record.recipient_token)
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.chat_id)
        .bind(&record.sender_id)
        .bind(record.status.to_string())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl RecordStore for PgRecordStore {
    async fn fetch(&self, id: &str) -> Result<Option<NotificationRecord>, StorageError> {
        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            "SELECT {} FROM notifications WHERE id = $1",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn pending(&self, limit: i64) -> Result<Vec<NotificationRecord>, StorageError> {
        let records = sqlx::query_as::<_, NotificationRecord>(&format!(
            "SELECT {} FROM notifications WHERE status = 'pending' ORDER BY created_at LIMIT $1",
            RECORD_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn update(&self, id: &str, update: &StatusUpdate) -> Result<bool, StorageError> {
        // Two guarded writes: the first only matches a pending row, so its
        // row count tells a fresh transition apart from a restatement.
        // COALESCE keeps the first delivery timestamp.
        let sql = |guard: &str| {
            format!(
                r#"
                UPDATE notifications
                SET status = $2,
                    sent_at = COALESCE(sent_at, $3),
                    message_id = COALESCE(message_id, $4),
                    error = $5
                WHERE id = $1 AND status = {}
                "#,
                guard
            )
        };

        for (guard, transitioned) in [("'pending'", true), ("$2", false)] {
            let result = sqlx::query(&sql(guard))
                .bind(id)
                .bind(update.status.to_string())
                .bind(update.sent_at)
                .bind(&update.message_id)
                .bind(&update.error)
                .execute(&self.pool)
                .await?;

            if result.rows_affected() > 0 {
                return Ok(transitioned);
            }
        }

        let current: Option<(DeliveryStatus,)> =
            sqlx::query_as("SELECT status FROM notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            None => Err(StorageError::NotFound(id.to_string())),
            Some((current,)) => Err(StorageError::InvalidTransition {
                id: id.to_string(),
                current,
                requested: update.status,
            }),
        }
    }
}

/// In-process store for local runs and tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, NotificationRecord>>,
    updates: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: NotificationRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<NotificationRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(id).cloned()
    }

    /// Number of `update` calls received, successful or not.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl RecordStore for MemoryRecordStore {
    async fn fetch(&self, id: &str) -> Result<Option<NotificationRecord>, StorageError> {
        Ok(self.get(id))
    }

    async fn pending(&self, limit: i64) -> Result<Vec<NotificationRecord>, StorageError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<NotificationRecord> = records
            .values()
            .filter(|r| r.status == DeliveryStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn update(&self, id: &str, update: &StatusUpdate) -> Result<bool, StorageError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        apply_update(record, update)
    }
}
