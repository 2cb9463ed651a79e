use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery status of a notification record.
///
/// `Pending` is the only non-terminal state. Once a record leaves it, the
/// status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    DeadLettered,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

/// A chat notification waiting to be pushed to one device.
///
/// Upstream producers insert these with `status = pending`; only the outcome
/// recorder mutates them afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: String,
    /// FCM registration token of the receiving device.
    pub recipient_token: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub chat_id: Option<String>,
    pub sender_id: Option<String>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// A fresh pending record with only the identifier set.
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            recipient_token: None,
            title: None,
            body: None,
            chat_id: None,
            sender_id: None,
            status: DeliveryStatus::Pending,
            error: None,
            message_id: None,
            sent_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Trigger emitted by the record watcher when a notification row is inserted.
///
/// Delivery is at-least-once; the same record may arrive more than once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub record_id: String,
    pub record: NotificationRecord,
}

impl From<NotificationRecord> for CreatedEvent {
    fn from(record: NotificationRecord) -> Self {
        Self {
            record_id: record.id.clone(),
            record,
        }
    }
}

/// Validated, ready-to-send projection of a `NotificationRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub token: String,
    pub title: String,
    pub body: String,
    /// String-only data payload delivered alongside the visible notification.
    pub data: BTreeMap<String, String>,
}

/// Classified result of dispatching one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The gateway accepted the message.
    Delivered { message_id: String },
    /// Permanent failure; retrying cannot help.
    Rejected { reason: String },
    /// Retryable failure. Seen by the recorder only once retries are exhausted.
    Transient { reason: String },
}

impl DispatchOutcome {
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchOutcome::Transient { .. })
    }
}
