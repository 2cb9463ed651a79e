//! Outcome recorder: the only writer of a record's terminal status.
//!
//! | outcome               | status          | fields          |
//! |-----------------------|-----------------|-----------------|
//! | `Delivered`           | `sent`          | sent_at, message_id |
//! | `Rejected`            | `failed`        | error           |
//! | `Transient` (exhausted) | `failed` or `dead_lettered` per policy | error |
//!
//! A failed write is returned to the caller and never retried here; the
//! watcher's redelivery re-enters the pipeline at the gate.

use chrono::{DateTime, Utc};

use chatpush_common::config::ExhaustionPolicy;
use chatpush_common::types::{DeliveryStatus, DispatchOutcome};

use crate::dead_letter::{DeadLetterEntry, DeadLetterSink, DiscardDeadLetters};
use crate::store::{RecordStore, StatusUpdate, StorageError};

pub struct OutcomeRecorder<S, D = DiscardDeadLetters> {
    store: S,
    dead_letters: D,
    policy: ExhaustionPolicy,
}

impl<S: RecordStore> OutcomeRecorder<S, DiscardDeadLetters> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            dead_letters: DiscardDeadLetters,
            policy: ExhaustionPolicy::Fail,
        }
    }
}

impl<S: RecordStore, D: DeadLetterSink> OutcomeRecorder<S, D> {
    pub fn with_dead_letters(store: S, dead_letters: D, policy: ExhaustionPolicy) -> Self {
        Self {
            store,
            dead_letters,
            policy,
        }
    }

    /// Persist the terminal state for `outcome` and return the status written.
    pub async fn record(
        &self,
        record_id: &str,
        outcome: &DispatchOutcome,
    ) -> Result<DeliveryStatus, StorageError> {
        let update = status_update(outcome, self.policy, Utc::now());

        let transitioned = match self.store.update(record_id, &update).await {
            Ok(transitioned) => transitioned,
            Err(e) => {
                tracing::error!(
                    record_id = %record_id,
                    status = %update.status,
                    error = %e,
                    "Failed to record notification outcome"
                );
                return Err(e);
            }
        };

        // A restated outcome must not queue the record a second time.
        if transitioned && update.status == DeliveryStatus::DeadLettered {
            let entry = DeadLetterEntry::new(record_id, update.error.clone().unwrap_or_default());
            if let Err(e) = self.dead_letters.park(&entry).await {
                // The record already says dead_lettered; the queue entry is best effort.
                tracing::warn!(
                    record_id = %record_id,
                    error = %e,
                    "Failed to enqueue dead letter"
                );
            }
        }

        Ok(update.status)
    }
}

/// Map an outcome onto the fields written back to the record.
pub fn status_update(
    outcome: &DispatchOutcome,
    policy: ExhaustionPolicy,
    now: DateTime<Utc>,
) -> StatusUpdate {
    match outcome {
        DispatchOutcome::Delivered { message_id } => StatusUpdate {
            status: DeliveryStatus::Sent,
            sent_at: Some(now),
            message_id: Some(message_id.clone()),
            error: None,
        },
        DispatchOutcome::Rejected { reason } => StatusUpdate {
            status: DeliveryStatus::Failed,
            sent_at: None,
            message_id: None,
            error: Some(reason.clone()),
        },
        DispatchOutcome::Transient { reason } => StatusUpdate {
            status: match policy {
                ExhaustionPolicy::Fail => DeliveryStatus::Failed,
                ExhaustionPolicy::DeadLetter => DeliveryStatus::DeadLettered,
            },
            sent_at: None,
            message_id: None,
            error: Some(reason.clone()),
        },
    }
}
