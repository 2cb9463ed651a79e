//! Per-event pipeline: gate → validate → dispatch → record.
//!
//! `NotificationDispatcher::handle` is invoked once per creation event and
//! holds no per-invocation state, so the watcher can run invocations for
//! different records concurrently from a shared `Arc`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;

use chatpush_common::config::DispatchConfig;
use chatpush_common::types::{CreatedEvent, DeliveryStatus, DispatchOutcome};

use crate::dead_letter::{DeadLetterSink, DiscardDeadLetters};
use crate::engine::{DispatchEngine, RetryPolicy};
use crate::gate;
use crate::gateway::PushGateway;
use crate::recorder::OutcomeRecorder;
use crate::store::{RecordStore, StorageError};
use crate::validator;

/// What an invocation did with its event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Record was already terminal; nothing was sent or written.
    Skipped { status: DeliveryStatus },
    /// A terminal status was written.
    Recorded {
        status: DeliveryStatus,
        outcome: DispatchOutcome,
    },
}

/// The only error class that escapes an invocation.
///
/// Validation and gateway failures become terminal record states instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to record outcome for notification {record_id}: {source}")]
    Storage {
        record_id: String,
        #[source]
        source: StorageError,
    },
}

/// Invocation counters exposed by the `/stats` endpoint.
#[derive(Debug, Default)]
pub struct DispatchStats {
    invocations: AtomicU64,
    skipped: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    storage_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub invocations: u64,
    pub skipped: u64,
    pub sent: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub storage_errors: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }

    fn count_status(&self, status: DeliveryStatus) {
        let counter = match status {
            DeliveryStatus::Pending => return,
            DeliveryStatus::Sent => &self.sent,
            DeliveryStatus::Failed => &self.failed,
            DeliveryStatus::DeadLettered => &self.dead_lettered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct NotificationDispatcher<G, S, D = DiscardDeadLetters> {
    engine: DispatchEngine<G>,
    recorder: OutcomeRecorder<S, D>,
    stats: Arc<DispatchStats>,
}

impl<G: PushGateway, S: RecordStore> NotificationDispatcher<G, S, DiscardDeadLetters> {
    /// Dispatcher that records exhausted retries as `failed`.
    pub fn new(gateway: G, store: S, config: &DispatchConfig) -> Self {
        Self::with_dead_letters(gateway, store, DiscardDeadLetters, config)
    }
}

impl<G: PushGateway, S: RecordStore, D: DeadLetterSink> NotificationDispatcher<G, S, D> {
    pub fn with_dead_letters(
        gateway: G,
        store: S,
        dead_letters: D,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            engine: DispatchEngine::new(gateway, RetryPolicy::from(config)),
            recorder: OutcomeRecorder::with_dead_letters(
                store,
                dead_letters,
                config.exhaustion_policy,
            ),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Handle to the counters that outlives borrows of the dispatcher.
    pub fn shared_stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Handle one creation event.
    ///
    /// Returns `Err` only when the terminal status could not be written. The
    /// notification may already have been sent in that case; the caller
    /// must not retry the send.
    pub async fn handle(&self, event: &CreatedEvent) -> Result<Disposition, DispatchError> {
        self.stats.invocations.fetch_add(1, Ordering::Relaxed);
        let record_id = event.record_id.as_str();

        if !gate::should_dispatch(&event.record) {
            tracing::debug!(
                record_id = %record_id,
                status = %event.record.status,
                "Notification already processed, skipping"
            );
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(Disposition::Skipped {
                status: event.record.status,
            });
        }

        let outcome = match validator::validate(&event.record) {
            Ok(request) => self.engine.dispatch(&request).await,
            Err(e) => {
                tracing::warn!(record_id = %record_id, error = %e, "Invalid notification record");
                DispatchOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        };

        match self.recorder.record(record_id, &outcome).await {
            Ok(status) => {
                self.stats.count_status(status);
                match &outcome {
                    DispatchOutcome::Delivered { message_id } => tracing::info!(
                        record_id = %record_id,
                        message_id = %message_id,
                        "Notification sent"
                    ),
                    DispatchOutcome::Rejected { reason }
                    | DispatchOutcome::Transient { reason } => tracing::info!(
                        record_id = %record_id,
                        status = %status,
                        reason = %reason,
                        "Notification not delivered"
                    ),
                }
                Ok(Disposition::Recorded { status, outcome })
            }
            Err(source) => {
                self.stats.storage_errors.fetch_add(1, Ordering::Relaxed);
                Err(DispatchError::Storage {
                    record_id: record_id.to_string(),
                    source,
                })
            }
        }
    }
}
