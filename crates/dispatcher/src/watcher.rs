//! Record watcher: Postgres change feed → dispatcher invocations.
//!
//! The `notifications` insert trigger publishes each new id on
//! [`CREATED_CHANNEL`]. The watcher subscribes, loads the record, and spawns
//! one dispatcher invocation per id.
//!
//! NOTIFY is fire-and-forget: ids announced while the listener is
//! reconnecting are gone, and a record whose write-back failed stays pending
//! with no further announcement. The watcher therefore sweeps pending
//! records on startup, after every listener reconnect, and on a fixed
//! interval.
//!
//! Delivery is at-least-once: an id may arrive both from a sweep and from
//! the channel. An in-process in-flight set drops a second concurrent
//! invocation for the same id; redelivery after completion is handled by the
//! dispatcher's gate.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use chatpush_common::db::CREATED_CHANNEL;
use chatpush_common::types::CreatedEvent;
use chatpush_notifier::dead_letter::DeadLetterSink;
use chatpush_notifier::dispatcher::NotificationDispatcher;
use chatpush_notifier::gateway::PushGateway;
use chatpush_notifier::store::RecordStore;

/// Ids with an invocation currently running in this process.
#[derive(Debug, Default, Clone)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// Claim `id`. Returns `None` if another invocation already holds it.
    pub fn claim(&self, id: &str) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            ids: Arc::clone(&self.ids),
            id: id.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the claimed id on drop.
pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

pub struct RecordWatcher<G, S, D> {
    dispatcher: Arc<NotificationDispatcher<G, S, D>>,
    store: S,
    pool: PgPool,
    sweep_limit: i64,
    resweep_every: Duration,
    in_flight: InFlight,
}

impl<G, S, D> RecordWatcher<G, S, D>
where
    G: PushGateway + 'static,
    S: RecordStore + Clone + 'static,
    D: DeadLetterSink + 'static,
{
    pub fn new(
        dispatcher: Arc<NotificationDispatcher<G, S, D>>,
        store: S,
        pool: PgPool,
        sweep_limit: i64,
        resweep_every: Duration,
    ) -> Self {
        Self {
            dispatcher,
            store,
            pool,
            sweep_limit,
            resweep_every: resweep_every.max(Duration::from_millis(1)),
            in_flight: InFlight::default(),
        }
    }

    /// Listen for new records until the listener fails for good or the task
    /// is cancelled.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CREATED_CHANNEL).await?;
        tracing::info!(channel = CREATED_CHANNEL, "Listening for new notifications");

        // Subscribe before the first sweep so nothing inserted during it is missed.
        self.sweep().await?;

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.resweep_every,
            self.resweep_every,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.resweep("interval").await,
                notification = listener.try_recv() => match notification? {
                    Some(notification) => {
                        let record_id = notification.payload().to_string();
                        tracing::debug!(record_id = %record_id, "Notification created");
                        self.spawn_dispatch(record_id);
                    }
                    None => {
                        // The next try_recv reconnects; anything announced in between is lost.
                        tracing::warn!("Notification listener connection lost");
                        self.resweep("reconnect").await;
                    }
                },
            }
        }
    }

    /// Spawn an invocation for every pending record, oldest first.
    ///
    /// Each invocation reloads its record after claiming the id, so a record
    /// finished between the query and the claim is seen as terminal.
    pub async fn sweep(&self) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let pending = self.store.pending(self.sweep_limit).await?;
        let handles: Vec<_> = pending
            .into_iter()
            .filter_map(|record| self.spawn_dispatch(record.id))
            .collect();
        if !handles.is_empty() {
            tracing::info!(count = handles.len(), "Replaying pending notifications");
        }
        Ok(handles)
    }

    async fn resweep(&self, trigger: &'static str) {
        if let Err(e) = self.sweep().await {
            tracing::warn!(trigger, error = %e, "Pending notification sweep failed");
        }
    }

    fn spawn_dispatch(&self, record_id: String) -> Option<JoinHandle<()>> {
        let guard = self.claim(&record_id)?;
        let dispatcher = Arc::clone(&self.dispatcher);
        let store = self.store.clone();

        Some(tokio::spawn(async move {
            let _guard = guard;
            match store.fetch(&record_id).await {
                Ok(Some(record)) => {
                    let event = CreatedEvent::from(record);
                    Self::invoke(&dispatcher, &event).await;
                }
                Ok(None) => {
                    tracing::warn!(record_id = %record_id, "Announced notification not found");
                }
                Err(e) => {
                    tracing::error!(
                        record_id = %record_id,
                        error = %e,
                        "Failed to load notification"
                    );
                }
            }
        }))
    }

    fn claim(&self, record_id: &str) -> Option<InFlightGuard> {
        let guard = self.in_flight.claim(record_id);
        if guard.is_none() {
            tracing::debug!(record_id = %record_id, "Notification already in flight, skipping");
        }
        guard
    }

    async fn invoke(dispatcher: &NotificationDispatcher<G, S, D>, event: &CreatedEvent) {
        if let Err(e) = dispatcher.handle(event).await {
            // Never resend here; the next sweep re-enters at the gate.
            tracing::error!(
                record_id = %event.record_id,
                error = %e,
                "Notification outcome not recorded"
            );
        }
    }
}
