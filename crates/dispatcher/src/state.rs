//! Shared state for the HTTP routes.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use chatpush_notifier::dispatcher::DispatchStats;
use chatpush_notifier::store::PgRecordStore;

#[derive(Clone)]
pub struct AppState {
    pub stats: Arc<DispatchStats>,
    pub store: PgRecordStore,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(stats: Arc<DispatchStats>, store: PgRecordStore) -> Self {
        Self {
            stats,
            store,
            started_at: Utc::now(),
        }
    }
}
