//! Idempotency gate.
//!
//! The watcher may redeliver a creation event after a crash. The record's own
//! status is the only dedup state: anything past `pending` has already been
//! dispatched (or given up on) and must not be sent again.
//!
//! Two redeliveries processed concurrently can both observe `pending` and
//! both pass. The store's conditional write keeps the terminal status stable
//! in that case, but the duplicate send is not prevented here.

use chatpush_common::types::{DeliveryStatus, NotificationRecord};

/// Returns `true` when the record has not been dispatched yet.
pub fn should_dispatch(record: &NotificationRecord) -> bool {
    record.status == DeliveryStatus::Pending
}
