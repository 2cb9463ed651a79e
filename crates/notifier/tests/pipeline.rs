//! End-to-end pipeline tests against in-memory collaborators.
//!
//! No external services are required:
//!
//! ```bash
//! cargo test -p chatpush-notifier --test pipeline
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chatpush_common::config::{DispatchConfig, ExhaustionPolicy};
use chatpush_common::types::{
    CreatedEvent, DeliveryStatus, DispatchOutcome, DispatchRequest, NotificationRecord,
};
use chatpush_notifier::dead_letter::MemoryDeadLetters;
use chatpush_notifier::dispatcher::{DispatchError, Disposition, NotificationDispatcher};
use chatpush_notifier::gateway::{GatewayError, GatewayErrorKind, GatewayReceipt, PushGateway};
use chatpush_notifier::store::{MemoryRecordStore, StorageError};

// ============================================================
// Fakes
// ============================================================

/// Gateway that replays a script and remembers every request it saw.
struct FakeGateway {
    script: Mutex<VecDeque<Result<GatewayReceipt, GatewayError>>>,
    requests: Mutex<Vec<DispatchRequest>>,
    calls: AtomicU32,
}

impl FakeGateway {
    fn scripted(script: Vec<Result<GatewayReceipt, GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        })
    }

    fn delivering(message_id: &str) -> Arc<Self> {
        Self::scripted(vec![Ok(GatewayReceipt {
            message_id: message_id.to_string(),
        })])
    }

    fn failing(kind: GatewayErrorKind) -> Arc<Self> {
        Self::scripted(vec![Err(GatewayError::new(kind))])
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<DispatchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl PushGateway for FakeGateway {
    async fn send(&self, request: &DispatchRequest) -> Result<GatewayReceipt, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        }
    }
}

// ============================================================
// Helpers
// ============================================================

fn config(policy: ExhaustionPolicy) -> DispatchConfig {
    DispatchConfig {
        max_attempts: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        attempt_timeout_ms: 1_000,
        exhaustion_policy: policy,
    }
}

fn chat_record(id: &str) -> NotificationRecord {
    let mut record = NotificationRecord::pending(id);
    record.recipient_token = Some("tok1".to_string());
    record.title = Some("Hi".to_string());
    record.body = Some("hello".to_string());
    record
}

fn seeded_store(record: &NotificationRecord) -> Arc<MemoryRecordStore> {
    let store = Arc::new(MemoryRecordStore::new());
    store.insert(record.clone());
    store
}

// ============================================================
// Scenarios
// ============================================================

#[tokio::test]
async fn test_delivered_record_marked_sent() {
    let record = chat_record("n1");
    let store = seeded_store(&record);
    let gateway = FakeGateway::delivering("m1");
    let dispatcher = NotificationDispatcher::new(
        gateway.clone(),
        store.clone(),
        &config(ExhaustionPolicy::Fail),
    );

    let disposition = dispatcher.handle(&record.into()).await.unwrap();

    assert_eq!(
        disposition,
        Disposition::Recorded {
            status: DeliveryStatus::Sent,
            outcome: DispatchOutcome::Delivered {
                message_id: "m1".to_string()
            },
        }
    );
    let stored = store.get("n1").unwrap();
    assert_eq!(stored.status, DeliveryStatus::Sent);
    assert!(stored.sent_at.is_some());
    assert_eq!(stored.message_id.as_deref(), Some("m1"));
    assert_eq!(stored.error, None);
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn test_request_carries_chat_data() {
    let mut record = chat_record("n1");
    record.chat_id = Some("chat-7".to_string());
    let store = seeded_store(&record);
    let gateway = FakeGateway::delivering("m1");
    let dispatcher =
        NotificationDispatcher::new(gateway.clone(), store, &config(ExhaustionPolicy::Fail));

    dispatcher.handle(&record.into()).await.unwrap();

    let requests = gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].token, "tok1");
    assert_eq!(requests[0].data["chatId"], "chat-7");
    assert_eq!(requests[0].data["senderId"], "");
    assert_eq!(
        requests[0].data["click_action"],
        "FLUTTER_NOTIFICATION_CLICK"
    );
}

#[tokio::test]
async fn test_missing_token_fails_without_gateway_call() {
    let mut record = chat_record("n2");
    record.recipient_token = None;
    let store = seeded_store(&record);
    let gateway = FakeGateway::delivering("never");
    let dispatcher = NotificationDispatcher::new(
        gateway.clone(),
        store.clone(),
        &config(ExhaustionPolicy::Fail),
    );

    dispatcher.handle(&record.into()).await.unwrap();

    let stored = store.get("n2").unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("missing field: token"));
    assert_eq!(stored.sent_at, None);
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn test_missing_title_or_body_never_reaches_gateway() {
    for field in ["title", "body"] {
        let mut record = chat_record("n2");
        match field {
            "title" => record.title = None,
            _ => record.body = Some(String::new()),
        }
        let store = seeded_store(&record);
        let gateway = FakeGateway::delivering("never");
        let dispatcher = NotificationDispatcher::new(
            gateway.clone(),
            store.clone(),
            &config(ExhaustionPolicy::Fail),
        );

        dispatcher.handle(&record.into()).await.unwrap();

        let stored = store.get("n2").unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(
            stored.error.as_deref(),
            Some(format!("missing field: {}", field).as_str())
        );
        assert_eq!(gateway.calls(), 0);
    }
}

#[tokio::test]
async fn test_invalid_recipient_not_retried() {
    let record = chat_record("n3");
    let store = seeded_store(&record);
    let gateway = FakeGateway::failing(GatewayErrorKind::InvalidRecipient);
    let dispatcher = NotificationDispatcher::new(
        gateway.clone(),
        store.clone(),
        &config(ExhaustionPolicy::Fail),
    );

    dispatcher.handle(&record.into()).await.unwrap();

    let stored = store.get("n3").unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("invalid recipient"));
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn test_timeouts_exhaust_retries_then_fail() {
    let record = chat_record("n4");
    let store = seeded_store(&record);
    let gateway = FakeGateway::failing(GatewayErrorKind::Timeout);
    let dispatcher = NotificationDispatcher::new(
        gateway.clone(),
        store.clone(),
        &config(ExhaustionPolicy::Fail),
    );

    dispatcher.handle(&record.into()).await.unwrap();

    let stored = store.get("n4").unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("timeout"));
    assert_eq!(gateway.calls(), 3);
}

#[tokio::test]
async fn test_timeouts_exhaust_retries_then_dead_letter() {
    let record = chat_record("n5");
    let store = seeded_store(&record);
    let gateway = FakeGateway::failing(GatewayErrorKind::Timeout);
    let sink = Arc::new(MemoryDeadLetters::new());
    let dispatcher = NotificationDispatcher::with_dead_letters(
        gateway.clone(),
        store.clone(),
        sink.clone(),
        &config(ExhaustionPolicy::DeadLetter),
    );

    dispatcher.handle(&record.into()).await.unwrap();

    let stored = store.get("n5").unwrap();
    assert_eq!(stored.status, DeliveryStatus::DeadLettered);
    assert_eq!(stored.error.as_deref(), Some("timeout"));
    assert_eq!(gateway.calls(), 3);

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].record_id, "n5");
    assert_eq!(entries[0].reason, "timeout");
}

#[tokio::test]
async fn test_transient_then_success_is_sent() {
    let record = chat_record("n6");
    let store = seeded_store(&record);
    let gateway = FakeGateway::scripted(vec![
        Err(GatewayError::new(GatewayErrorKind::Unavailable)),
        Ok(GatewayReceipt {
            message_id: "m6".to_string(),
        }),
    ]);
    let dispatcher = NotificationDispatcher::new(
        gateway.clone(),
        store.clone(),
        &config(ExhaustionPolicy::Fail),
    );

    dispatcher.handle(&record.into()).await.unwrap();

    assert_eq!(store.get("n6").unwrap().status, DeliveryStatus::Sent);
    assert_eq!(gateway.calls(), 2);
}

// ============================================================
// Idempotency
// ============================================================

#[tokio::test]
async fn test_redelivered_sent_record_is_noop() {
    let mut record = chat_record("n1");
    record.status = DeliveryStatus::Sent;
    let store = seeded_store(&record);
    let gateway = FakeGateway::delivering("m2");
    let dispatcher = NotificationDispatcher::new(
        gateway.clone(),
        store.clone(),
        &config(ExhaustionPolicy::Fail),
    );

    let disposition = dispatcher.handle(&record.into()).await.unwrap();

    assert_eq!(
        disposition,
        Disposition::Skipped {
            status: DeliveryStatus::Sent
        }
    );
    assert_eq!(gateway.calls(), 0);
    assert_eq!(store.update_count(), 0);
    assert_eq!(dispatcher.stats().snapshot().skipped, 1);
}

#[tokio::test]
async fn test_redelivery_after_write_back_is_skipped() {
    let record = chat_record("n1");
    let store = seeded_store(&record);
    let gateway = FakeGateway::delivering("m1");
    let dispatcher = NotificationDispatcher::new(
        gateway.clone(),
        store.clone(),
        &config(ExhaustionPolicy::Fail),
    );

    dispatcher.handle(&record.into()).await.unwrap();

    // The watcher redelivers with the record as it is now stored.
    let redelivered = CreatedEvent::from(store.get("n1").unwrap());
    let disposition = dispatcher.handle(&redelivered).await.unwrap();

    assert!(matches!(disposition, Disposition::Skipped { .. }));
    assert_eq!(gateway.calls(), 1);
    assert_eq!(store.update_count(), 1);
}

#[tokio::test]
async fn test_storage_failure_surfaces_as_separate_error() {
    // Record is known to the watcher but absent from the store.
    let record = chat_record("orphan");
    let store = Arc::new(MemoryRecordStore::new());
    let gateway = FakeGateway::delivering("m1");
    let dispatcher = NotificationDispatcher::new(
        gateway.clone(),
        store.clone(),
        &config(ExhaustionPolicy::Fail),
    );

    let err = dispatcher.handle(&record.into()).await.unwrap_err();

    let DispatchError::Storage { record_id, source } = err;
    assert_eq!(record_id, "orphan");
    assert!(matches!(source, StorageError::NotFound(_)));
    assert_eq!(gateway.calls(), 1);
    assert_eq!(dispatcher.stats().snapshot().storage_errors, 1);
}

#[tokio::test]
async fn test_distinct_records_dispatch_concurrently() {
    let store = Arc::new(MemoryRecordStore::new());
    let gateway = FakeGateway::delivering("m");
    let dispatcher = Arc::new(NotificationDispatcher::new(
        gateway.clone(),
        store.clone(),
        &config(ExhaustionPolicy::Fail),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let record = chat_record(&format!("c{}", i));
        store.insert(record.clone());
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            let event = CreatedEvent::from(record);
            dispatcher.handle(&event).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(gateway.calls(), 8);
    for i in 0..8 {
        assert_eq!(
            store.get(&format!("c{}", i)).unwrap().status,
            DeliveryStatus::Sent
        );
    }
    let stats = dispatcher.stats().snapshot();
    assert_eq!(stats.invocations, 8);
    assert_eq!(stats.sent, 8);
}
