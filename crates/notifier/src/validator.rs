//! Payload validator: record → `DispatchRequest`.

use std::collections::BTreeMap;

use thiserror::Error;

use chatpush_common::types::{DispatchRequest, NotificationRecord};

/// Data key the mobile client inspects to route a notification tap.
pub const CLICK_ACTION_KEY: &str = "click_action";

/// Click action the Flutter client registers for chat notifications.
pub const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Validate a record and project it into a dispatch request.
///
/// Token, title and body are required and checked in that order; blank
/// strings count as missing. `chatId`/`senderId` default to empty strings so
/// the client always receives the same data keys.
pub fn validate(record: &NotificationRecord) -> Result<DispatchRequest, ValidationError> {
    let token = required(&record.recipient_token, "token")?;
    let title = required(&record.title, "title")?;
    let body = required(&record.body, "body")?;

    let mut data = BTreeMap::new();
    data.insert(
        "chatId".to_string(),
        record.chat_id.clone().unwrap_or_default(),
    );
    data.insert(
        "senderId".to_string(),
        record.sender_id.clone().unwrap_or_default(),
    );
    data.insert(CLICK_ACTION_KEY.to_string(), CLICK_ACTION.to_string());

    Ok(DispatchRequest {
        token,
        title,
        body,
        data,
    })
}

fn required(value: &Option<String>, name: &'static str) -> Result<String, ValidationError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(ValidationError::MissingField(name)),
    }
}
