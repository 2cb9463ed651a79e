//! Push gateway interface.
//!
//! The dispatch engine only sees this trait; `fcm::FcmGateway` is the
//! production implementation and tests substitute scripted fakes.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use chatpush_common::types::DispatchRequest;

/// Why the gateway refused or failed to deliver a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorKind {
    /// Token is unregistered, invalid, or belongs to another sender.
    InvalidRecipient,
    MalformedRequest,
    Unavailable,
    Timeout,
    RateLimited,
    Unknown,
}

impl GatewayErrorKind {
    /// Permanent errors are never retried.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            GatewayErrorKind::InvalidRecipient | GatewayErrorKind::MalformedRequest
        )
    }
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayErrorKind::InvalidRecipient => write!(f, "invalid recipient"),
            GatewayErrorKind::MalformedRequest => write!(f, "malformed request"),
            GatewayErrorKind::Unavailable => write!(f, "unavailable"),
            GatewayErrorKind::Timeout => write!(f, "timeout"),
            GatewayErrorKind::RateLimited => write!(f, "rate limited"),
            GatewayErrorKind::Unknown => write!(f, "unknown error"),
        }
    }
}

/// Classified gateway failure.
///
/// Displays as the classification only; `detail` carries the raw gateway
/// message for logs and is never written to the record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub detail: Option<String>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: GatewayErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }
}

/// Successful send acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReceipt {
    pub message_id: String,
}

/// Sends a single message to a single device token.
pub trait PushGateway: Send + Sync {
    fn send(
        &self,
        request: &DispatchRequest,
    ) -> impl Future<Output = Result<GatewayReceipt, GatewayError>> + Send;
}

impl<T: PushGateway> PushGateway for Arc<T> {
    fn send(
        &self,
        request: &DispatchRequest,
    ) -> impl Future<Output = Result<GatewayReceipt, GatewayError>> + Send {
        (**self).send(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_kinds() {
        assert!(GatewayErrorKind::InvalidRecipient.is_permanent());
        assert!(GatewayErrorKind::MalformedRequest.is_permanent());
        assert!(!GatewayErrorKind::Unavailable.is_permanent());
        assert!(!GatewayErrorKind::Timeout.is_permanent());
        assert!(!GatewayErrorKind::RateLimited.is_permanent());
        assert!(!GatewayErrorKind::Unknown.is_permanent());
    }

    #[test]
    fn test_display_omits_detail() {
        let err = GatewayError::with_detail(
            GatewayErrorKind::InvalidRecipient,
            "Requested entity was not found.",
        );
        assert_eq!(err.to_string(), "invalid recipient");
    }
}
