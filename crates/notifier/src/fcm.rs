//! Firebase Cloud Messaging HTTP v1 gateway.
//!
//! Sends one message per call to
//! `POST {endpoint}/v1/projects/{project}/messages:send` and maps FCM error
//! responses onto `GatewayErrorKind`.
//!
//! Bearer tokens come from Google application default credentials through
//! `gcp_auth`, which caches each token and fetches a new one before it
//! expires. A fixed token can be configured instead for local runs.

use std::sync::Arc;
use std::time::Duration;

use gcp_auth::TokenProvider;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use chatpush_common::config::AppConfig;
use chatpush_common::types::DispatchRequest;

use crate::gateway::{GatewayError, GatewayErrorKind, GatewayReceipt, PushGateway};

/// OAuth2 scope required by `messages:send`.
pub const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

/// Where the gateway gets its bearer token.
#[derive(Clone)]
pub enum FcmCredentials {
    /// A fixed token. It is never refreshed.
    Static(String),
    /// Application default credentials (service account key, metadata server,
    /// or gcloud user credentials).
    Provider(Arc<dyn TokenProvider>),
}

// TokenProvider has no Debug impl, and the static token must not be printed.
impl std::fmt::Debug for FcmCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.source())
    }
}

impl FcmCredentials {
    /// Use `static_token` when given, otherwise discover default credentials.
    pub async fn discover(static_token: Option<String>) -> Result<Self, FcmSetupError> {
        match static_token {
            Some(token) => Ok(Self::Static(token)),
            None => Ok(Self::Provider(gcp_auth::provider().await?)),
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::Provider(_) => "application_default",
        }
    }

    async fn bearer(&self) -> Result<String, GatewayError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::Provider(provider) => {
                let token = provider.token(FCM_SCOPES).await.map_err(|e| {
                    GatewayError::with_detail(
                        GatewayErrorKind::Unavailable,
                        format!("failed to get FCM access token: {}", e),
                    )
                })?;
                Ok(token.as_str().to_string())
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum FcmSetupError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to initialize Google credentials: {0}")]
    Credentials(#[from] gcp_auth::Error),
}

/// FCM HTTP v1 client.
#[derive(Debug, Clone)]
pub struct FcmGateway {
    client: reqwest::Client,
    send_url: String,
    credentials: FcmCredentials,
    android_channel_id: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

impl FcmGateway {
    pub fn new(
        endpoint: &str,
        project_id: &str,
        credentials: FcmCredentials,
        android_channel_id: String,
        timeout: Duration,
    ) -> Result<Self, FcmSetupError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            send_url: format!(
                "{}/v1/projects/{}/messages:send",
                endpoint.trim_end_matches('/'),
                project_id
            ),
            credentials,
            android_channel_id,
        })
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, FcmSetupError> {
        let credentials = FcmCredentials::discover(config.fcm_access_token.clone()).await?;
        Self::new(
            &config.fcm_endpoint,
            &config.fcm_project_id,
            credentials,
            config.fcm_android_channel_id.clone(),
            Duration::from_millis(config.dispatch.attempt_timeout_ms),
        )
    }

    pub fn credentials_source(&self) -> &'static str {
        self.credentials.source()
    }

    /// Build the `messages:send` request body.
    ///
    /// Android messages go out at high priority on the chat channel; iOS gets
    /// the default sound and a badge of 1.
    pub fn message_body(&self, request: &DispatchRequest) -> serde_json::Value {
        json!({
            "message": {
                "token": request.token,
                "notification": {
                    "title": request.title,
                    "body": request.body,
                },
                "data": request.data,
                "android": {
                    "priority": "high",
                    "notification": {
                        "sound": "default",
                        "channel_id": self.android_channel_id,
                    },
                },
                "apns": {
                    "payload": {
                        "aps": {
                            "sound": "default",
                            "badge": 1,
                        },
                    },
                },
            }
        })
    }

    /// Classify a non-2xx FCM response.
    ///
    /// The FCM-specific `errorCode` wins; the HTTP status is the fallback for
    /// bodies without one (proxies, load balancers, auth failures).
    pub fn classify_error_response(status: StatusCode, body: &str) -> GatewayError {
        let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();

        let error_code = parsed
            .as_ref()
            .and_then(|e| e.error.details.iter().find_map(|d| d.error_code.clone()));

        let detail = parsed
            .as_ref()
            .and_then(|e| e.error.message.clone())
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

        let kind = match error_code.as_deref() {
            Some("UNREGISTERED") | Some("SENDER_ID_MISMATCH") => GatewayErrorKind::InvalidRecipient,
            Some("INVALID_ARGUMENT") => GatewayErrorKind::MalformedRequest,
            Some("QUOTA_EXCEEDED") => GatewayErrorKind::RateLimited,
            Some("UNAVAILABLE") | Some("INTERNAL") => GatewayErrorKind::Unavailable,
            _ => Self::classify_status(status),
        };

        GatewayError::with_detail(kind, detail)
    }

    fn classify_status(status: StatusCode) -> GatewayErrorKind {
        match status {
            StatusCode::BAD_REQUEST => GatewayErrorKind::MalformedRequest,
            StatusCode::NOT_FOUND => GatewayErrorKind::InvalidRecipient,
            StatusCode::TOO_MANY_REQUESTS => GatewayErrorKind::RateLimited,
            StatusCode::GATEWAY_TIMEOUT => GatewayErrorKind::Timeout,
            s if s.is_server_error() => GatewayErrorKind::Unavailable,
            _ => GatewayErrorKind::Unknown,
        }
    }

    fn classify_transport_error(err: &reqwest::Error) -> GatewayError {
        let kind = if err.is_timeout() {
            GatewayErrorKind::Timeout
        } else if err.is_connect() {
            GatewayErrorKind::Unavailable
        } else {
            GatewayErrorKind::Unknown
        };
        GatewayError::with_detail(kind, err.to_string())
    }
}

impl PushGateway for FcmGateway {
    async fn send(&self, request: &DispatchRequest) -> Result<GatewayReceipt, GatewayError> {
        let token = self.credentials.bearer().await?;
        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(token)
            .json(&self.message_body(request))
            .send()
            .await
            .map_err(|e| Self::classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error_response(status, &body));
        }

        let sent: SendResponse = response.json().await.map_err(|e| {
            GatewayError::with_detail(
                GatewayErrorKind::Unknown,
                format!("unreadable FCM response: {}", e),
            )
        })?;

        Ok(GatewayReceipt {
            message_id: sent.name,
        })
    }
}
