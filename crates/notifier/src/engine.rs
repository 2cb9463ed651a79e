//! Dispatch engine: send, classify, retry.
//!
//! A request is sent up to `max_attempts` times. Permanent gateway errors end
//! the loop immediately; transient ones back off exponentially
//! (`base`, `2 * base`, `4 * base`, ... capped at `max_delay`) before the next
//! attempt. Each attempt is bounded by `attempt_timeout`, and an attempt that
//! overruns it is classified as a timeout.
//!
//! There is no durable retry queue: once attempts are exhausted the last
//! `Transient` outcome is returned and the recorder makes it terminal.

use std::time::Duration;

use chatpush_common::config::DispatchConfig;
use chatpush_common::types::{DispatchOutcome, DispatchRequest};

use crate::gateway::{GatewayError, GatewayErrorKind, GatewayReceipt, PushGateway};

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` is the 1-based
    /// number of the attempt that just failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

/// Drives one request through the gateway.
pub struct DispatchEngine<G> {
    gateway: G,
    policy: RetryPolicy,
}

impl<G: PushGateway> DispatchEngine<G> {
    pub fn new(gateway: G, policy: RetryPolicy) -> Self {
        Self { gateway, policy }
    }

    /// Send `request`, retrying transient failures within the policy bound.
    pub async fn dispatch(&self, request: &DispatchRequest) -> DispatchOutcome {
        let mut attempt = 1;

        loop {
            let outcome = Self::classify(self.attempt(request).await);

            match &outcome {
                DispatchOutcome::Delivered { message_id } => {
                    tracing::debug!(attempt, message_id = %message_id, "Gateway accepted message");
                    return outcome;
                }
                DispatchOutcome::Rejected { reason } => {
                    tracing::debug!(attempt, reason = %reason, "Gateway rejected message");
                    return outcome;
                }
                DispatchOutcome::Transient { reason } => {
                    if attempt >= self.policy.max_attempts {
                        tracing::warn!(
                            attempts = attempt,
                            reason = %reason,
                            "Retries exhausted"
                        );
                        return outcome;
                    }

                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Transient gateway failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, request: &DispatchRequest) -> Result<GatewayReceipt, GatewayError> {
        match tokio::time::timeout(self.policy.attempt_timeout, self.gateway.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::with_detail(
                GatewayErrorKind::Timeout,
                format!(
                    "no response within {}ms",
                    self.policy.attempt_timeout.as_millis()
                ),
            )),
        }
    }

    /// Map a single gateway result onto a `DispatchOutcome`.
    pub fn classify(result: Result<GatewayReceipt, GatewayError>) -> DispatchOutcome {
        match result {
            Ok(receipt) => DispatchOutcome::Delivered {
                message_id: receipt.message_id,
            },
            Err(err) => {
                if let Some(detail) = &err.detail {
                    tracing::debug!(kind = %err.kind, detail = %detail, "Gateway error detail");
                }
                if err.kind.is_permanent() {
                    DispatchOutcome::Rejected {
                        reason: err.to_string(),
                    }
                } else {
                    DispatchOutcome::Transient {
                        reason: err.to_string(),
                    }
                }
            }
        }
    }
}
