//! Push-notification transport seam.
//!
//! The engine hands the gateway a batch and gets back aggregate counts —
//! per-item identity is not guaranteed by every transport, so counts are
//! the whole contract.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One outbound push message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotification {
    /// The patient's registered push address (device token).
    pub address: String,
    pub title: String,
    pub body: String,
    /// Correlation data for the client (ids, scheduled time).
    pub metadata: serde_json::Value,
}

/// Aggregate result of a batched send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub success_count: u32,
    pub failure_count: u32,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Push gateway unreachable at {0}")]
    Connection(String),

    #[error("Push gateway HTTP error: {0}")]
    HttpClient(String),

    #[error("Push gateway returned status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed gateway response: {0}")]
    ResponseParsing(String),
}

/// External push gateway accepting batched send requests.
pub trait PushGateway: Send + Sync {
    fn send_batch(&self, batch: &[PushNotification]) -> Result<BatchOutcome, GatewayError>;
}

/// HTTP push gateway speaking a JSON batch protocol.
pub struct HttpPushGateway {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpPushGateway {
    /// Create a new gateway client pointing at a batch-send endpoint.
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        }
    }
}

/// Request body for the gateway's batch endpoint.
#[derive(Serialize)]
struct SendBatchRequest<'a> {
    notifications: &'a [PushNotification],
}

/// Response body from the gateway's batch endpoint.
#[derive(Deserialize)]
struct SendBatchResponse {
    success_count: u32,
    failure_count: u32,
}

impl PushGateway for HttpPushGateway {
    fn send_batch(&self, batch: &[PushNotification]) -> Result<BatchOutcome, GatewayError> {
        let url = format!("{}/v1/notifications/batch", self.base_url);
        let body = SendBatchRequest {
            notifications: batch,
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                GatewayError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                GatewayError::HttpClient(format!(
                    "Request timed out after {}s",
                    self.timeout_secs
                ))
            } else {
                GatewayError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SendBatchResponse = response
            .json()
            .map_err(|e| GatewayError::ResponseParsing(e.to_string()))?;

        Ok(BatchOutcome {
            success_count: parsed.success_count,
            failure_count: parsed.failure_count,
        })
    }
}

/// How a [`MockPushGateway`] answers each batch.
#[derive(Debug, Clone, Copy)]
pub enum MockBehavior {
    /// Every notification delivered.
    Deliver,
    /// A fixed number of per-item failures, rest delivered.
    PartialFailure { failures: u32 },
    /// Batch accepted but nothing delivered.
    NoDelivery,
    /// Transport down: the whole call errors.
    TransportDown,
}

/// Mock gateway for tests — records batches, returns scripted outcomes.
pub struct MockPushGateway {
    behavior: MockBehavior,
    batches: Mutex<Vec<Vec<PushNotification>>>,
}

impl MockPushGateway {
    pub fn delivering() -> Self {
        Self::with_behavior(MockBehavior::Deliver)
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Every batch this gateway was asked to send, in order.
    pub fn sent_batches(&self) -> Vec<Vec<PushNotification>> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl PushGateway for MockPushGateway {
    fn send_batch(&self, batch: &[PushNotification]) -> Result<BatchOutcome, GatewayError> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(batch.to_vec());

        let total = batch.len() as u32;
        match self.behavior {
            MockBehavior::Deliver => Ok(BatchOutcome {
                success_count: total,
                failure_count: 0,
            }),
            MockBehavior::PartialFailure { failures } => Ok(BatchOutcome {
                success_count: total.saturating_sub(failures),
                failure_count: failures.min(total),
            }),
            MockBehavior::NoDelivery => Ok(BatchOutcome {
                success_count: 0,
                failure_count: total,
            }),
            MockBehavior::TransportDown => {
                Err(GatewayError::Connection("mock transport down".to_string()))
            }
        }
    }
}
