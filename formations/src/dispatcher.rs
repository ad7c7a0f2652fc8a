use crate::config::DispatchConfig;
use crate::metrics_defs::{NOTIFICATION_DURATION, NOTIFICATIONS_SENT};
use crate::model::WebhookMode;
use crate::notification::NotificationRequest;
use async_trait::async_trait;
use serde_json::Value;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a receiver answered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WebhookResponse {
    pub status_code: u16,
    pub config: Option<Value>,
    pub state: Option<String>,
    /// Set when the receiver reports a failure of its own.
    pub error: Option<String>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status code {0}")]
    UnexpectedStatus(u16),

    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

/// Sends one notification to its webhook.
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn send(&self, request: &NotificationRequest) -> Result<WebhookResponse, TransportError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeliveryOutcome {
    /// A sync webhook handled the notification. `incomplete` means the
    /// receiver still owes its configuration.
    Delivered {
        config: Option<Value>,
        incomplete: bool,
    },
    /// An async webhook took the request; a callback reports the result.
    Accepted,
    /// The receiver answered with an error of its own.
    Rejected { message: String },
    /// The webhook could not be reached or did not answer in time.
    Failed { message: String },
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered { .. } => "delivered",
            DeliveryOutcome::Accepted => "accepted",
            DeliveryOutcome::Rejected { .. } => "rejected",
            DeliveryOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct NotificationDispatcher {
    client: Arc<dyn WebhookClient>,
    default_timeout: Duration,
    incomplete_status_code: u16,
}

impl NotificationDispatcher {
    pub fn new(client: Arc<dyn WebhookClient>, config: &DispatchConfig) -> Self {
        NotificationDispatcher {
            client,
            default_timeout: config.timeout(),
            incomplete_status_code: config.incomplete_status_code,
        }
    }

    /// Sends the request and classifies the result. Never fails: transport
    /// and receiver errors are part of the outcome.
    pub async fn dispatch(&self, request: &NotificationRequest) -> DeliveryOutcome {
        let timeout = request.webhook.timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        let result = match tokio::time::timeout(timeout, self.client.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };
        let outcome = self.classify(request, result);

        let webhook_type = request.webhook.webhook_type.as_str();
        counter!(NOTIFICATIONS_SENT, "webhook_type" => webhook_type, "outcome" => outcome.as_str())
            .increment(1);
        histogram!(NOTIFICATION_DURATION, "webhook_type" => webhook_type, "outcome" => outcome.as_str())
            .record(start.elapsed().as_secs_f64());

        match &outcome {
            DeliveryOutcome::Rejected { message } | DeliveryOutcome::Failed { message } => {
                tracing::warn!(
                    webhook_id = %request.webhook.id,
                    correlation_id = request.correlation_id.as_deref().unwrap_or_default(),
                    outcome = outcome.as_str(),
                    error = %message,
                    "Notification was not delivered"
                );
            }
            _ => {
                tracing::debug!(
                    webhook_id = %request.webhook.id,
                    correlation_id = request.correlation_id.as_deref().unwrap_or_default(),
                    outcome = outcome.as_str(),
                    "Notification sent"
                );
            }
        }

        outcome
    }

    fn classify(
        &self,
        request: &NotificationRequest,
        result: Result<WebhookResponse, TransportError>,
    ) -> DeliveryOutcome {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                return DeliveryOutcome::Failed {
                    message: e.to_string(),
                };
            }
        };

        if let Some(message) = response.error.filter(|m| !m.is_empty()) {
            return DeliveryOutcome::Rejected { message };
        }
        if request.webhook.mode == WebhookMode::AsyncCallback {
            return DeliveryOutcome::Accepted;
        }

        DeliveryOutcome::Delivered {
            config: response.config,
            incomplete: response.status_code == self.incomplete_status_code,
        }
    }
}
