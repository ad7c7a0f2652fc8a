//! HTTP transport for formation notifications.
//!
//! Each notification is POSTed as JSON to the webhook URL. Receivers answer
//! with an optional body `{"config": ..., "state": ..., "error": ...}`:
//!
//! * a 2xx answer is handed to the engine as is, an empty body included;
//! * any other status with an `error` in the body is the receiver refusing
//!   the notification, which the engine records on the assignment;
//! * every other answer, and failing to reach the receiver at all, is a
//!   [`TransportError`].

use async_trait::async_trait;
use formations::dispatcher::{TransportError, WebhookClient, WebhookResponse};
use formations::notification::NotificationRequest;
use serde::Deserialize;
use serde_json::Value;

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

#[derive(Debug, Default, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_body(bytes: &[u8]) -> Result<ResponseBody, TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(ResponseBody::default());
    }
    serde_json::from_slice(bytes).map_err(|e| TransportError::InvalidBody(e.to_string()))
}

#[derive(Clone, Default)]
pub struct HttpWebhookClient {
    client: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client, e.g. one with custom TLS roots.
    pub fn with_client(client: reqwest::Client) -> Self {
        HttpWebhookClient { client }
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn send(&self, request: &NotificationRequest) -> Result<WebhookResponse, TransportError> {
        let mut builder = self
            .client
            .post(request.webhook.url.clone())
            .json(&request.object);
        if let Some(correlation_id) = &request.correlation_id {
            builder = builder.header(CORRELATION_ID_HEADER, correlation_id);
        }
        if let Some(timeout) = request.webhook.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| match request.webhook.timeout {
            Some(timeout) if e.is_timeout() => TransportError::Timeout(timeout),
            _ => TransportError::RequestFailed(e.to_string()),
        })?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?;

        tracing::debug!(
            webhook_id = %request.webhook.id,
            status = status.as_u16(),
            "Webhook answered"
        );

        if status.is_success() {
            let body = parse_body(&bytes)?;
            return Ok(WebhookResponse {
                status_code: status.as_u16(),
                config: body.config,
                state: body.state,
                error: body.error,
            });
        }

        match parse_body(&bytes) {
            Ok(ResponseBody {
                error: Some(error),
                config,
                state,
            }) if !error.is_empty() => Ok(WebhookResponse {
                status_code: status.as_u16(),
                config,
                state,
                error: Some(error),
            }),
            _ => Err(TransportError::UnexpectedStatus(status.as_u16())),
        }
    }
}
