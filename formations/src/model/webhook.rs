use crate::errors::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookType {
    ConfigurationChanged,
    ApplicationTenantMapping,
    FormationLifecycle,
}

impl WebhookType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            WebhookType::ConfigurationChanged => "CONFIGURATION_CHANGED",
            WebhookType::ApplicationTenantMapping => "APPLICATION_TENANT_MAPPING",
            WebhookType::FormationLifecycle => "FORMATION_LIFECYCLE",
        }
    }
}

/// What kind of object a webhook is registered on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookReferenceObjectType {
    ApplicationWebhook,
    RuntimeWebhook,
    FormationTemplateWebhook,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookMode {
    #[default]
    Sync,
    AsyncCallback,
}

/// Webhook as stored by the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    pub webhook_type: WebhookType,
    pub object_type: WebhookReferenceObjectType,
    pub object_id: String,
    pub mode: Option<WebhookMode>,
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Webhook in the shape the transport needs: a parsed URL and a resolved mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportWebhook {
    pub id: String,
    pub webhook_type: WebhookType,
    pub mode: WebhookMode,
    pub url: Url,
    pub timeout: Option<Duration>,
}

impl TryFrom<&Webhook> for TransportWebhook {
    type Error = Error;

    fn try_from(webhook: &Webhook) -> Result<Self, Self::Error> {
        let raw = webhook
            .url
            .as_deref()
            .ok_or_else(|| Error::Conversion(format!("webhook {} has no URL", webhook.id)))?;
        let url = Url::parse(raw).map_err(|e| {
            Error::Conversion(format!("webhook {} has invalid URL {raw:?}: {e}", webhook.id))
        })?;

        Ok(TransportWebhook {
            id: webhook.id.clone(),
            webhook_type: webhook.webhook_type,
            mode: webhook.mode.unwrap_or_default(),
            url,
            timeout: webhook.timeout_secs.map(Duration::from_secs),
        })
    }
}
