//! Formation participants and the context attached to their notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Label key to label value, as attached to a notified entity.
pub type Labels = HashMap<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub name: String,
    pub application_template_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationTemplate {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Runtime {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContext {
    pub id: String,
    pub runtime_id: String,
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationWithLabels {
    #[serde(flatten)]
    pub application: Application,
    pub labels: Labels,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationTemplateWithLabels {
    #[serde(flatten)]
    pub template: ApplicationTemplate,
    pub labels: Labels,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeWithLabels {
    #[serde(flatten)]
    pub runtime: Runtime,
    pub labels: Labels,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContextWithLabels {
    #[serde(flatten)]
    pub runtime_context: RuntimeContext,
    pub labels: Labels,
}

/// External customer and account data receivers use for routing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerTenantContext {
    pub customer_id: String,
    pub account_id: Option<String>,
    pub path: Option<String>,
    pub tenant_id: String,
}
