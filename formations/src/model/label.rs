use super::assignment::ParticipantType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key of the label that records formation membership.
pub const SCENARIOS_LABEL_KEY: &str = "scenarios";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelableObject {
    Application,
    ApplicationTemplate,
    Runtime,
    RuntimeContext,
}

impl From<ParticipantType> for LabelableObject {
    fn from(value: ParticipantType) -> Self {
        match value {
            ParticipantType::Application => LabelableObject::Application,
            ParticipantType::Runtime => LabelableObject::Runtime,
            ParticipantType::RuntimeContext => LabelableObject::RuntimeContext,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub tenant_id: String,
    pub key: String,
    pub value: Value,
    pub object_id: String,
    pub object_type: LabelableObject,
    /// Bumped by every successful update.
    pub version: u64,
}
