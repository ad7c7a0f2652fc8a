use super::formation::NotificationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantType {
    Application,
    Runtime,
    RuntimeContext,
}

impl ParticipantType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ParticipantType::Application => "APPLICATION",
            ParticipantType::Runtime => "RUNTIME",
            ParticipantType::RuntimeContext => "RUNTIME_CONTEXT",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub id: String,
    pub participant_type: ParticipantType,
}

impl ParticipantRef {
    pub fn new(id: impl Into<String>, participant_type: ParticipantType) -> Self {
        ParticipantRef {
            id: id.into(),
            participant_type,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentState {
    Initial,
    Ready,
    ConfigPending,
    CreateError,
    Deleting,
    DeleteError,
}

impl AssignmentState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AssignmentState::Initial => "INITIAL",
            AssignmentState::Ready => "READY",
            AssignmentState::ConfigPending => "CONFIG_PENDING",
            AssignmentState::CreateError => "CREATE_ERROR",
            AssignmentState::Deleting => "DELETING",
            AssignmentState::DeleteError => "DELETE_ERROR",
        }
    }

    /// Deletion states drive cleanup; every other state drives creation.
    pub fn is_deletion(&self) -> bool {
        matches!(self, AssignmentState::Deleting | AssignmentState::DeleteError)
    }
}

/// States picked up by a resynchronization pass.
pub const RESYNCHRONIZABLE_STATES: [AssignmentState; 4] = [
    AssignmentState::Initial,
    AssignmentState::CreateError,
    AssignmentState::Deleting,
    AssignmentState::DeleteError,
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormationAssignment {
    pub id: String,
    pub formation_id: String,
    pub tenant_id: String,
    pub source: String,
    pub source_type: ParticipantType,
    pub target: String,
    pub target_type: ParticipantType,
    pub state: AssignmentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NotificationError>,
}

impl FormationAssignment {
    pub fn is_self(&self) -> bool {
        self.source == self.target
    }

    pub fn source_ref(&self) -> ParticipantRef {
        ParticipantRef::new(self.source.clone(), self.source_type)
    }

    pub fn target_ref(&self) -> ParticipantRef {
        ParticipantRef::new(self.target.clone(), self.target_type)
    }

    pub fn involves(&self, object_id: &str) -> bool {
        self.source == object_id || self.target == object_id
    }
}
