use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormationState {
    Draft,
    Initial,
    Ready,
    CreateError,
    Deleting,
    DeleteError,
}

impl FormationState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FormationState::Draft => "DRAFT",
            FormationState::Initial => "INITIAL",
            FormationState::Ready => "READY",
            FormationState::CreateError => "CREATE_ERROR",
            FormationState::Deleting => "DELETING",
            FormationState::DeleteError => "DELETE_ERROR",
        }
    }
}

/// Structured failure recorded on a formation or an assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationError {
    pub message: String,
    pub error_code: u32,
}

impl NotificationError {
    /// The webhook could not be reached or did not answer in time.
    pub const TECHNICAL: u32 = 1;
    /// The receiver answered and reported an error itself.
    pub const CLIENT: u32 = 2;

    pub fn technical(message: impl Into<String>) -> Self {
        NotificationError {
            message: message.into(),
            error_code: Self::TECHNICAL,
        }
    }

    pub fn client(message: impl Into<String>) -> Self {
        NotificationError {
            message: message.into(),
            error_code: Self::CLIENT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Formation {
    pub id: String,
    pub name: String,
    pub formation_template_id: String,
    pub tenant_id: String,
    pub state: FormationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NotificationError>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormationTemplate {
    pub id: String,
    pub name: String,
}

/// The membership or lifecycle change a notification describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormationOperation {
    #[serde(rename = "assign")]
    Assign,
    #[serde(rename = "unassign")]
    Unassign,
    #[serde(rename = "create")]
    CreateFormation,
    #[serde(rename = "delete")]
    DeleteFormation,
}

impl FormationOperation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FormationOperation::Assign => "assign",
            FormationOperation::Unassign => "unassign",
            FormationOperation::CreateFormation => "create",
            FormationOperation::DeleteFormation => "delete",
        }
    }
}
