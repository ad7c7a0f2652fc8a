//! Notification payloads and the requests that carry them to webhooks.

pub mod builder;
pub mod generator;

use crate::model::{
    ApplicationTemplateWithLabels, ApplicationWithLabels, AssignmentState, CustomerTenantContext,
    Formation, FormationAssignment, FormationOperation, NotificationError, ParticipantRef,
    RuntimeContextWithLabels, RuntimeWithLabels, TransportWebhook,
};
use serde::{Serialize, Serializer};
use serde_json::Value;

pub use generator::{MembershipChange, NotificationsGenerator};

/// Assignment data as seen by the receiver.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSnapshot {
    pub id: String,
    pub source: String,
    pub target: String,
    pub state: AssignmentState,
    pub value: Option<Value>,
    pub error: Option<NotificationError>,
}

impl From<&FormationAssignment> for AssignmentSnapshot {
    fn from(fa: &FormationAssignment) -> Self {
        AssignmentSnapshot {
            id: fa.id.clone(),
            source: fa.source.clone(),
            target: fa.target.clone(),
            state: fa.state,
            value: fa.value.clone(),
            error: fa.error.clone(),
        }
    }
}

/// Either a real assignment or the explicit placeholder.
///
/// The placeholder serializes as `""`, never `null`: receivers rely on it.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum AssignmentDetails {
    #[default]
    Empty,
    Present(AssignmentSnapshot),
}

impl AssignmentDetails {
    pub fn is_empty(&self) -> bool {
        matches!(self, AssignmentDetails::Empty)
    }
}

impl From<Option<&FormationAssignment>> for AssignmentDetails {
    fn from(fa: Option<&FormationAssignment>) -> Self {
        match fa {
            Some(fa) => AssignmentDetails::Present(fa.into()),
            None => AssignmentDetails::Empty,
        }
    }
}

impl Serialize for AssignmentDetails {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AssignmentDetails::Empty => serializer.serialize_str(""),
            AssignmentDetails::Present(snapshot) => snapshot.serialize(serializer),
        }
    }
}

/// Payload for application <-> runtime (or runtime context) relations.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormationConfigurationChangeInput {
    pub operation: FormationOperation,
    pub formation_id: String,
    pub application: ApplicationWithLabels,
    pub application_template: Option<ApplicationTemplateWithLabels>,
    pub runtime: RuntimeWithLabels,
    pub runtime_context: Option<RuntimeContextWithLabels>,
    pub customer_tenant_context: CustomerTenantContext,
    pub assignment: AssignmentDetails,
    pub reverse_assignment: AssignmentDetails,
}

/// Payload for application <-> application relations.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationTenantMappingInput {
    pub operation: FormationOperation,
    pub formation_id: String,
    pub source_application: ApplicationWithLabels,
    pub source_application_template: Option<ApplicationTemplateWithLabels>,
    pub target_application: ApplicationWithLabels,
    pub target_application_template: Option<ApplicationTemplateWithLabels>,
    pub customer_tenant_context: CustomerTenantContext,
    pub assignment: AssignmentDetails,
    pub reverse_assignment: AssignmentDetails,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormationLifecycleInput {
    pub operation: FormationOperation,
    pub formation: Formation,
    pub customer_tenant_context: CustomerTenantContext,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NotificationObject {
    ConfigurationChange(FormationConfigurationChangeInput),
    ApplicationTenantMapping(ApplicationTenantMappingInput),
    FormationLifecycle(FormationLifecycleInput),
}

impl NotificationObject {
    /// Fills the assignment fields. Lifecycle payloads have none.
    pub fn set_assignments(&mut self, assignment: AssignmentDetails, reverse: AssignmentDetails) {
        match self {
            NotificationObject::ConfigurationChange(input) => {
                input.assignment = assignment;
                input.reverse_assignment = reverse;
            }
            NotificationObject::ApplicationTenantMapping(input) => {
                input.assignment = assignment;
                input.reverse_assignment = reverse;
            }
            NotificationObject::FormationLifecycle(_) => {}
        }
    }

    pub fn set_runtime_context(&mut self, runtime_context: RuntimeContextWithLabels) {
        if let NotificationObject::ConfigurationChange(input) = self {
            input.runtime_context = Some(runtime_context);
        }
    }

    pub fn operation(&self) -> FormationOperation {
        match self {
            NotificationObject::ConfigurationChange(input) => input.operation,
            NotificationObject::ApplicationTenantMapping(input) => input.operation,
            NotificationObject::FormationLifecycle(input) => input.operation,
        }
    }
}

/// The directed relation a request notifies about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participants {
    pub source: ParticipantRef,
    pub target: ParticipantRef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NotificationRequest {
    pub webhook: TransportWebhook,
    pub object: NotificationObject,
    pub correlation_id: Option<String>,
    /// Absent for formation lifecycle requests.
    pub participants: Option<Participants>,
}

impl NotificationRequest {
    pub fn source(&self) -> Option<&ParticipantRef> {
        self.participants.as_ref().map(|p| &p.source)
    }

    pub fn target(&self) -> Option<&ParticipantRef> {
        self.participants.as_ref().map(|p| &p.target)
    }

    /// True when this request notifies about the `source -> target` relation.
    pub fn matches(&self, source: &str, target: &str) -> bool {
        self.participants
            .as_ref()
            .is_some_and(|p| p.source.id == source && p.target.id == target)
    }
}
