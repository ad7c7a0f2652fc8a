pub mod assignment;
pub mod formation;
pub mod label;
pub mod resource;
pub mod webhook;

pub use assignment::{
    AssignmentState, FormationAssignment, ParticipantRef, ParticipantType, RESYNCHRONIZABLE_STATES,
};
pub use formation::{
    Formation, FormationOperation, FormationState, FormationTemplate, NotificationError,
};
pub use label::{Label, LabelableObject, SCENARIOS_LABEL_KEY};
pub use resource::{
    Application, ApplicationTemplate, ApplicationTemplateWithLabels, ApplicationWithLabels,
    CustomerTenantContext, Labels, Runtime, RuntimeContext, RuntimeContextWithLabels,
    RuntimeWithLabels,
};
pub use webhook::{TransportWebhook, Webhook, WebhookMode, WebhookReferenceObjectType, WebhookType};
