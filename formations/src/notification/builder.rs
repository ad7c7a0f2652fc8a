use super::{
    ApplicationTenantMappingInput, AssignmentDetails, FormationConfigurationChangeInput,
    FormationLifecycleInput, NotificationObject, NotificationRequest, Participants,
};
use crate::context::Scope;
use crate::errors::Result;
use crate::model::{
    ApplicationTemplateWithLabels, ApplicationWithLabels, CustomerTenantContext, Formation,
    FormationAssignment, FormationOperation, RuntimeContextWithLabels, RuntimeWithLabels,
    TransportWebhook, Webhook,
};

pub fn configuration_change_input(
    operation: FormationOperation,
    formation_id: &str,
    application: ApplicationWithLabels,
    application_template: Option<ApplicationTemplateWithLabels>,
    runtime: RuntimeWithLabels,
    runtime_context: Option<RuntimeContextWithLabels>,
    customer_tenant_context: CustomerTenantContext,
) -> NotificationObject {
    NotificationObject::ConfigurationChange(FormationConfigurationChangeInput {
        operation,
        formation_id: formation_id.to_string(),
        application,
        application_template,
        runtime,
        runtime_context,
        customer_tenant_context,
        assignment: AssignmentDetails::Empty,
        reverse_assignment: AssignmentDetails::Empty,
    })
}

pub fn application_tenant_mapping_input(
    operation: FormationOperation,
    formation_id: &str,
    source_application: ApplicationWithLabels,
    source_application_template: Option<ApplicationTemplateWithLabels>,
    target_application: ApplicationWithLabels,
    target_application_template: Option<ApplicationTemplateWithLabels>,
    customer_tenant_context: CustomerTenantContext,
) -> NotificationObject {
    NotificationObject::ApplicationTenantMapping(ApplicationTenantMappingInput {
        operation,
        formation_id: formation_id.to_string(),
        source_application,
        source_application_template,
        target_application,
        target_application_template,
        customer_tenant_context,
        assignment: AssignmentDetails::Empty,
        reverse_assignment: AssignmentDetails::Empty,
    })
}

pub fn formation_lifecycle_input(
    operation: FormationOperation,
    formation: &Formation,
    customer_tenant_context: CustomerTenantContext,
) -> NotificationObject {
    NotificationObject::FormationLifecycle(FormationLifecycleInput {
        operation,
        formation: formation.clone(),
        customer_tenant_context,
    })
}

/// Packages a payload for a webhook. Fails if the webhook cannot be turned
/// into its transport form.
pub fn build_request(
    scope: &Scope<'_>,
    webhook: &Webhook,
    object: NotificationObject,
    participants: Option<Participants>,
) -> Result<NotificationRequest> {
    let webhook = TransportWebhook::try_from(webhook)?;

    Ok(NotificationRequest {
        webhook,
        object,
        correlation_id: scope.correlation_id().map(String::from),
        participants,
    })
}

/// Copy of `request` carrying the stored assignment and its reverse.
pub fn with_assignments(
    request: &NotificationRequest,
    assignment: &FormationAssignment,
    reverse: Option<&FormationAssignment>,
) -> NotificationRequest {
    let mut request = request.clone();
    request
        .object
        .set_assignments(Some(assignment).into(), reverse.into());
    request
}
