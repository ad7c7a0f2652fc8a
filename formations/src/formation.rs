//! Entry points of the engine: formation creation and deletion, and objects
//! joining and leaving formations. Each call runs in one transaction.

use crate::context::{RequestContext, Scope, Transactioner, finish};
use crate::errors::{Error, Result, ResultExt};
use crate::formation_assignment::FormationAssignmentService;
use crate::lifecycle::FormationLifecycle;
use crate::model::{
    AssignmentState, CustomerTenantContext, Formation, FormationOperation, FormationState, ParticipantType,
    Webhook,
};
use crate::notification::{MembershipChange, NotificationsGenerator};
use crate::repository::{FormationRepository, FormationTemplateRepository, TenantRepository};
use crate::scenario::ScenarioLabelService;
use std::sync::Arc;

pub struct FormationService {
    transactioner: Arc<dyn Transactioner>,
    formations: Arc<dyn FormationRepository>,
    templates: Arc<dyn FormationTemplateRepository>,
    tenants: Arc<dyn TenantRepository>,
    generator: Arc<NotificationsGenerator>,
    assignments: Arc<FormationAssignmentService>,
    lifecycle: Arc<FormationLifecycle>,
    scenario_labels: Arc<ScenarioLabelService>,
}

impl FormationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactioner: Arc<dyn Transactioner>,
        formations: Arc<dyn FormationRepository>,
        templates: Arc<dyn FormationTemplateRepository>,
        tenants: Arc<dyn TenantRepository>,
        generator: Arc<NotificationsGenerator>,
        assignments: Arc<FormationAssignmentService>,
        lifecycle: Arc<FormationLifecycle>,
        scenario_labels: Arc<ScenarioLabelService>,
    ) -> Self {
        FormationService {
            transactioner,
            formations,
            templates,
            tenants,
            generator,
            assignments,
            lifecycle,
            scenario_labels,
        }
    }

    async fn customer(&self, scope: &Scope<'_>) -> Result<CustomerTenantContext> {
        self.tenants
            .customer_tenant_context(scope, scope.tenant())
            .await
            .with_context(|| format!("while getting customer context of {}", scope.tenant()))
    }

    async fn lifecycle_webhooks(&self, scope: &Scope<'_>, formation: &Formation) -> Result<Vec<Webhook>> {
        self.generator
            .lifecycle_webhooks(scope, &formation.formation_template_id)
            .await
    }

    async fn get_by_name(&self, scope: &Scope<'_>, name: &str) -> Result<Formation> {
        self.formations
            .get_by_name(scope, name)
            .await
            .with_context(|| format!("while getting formation {name}"))
    }

    /// Creates the formation. A draft stays silent until it is finalized;
    /// otherwise the template's lifecycle webhooks are told right away.
    pub async fn create_formation(
        &self,
        ctx: &RequestContext,
        name: &str,
        template_id: &str,
        draft: bool,
    ) -> Result<Formation> {
        let tenant = ctx.tenant()?;
        let tx = self.transactioner.begin().await?;
        let result = {
            let scope = Scope::new(tenant, ctx.correlation_id(), tx.as_ref());
            self.create(&scope, name, template_id, draft).await
        };
        finish(tx, result).await
    }

    async fn create(
        &self,
        scope: &Scope<'_>,
        name: &str,
        template_id: &str,
        draft: bool,
    ) -> Result<Formation> {
        match self.formations.get_by_name(scope, name).await {
            Ok(_) => {
                return Err(Error::AlreadyExists {
                    resource: "formation",
                    id: name.to_string(),
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.context(format!("while getting formation {name}"))),
        }
        self.templates
            .get(scope, template_id)
            .await
            .with_context(|| format!("while getting formation template {template_id}"))?;

        let formation = Formation {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            formation_template_id: template_id.to_string(),
            tenant_id: scope.tenant().to_string(),
            state: if draft {
                FormationState::Draft
            } else {
                FormationState::Initial
            },
            error: None,
        };
        self.formations
            .create(scope, &formation)
            .await
            .with_context(|| format!("while creating formation {name}"))?;
        tracing::info!(
            formation_id = %formation.id,
            name,
            state = formation.state.as_str(),
            "Created formation"
        );
        if draft {
            return Ok(formation);
        }

        let webhooks = self.lifecycle_webhooks(scope, &formation).await?;
        let customer = self.customer(scope).await?;
        self.lifecycle
            .notify_created(scope, &formation, &webhooks, &customer)
            .await
    }

    /// Deletes an empty formation. Returns `false` when the deletion waits
    /// for an async receiver or failed and was recorded on the formation.
    pub async fn delete_formation(&self, ctx: &RequestContext, name: &str) -> Result<bool> {
        let tenant = ctx.tenant()?;
        let tx = self.transactioner.begin().await?;
        let result = {
            let scope = Scope::new(tenant, ctx.correlation_id(), tx.as_ref());
            self.delete(&scope, name).await
        };
        finish(tx, result).await
    }

    async fn delete(&self, scope: &Scope<'_>, name: &str) -> Result<bool> {
        let formation = self.get_by_name(scope, name).await?;
        let remaining = self
            .assignments
            .get_assignments_for_formation(scope, &formation.id)
            .await?;
        if !remaining.is_empty() {
            return Err(Error::InvalidState(format!(
                "formation {name} still has {} assignments",
                remaining.len()
            )));
        }

        let webhooks = self.lifecycle_webhooks(scope, &formation).await?;
        let customer = self.customer(scope).await?;
        self.lifecycle
            .notify_deleted(scope, &formation, &webhooks, &customer)
            .await
    }

    /// Adds the object to the formation and notifies the other members.
    pub async fn assign_object(
        &self,
        ctx: &RequestContext,
        formation_name: &str,
        object_id: &str,
        object_type: ParticipantType,
    ) -> Result<Formation> {
        let tenant = ctx.tenant()?;
        let tx = self.transactioner.begin().await?;
        let result = {
            let scope = Scope::new(tenant, ctx.correlation_id(), tx.as_ref());
            self.assign(&scope, formation_name, object_id, object_type)
                .await
        };
        finish(tx, result).await
    }

    async fn assign(
        &self,
        scope: &Scope<'_>,
        formation_name: &str,
        object_id: &str,
        object_type: ParticipantType,
    ) -> Result<Formation> {
        let formation = self.get_by_name(scope, formation_name).await?;
        if matches!(
            formation.state,
            FormationState::Deleting | FormationState::DeleteError
        ) {
            return Err(Error::InvalidState(format!(
                "formation {formation_name} is being deleted"
            )));
        }

        self.scenario_labels
            .assign_to_scenario(scope, object_id, object_type.into(), &formation.name)
            .await?;
        let assignments = self
            .assignments
            .generate_assignments(scope, &formation, object_id, object_type)
            .await?;
        if formation.state == FormationState::Draft {
            tracing::debug!(
                formation_id = %formation.id,
                object_id,
                "Formation is a draft, holding notifications back"
            );
            return Ok(formation);
        }

        let customer = self.customer(scope).await?;
        let change = MembershipChange {
            formation: &formation,
            operation: FormationOperation::Assign,
            customer: &customer,
        };
        let requests = self
            .generator
            .generate_notifications(scope, change, object_id, object_type)
            .await
            .with_context(|| format!("while generating notifications for {object_id}"))?;
        let pending = self
            .assignments
            .process_formation_assignments(scope, &assignments, &requests, FormationOperation::Assign)
            .await?;

        tracing::info!(
            formation_id = %formation.id,
            object_id,
            object_type = object_type.as_str(),
            notifications = requests.len(),
            pending,
            "Assigned object to formation"
        );
        Ok(formation)
    }

    /// Removes the object from the formation. The object keeps the formation
    /// in its scenarios until every one of its assignments is cleaned up.
    pub async fn unassign_object(
        &self,
        ctx: &RequestContext,
        formation_name: &str,
        object_id: &str,
        object_type: ParticipantType,
    ) -> Result<Formation> {
        let tenant = ctx.tenant()?;
        let tx = self.transactioner.begin().await?;
        let result = {
            let scope = Scope::new(tenant, ctx.correlation_id(), tx.as_ref());
            self.unassign(&scope, formation_name, object_id, object_type)
                .await
        };
        finish(tx, result).await
    }

    async fn unassign(
        &self,
        scope: &Scope<'_>,
        formation_name: &str,
        object_id: &str,
        object_type: ParticipantType,
    ) -> Result<Formation> {
        let formation = self.get_by_name(scope, formation_name).await?;
        let mut assignments = self
            .assignments
            .list_formation_assignments_for_object_id(scope, &formation.id, object_id)
            .await?;

        if formation.state == FormationState::Draft {
            // Nobody was told about the assignments of a draft.
            for assignment in &assignments {
                self.assignments.delete(scope, &assignment.id).await?;
            }
        } else {
            for assignment in assignments.iter_mut().filter(|a| !a.state.is_deletion()) {
                assignment.state = AssignmentState::Deleting;
                assignment.error = None;
                self.assignments
                    .update(scope, &assignment.id, assignment)
                    .await?;
            }

            let customer = self.customer(scope).await?;
            let change = MembershipChange {
                formation: &formation,
                operation: FormationOperation::Unassign,
                customer: &customer,
            };
            let requests = self
                .generator
                .generate_notifications(scope, change, object_id, object_type)
                .await
                .with_context(|| format!("while generating notifications for {object_id}"))?;
            self.assignments
                .process_formation_assignments(
                    scope,
                    &assignments,
                    &requests,
                    FormationOperation::Unassign,
                )
                .await?;
        }

        let leftovers = self
            .assignments
            .list_formation_assignments_for_object_id(scope, &formation.id, object_id)
            .await?;
        if leftovers.is_empty() {
            self.scenario_labels
                .unassign_from_scenario(scope, object_id, object_type.into(), &formation.name)
                .await?;
        } else {
            tracing::info!(
                formation_id = %formation.id,
                object_id,
                remaining = leftovers.len(),
                "Object keeps its scenario until its assignments are cleaned up"
            );
        }
        Ok(formation)
    }
}
