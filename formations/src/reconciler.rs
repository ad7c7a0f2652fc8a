//! Resynchronization of formations left behind by failed or unanswered
//! notifications.
//!
//! A pass runs in three stages:
//!
//! 1. In one transaction, load the formation, its template's lifecycle
//!    webhooks and every assignment in a resynchronizable state, and rebuild
//!    the request of each assignment. Nothing is sent if this fails.
//! 2. Drive the assignments concurrently, at most `max_concurrent_dispatches`
//!    at a time. Each assignment's dispatch and state write share their own
//!    transaction.
//! 3. After every assignment task finished, in one more transaction: drop the
//!    scenario of objects whose last assignment was cleaned up, then move the
//!    formation itself, but only if all of its assignments are `READY`.

use crate::context::{RequestContext, Scope, Transactioner, finish};
use crate::errors::{Error, Result, ResultExt};
use crate::formation_assignment::{
    AssignmentMappingPair, AssignmentWithRequest, FormationAssignmentService,
};
use crate::lifecycle::FormationLifecycle;
use crate::metrics_defs::ASSIGNMENTS_RESYNCHRONIZED;
use crate::model::{
    AssignmentState, CustomerTenantContext, Formation, FormationAssignment, FormationOperation,
    FormationState, ParticipantRef, RESYNCHRONIZABLE_STATES, Webhook,
};
use crate::notification::{MembershipChange, NotificationsGenerator};
use crate::repository::{FormationRepository, FormationTemplateRepository, TenantRepository};
use crate::scenario::ScenarioLabelService;
use crate::status::FormationStatusService;
use indexmap::IndexSet;
use shared::counter;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// States that keep a formation from moving on.
const NOT_READY_STATES: [AssignmentState; 5] = [
    AssignmentState::Initial,
    AssignmentState::ConfigPending,
    AssignmentState::CreateError,
    AssignmentState::Deleting,
    AssignmentState::DeleteError,
];

struct AssignmentWork {
    pair: AssignmentMappingPair,
    deletion: bool,
}

struct WorkDone {
    assignment: FormationAssignment,
    deletion: bool,
    pending: bool,
}

struct Prepared {
    formation: Formation,
    webhooks: Vec<Webhook>,
    customer: CustomerTenantContext,
    work: Vec<AssignmentWork>,
}

/// Runs one assignment in its own transaction.
#[derive(Clone)]
struct AssignmentWorker {
    transactioner: Arc<dyn Transactioner>,
    assignments: Arc<FormationAssignmentService>,
}

impl AssignmentWorker {
    async fn run(
        &self,
        tenant: &str,
        correlation_id: Option<&str>,
        mut work: AssignmentWork,
    ) -> Result<WorkDone> {
        let tx = self.transactioner.begin().await?;
        let result = {
            let scope = Scope::new(tenant, correlation_id, tx.as_ref());
            // Tasks that ran before this one may have moved the reverse.
            match self.assignments.refresh_reverse(&scope, &mut work.pair).await {
                Ok(()) if work.deletion => {
                    self.assignments
                        .cleanup_formation_assignment(&scope, &work.pair)
                        .await
                }
                Ok(()) => {
                    self.assignments
                        .process_formation_assignment_pair(&scope, &work.pair)
                        .await
                }
                Err(e) => Err(e),
            }
        };
        let pending = finish(tx, result).await?;

        Ok(WorkDone {
            assignment: work.pair.assignment.assignment,
            deletion: work.deletion,
            pending,
        })
    }
}

pub struct FormationReconciler {
    transactioner: Arc<dyn Transactioner>,
    formations: Arc<dyn FormationRepository>,
    templates: Arc<dyn FormationTemplateRepository>,
    tenants: Arc<dyn TenantRepository>,
    generator: Arc<NotificationsGenerator>,
    assignments: Arc<FormationAssignmentService>,
    status: Arc<FormationStatusService>,
    lifecycle: Arc<FormationLifecycle>,
    scenario_labels: Arc<ScenarioLabelService>,
    max_concurrent_dispatches: usize,
}

impl FormationReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactioner: Arc<dyn Transactioner>,
        formations: Arc<dyn FormationRepository>,
        templates: Arc<dyn FormationTemplateRepository>,
        tenants: Arc<dyn TenantRepository>,
        generator: Arc<NotificationsGenerator>,
        assignments: Arc<FormationAssignmentService>,
        status: Arc<FormationStatusService>,
        lifecycle: Arc<FormationLifecycle>,
        scenario_labels: Arc<ScenarioLabelService>,
        max_concurrent_dispatches: usize,
    ) -> Self {
        FormationReconciler {
            transactioner,
            formations,
            templates,
            tenants,
            generator,
            assignments,
            status,
            lifecycle,
            scenario_labels,
            max_concurrent_dispatches: max_concurrent_dispatches.max(1),
        }
    }

    /// Moves a `DRAFT` formation to `INITIAL` and sends everything that was
    /// held back while it was a draft.
    pub async fn finalize_draft_formation(
        &self,
        ctx: &RequestContext,
        formation_id: &str,
    ) -> Result<Option<Formation>> {
        let tenant = ctx.tenant()?;

        let tx = self.transactioner.begin().await?;
        let result = {
            let scope = Scope::new(tenant, ctx.correlation_id(), tx.as_ref());
            self.mark_initial(&scope, formation_id).await
        };
        finish(tx, result).await?;

        tracing::info!(formation_id, "Finalized draft formation");
        self.resynchronize_formation_notifications(ctx, formation_id)
            .await
    }

    async fn mark_initial(&self, scope: &Scope<'_>, formation_id: &str) -> Result<()> {
        let mut formation = self
            .formations
            .get(scope, formation_id)
            .await
            .with_context(|| format!("while getting formation {formation_id}"))?;
        if formation.state != FormationState::Draft {
            return Err(Error::InvalidState(format!(
                "formation {formation_id} is in state {}, expected DRAFT",
                formation.state.as_str()
            )));
        }
        formation.state = FormationState::Initial;
        self.status
            .update_with_constraints(scope, &formation, FormationOperation::CreateFormation)
            .await
    }

    /// Re-sends the notifications of every unresolved assignment and moves
    /// the formation on once all of them are resolved. Returns the formation
    /// as left by the pass, or `None` if the pass deleted it.
    pub async fn resynchronize_formation_notifications(
        &self,
        ctx: &RequestContext,
        formation_id: &str,
    ) -> Result<Option<Formation>> {
        let tenant = ctx.tenant()?;
        let correlation_id = ctx.correlation_id();

        let tx = self.transactioner.begin().await?;
        let prepared = {
            let scope = Scope::new(tenant, correlation_id, tx.as_ref());
            self.prepare(&scope, formation_id).await
        };
        let prepared = finish(tx, prepared).await?;

        if prepared.formation.state == FormationState::Draft {
            tracing::debug!(formation_id, "Skipping resynchronization of draft formation");
            return Ok(Some(prepared.formation));
        }
        if prepared.work.is_empty() && prepared.formation.state == FormationState::Ready {
            return Ok(Some(prepared.formation));
        }

        let Prepared {
            formation,
            webhooks,
            customer,
            work,
        } = prepared;
        tracing::info!(
            formation_id,
            assignments = work.len(),
            state = formation.state.as_str(),
            "Resynchronizing formation"
        );

        let (cleaned, first_error) = self.process(tenant, correlation_id, work).await;

        let tx = self.transactioner.begin().await?;
        let result = {
            let scope = Scope::new(tenant, correlation_id, tx.as_ref());
            self.complete(&scope, &formation, &webhooks, &customer, &cleaned)
                .await
        };
        let finalized = finish(tx, result).await;

        match first_error {
            Some(e) => Err(e),
            None => finalized,
        }
    }

    async fn prepare(&self, scope: &Scope<'_>, formation_id: &str) -> Result<Prepared> {
        let formation = self
            .formations
            .get(scope, formation_id)
            .await
            .with_context(|| format!("while getting formation {formation_id}"))?;
        let template = self
            .templates
            .get(scope, &formation.formation_template_id)
            .await
            .with_context(|| {
                format!("while getting formation template {}", formation.formation_template_id)
            })?;
        if formation.state == FormationState::Draft {
            return Ok(Prepared {
                formation,
                webhooks: Vec::new(),
                customer: CustomerTenantContext::default(),
                work: Vec::new(),
            });
        }
        let webhooks = self.generator.lifecycle_webhooks(scope, &template.id).await?;
        let customer = self
            .tenants
            .customer_tenant_context(scope, scope.tenant())
            .await
            .with_context(|| format!("while getting customer context of {}", scope.tenant()))?;

        let assignments = self
            .assignments
            .get_assignments_for_formation_with_states(scope, formation_id, &RESYNCHRONIZABLE_STATES)
            .await?;

        let mut work = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let deletion = assignment.state.is_deletion();
            let change = MembershipChange {
                formation: &formation,
                operation: if deletion {
                    FormationOperation::Unassign
                } else {
                    FormationOperation::Assign
                },
                customer: &customer,
            };
            let request = self
                .generator
                .generate_assignment_notification(scope, change, &assignment)
                .await
                .with_context(|| {
                    format!("while regenerating notification for assignment {}", assignment.id)
                })?;
            // The reverse is read by the task, right before it dispatches.
            work.push(AssignmentWork {
                pair: AssignmentMappingPair {
                    assignment: AssignmentWithRequest {
                        assignment,
                        request,
                    },
                    reverse: None,
                },
                deletion,
            });
        }

        Ok(Prepared {
            formation,
            webhooks,
            customer,
            work,
        })
    }

    /// Runs every assignment to completion. Returns the assignments whose
    /// deletion went through and the first error hit, if any.
    async fn process(
        &self,
        tenant: &str,
        correlation_id: Option<&str>,
        work: Vec<AssignmentWork>,
    ) -> (Vec<FormationAssignment>, Option<Error>) {
        let worker = AssignmentWorker {
            transactioner: self.transactioner.clone(),
            assignments: self.assignments.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_dispatches));
        let mut join_set = JoinSet::new();
        let mut first_error = None;

        for item in work {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    first_error.get_or_insert(Error::Internal(format!(
                        "dispatch semaphore closed: {e}"
                    )));
                    break;
                }
            };
            let worker = worker.clone();
            let tenant = tenant.to_string();
            let correlation_id = correlation_id.map(String::from);
            join_set.spawn(async move {
                let _permit = permit;
                worker.run(&tenant, correlation_id.as_deref(), item).await
            });
        }

        let mut cleaned = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(done)) => {
                    let direction = if done.deletion { "deletion" } else { "creation" };
                    let pending = if done.pending { "true" } else { "false" };
                    counter!(ASSIGNMENTS_RESYNCHRONIZED, "direction" => direction, "pending" => pending)
                        .increment(1);
                    if done.deletion && !done.pending {
                        cleaned.push(done.assignment);
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Failed to resynchronize formation assignment");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Formation assignment task panicked");
                    first_error.get_or_insert(Error::Internal(format!("assignment task failed: {e}")));
                }
            }
        }

        (cleaned, first_error)
    }

    async fn complete(
        &self,
        scope: &Scope<'_>,
        formation: &Formation,
        webhooks: &[Webhook],
        customer: &CustomerTenantContext,
        cleaned: &[FormationAssignment],
    ) -> Result<Option<Formation>> {
        let endpoints: IndexSet<ParticipantRef> = cleaned
            .iter()
            .flat_map(|fa| [fa.source_ref(), fa.target_ref()])
            .collect();
        for endpoint in endpoints {
            let leftovers = self
                .assignments
                .list_formation_assignments_for_object_id(scope, &formation.id, &endpoint.id)
                .await?;
            if leftovers.is_empty() {
                tracing::info!(
                    formation_id = %formation.id,
                    object_id = %endpoint.id,
                    "Object fully unassigned, removing scenario"
                );
                self.scenario_labels
                    .unassign_from_scenario(
                        scope,
                        &endpoint.id,
                        endpoint.participant_type.into(),
                        &formation.name,
                    )
                    .await?;
            }
        }

        let formation = self
            .formations
            .get(scope, &formation.id)
            .await
            .with_context(|| format!("while reloading formation {}", formation.id))?;
        let not_ready = self
            .assignments
            .get_assignments_for_formation_with_states(scope, &formation.id, &NOT_READY_STATES)
            .await?;
        if !not_ready.is_empty() {
            tracing::info!(
                formation_id = %formation.id,
                not_ready = not_ready.len(),
                "Formation still has unresolved assignments"
            );
            return Ok(Some(formation));
        }

        match formation.state {
            FormationState::Ready | FormationState::Draft => Ok(Some(formation)),
            FormationState::Initial | FormationState::CreateError => {
                let formation = self
                    .lifecycle
                    .notify_created(scope, &formation, webhooks, customer)
                    .await?;
                Ok(Some(formation))
            }
            FormationState::Deleting | FormationState::DeleteError => {
                let deleted = self
                    .lifecycle
                    .notify_deleted(scope, &formation, webhooks, customer)
                    .await?;
                if deleted {
                    return Ok(None);
                }
                let formation = self
                    .formations
                    .get(scope, &formation.id)
                    .await
                    .with_context(|| format!("while reloading formation {}", formation.id))?;
                Ok(Some(formation))
            }
        }
    }
}
