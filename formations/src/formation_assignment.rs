//! Directed relations between formation members and their delivery state.

use crate::context::Scope;
use crate::dispatcher::{DeliveryOutcome, NotificationDispatcher};
use crate::errors::{Error, Result, ResultExt};
use crate::model::{
    AssignmentState, Formation, FormationAssignment, FormationOperation, NotificationError,
    ParticipantRef, ParticipantType,
};
use crate::notification::NotificationRequest;
use crate::notification::builder::with_assignments;
use crate::repository::{
    ApplicationRepository, FormationAssignmentRepository, Page, RuntimeContextRepository,
    RuntimeRepository,
};
use crate::status::AssignmentStatusService;
use indexmap::IndexSet;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct AssignmentWithRequest {
    pub assignment: FormationAssignment,
    /// `None` when nobody listens for this direction.
    pub request: Option<NotificationRequest>,
}

/// An assignment together with the assignment for the opposite direction.
#[derive(Clone, Debug, PartialEq)]
pub struct AssignmentMappingPair {
    pub assignment: AssignmentWithRequest,
    pub reverse: Option<AssignmentWithRequest>,
}

impl AssignmentMappingPair {
    fn reverse_assignment(&self) -> Option<&FormationAssignment> {
        self.reverse.as_ref().map(|r| &r.assignment)
    }
}

pub struct FormationAssignmentService {
    assignments: Arc<dyn FormationAssignmentRepository>,
    applications: Arc<dyn ApplicationRepository>,
    runtimes: Arc<dyn RuntimeRepository>,
    runtime_contexts: Arc<dyn RuntimeContextRepository>,
    dispatcher: Arc<NotificationDispatcher>,
    status: Arc<AssignmentStatusService>,
}

impl FormationAssignmentService {
    pub fn new(
        assignments: Arc<dyn FormationAssignmentRepository>,
        applications: Arc<dyn ApplicationRepository>,
        runtimes: Arc<dyn RuntimeRepository>,
        runtime_contexts: Arc<dyn RuntimeContextRepository>,
        dispatcher: Arc<NotificationDispatcher>,
        status: Arc<AssignmentStatusService>,
    ) -> Self {
        FormationAssignmentService {
            assignments,
            applications,
            runtimes,
            runtime_contexts,
            dispatcher,
            status,
        }
    }

    /// Creates the assignments between the object and every other member of
    /// the formation, in both directions, plus the object's own assignment.
    /// Pairs that already exist are kept; pairs left over from an unfinished
    /// unassignment start over.
    pub async fn generate_assignments(
        &self,
        scope: &Scope<'_>,
        formation: &Formation,
        object_id: &str,
        object_type: ParticipantType,
    ) -> Result<Vec<FormationAssignment>> {
        let object = ParticipantRef::new(object_id, object_type);
        let members = self
            .members(scope, formation)
            .await
            .with_context(|| format!("while listing members of formation {}", formation.name))?;

        let mut assignments = Vec::with_capacity(members.len() * 2 + 1);
        assignments.push(
            self.create_if_absent(scope, formation, &object, &object, AssignmentState::Ready)
                .await?,
        );
        for member in members.iter().filter(|m| m.id != object_id) {
            assignments.push(
                self.create_if_absent(scope, formation, &object, member, AssignmentState::Initial)
                    .await?,
            );
            assignments.push(
                self.create_if_absent(scope, formation, member, &object, AssignmentState::Initial)
                    .await?,
            );
        }

        tracing::debug!(
            formation_id = %formation.id,
            object_id,
            count = assignments.len(),
            "Generated formation assignments"
        );
        Ok(assignments)
    }

    async fn members(
        &self,
        scope: &Scope<'_>,
        formation: &Formation,
    ) -> Result<IndexSet<ParticipantRef>> {
        let scenarios = vec![formation.name.clone()];
        let mut members = IndexSet::new();
        for app in self.applications.list_by_scenarios(scope, &scenarios).await? {
            members.insert(ParticipantRef::new(app.id, ParticipantType::Application));
        }
        for runtime in self.runtimes.list_by_scenarios(scope, &scenarios).await? {
            members.insert(ParticipantRef::new(runtime.id, ParticipantType::Runtime));
        }
        for context in self.runtime_contexts.list_by_scenarios(scope, &scenarios).await? {
            members.insert(ParticipantRef::new(context.id, ParticipantType::RuntimeContext));
        }
        Ok(members)
    }

    async fn create_if_absent(
        &self,
        scope: &Scope<'_>,
        formation: &Formation,
        source: &ParticipantRef,
        target: &ParticipantRef,
        state: AssignmentState,
    ) -> Result<FormationAssignment> {
        match self
            .assignments
            .get_by_source_and_target(scope, &formation.id, &source.id, &target.id)
            .await
        {
            Ok(mut existing) => {
                if existing.state.is_deletion() {
                    existing.state = state;
                    existing.error = None;
                    self.assignments.update(scope, &existing).await?;
                }
                Ok(existing)
            }
            Err(e) if e.is_not_found() => {
                let assignment = FormationAssignment {
                    id: uuid::Uuid::new_v4().to_string(),
                    formation_id: formation.id.clone(),
                    tenant_id: scope.tenant().to_string(),
                    source: source.id.clone(),
                    source_type: source.participant_type,
                    target: target.id.clone(),
                    target_type: target.participant_type,
                    state,
                    value: None,
                    error: None,
                };
                self.assignments
                    .create(scope, &assignment)
                    .await
                    .with_context(|| {
                        format!("while creating assignment {} -> {}", source.id, target.id)
                    })?;
                Ok(assignment)
            }
            Err(e) => Err(e.context(format!(
                "while getting assignment {} -> {}",
                source.id, target.id
            ))),
        }
    }

    pub async fn get_assignments_for_formation_with_states(
        &self,
        scope: &Scope<'_>,
        formation_id: &str,
        states: &[AssignmentState],
    ) -> Result<Vec<FormationAssignment>> {
        self.assignments
            .list_by_formation_and_states(scope, formation_id, states)
            .await
            .with_context(|| format!("while listing assignments of formation {formation_id}"))
    }

    pub async fn get_assignments_for_formation(
        &self,
        scope: &Scope<'_>,
        formation_id: &str,
    ) -> Result<Vec<FormationAssignment>> {
        self.assignments
            .list_for_formation(scope, formation_id)
            .await
            .with_context(|| format!("while listing assignments of formation {formation_id}"))
    }

    /// The assignment pointing from `target` back to `source`, if any.
    pub async fn get_reverse_by_source_and_target(
        &self,
        scope: &Scope<'_>,
        formation_id: &str,
        source: &str,
        target: &str,
    ) -> Result<Option<FormationAssignment>> {
        match self
            .assignments
            .get_by_source_and_target(scope, formation_id, target, source)
            .await
        {
            Ok(reverse) => Ok(Some(reverse)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.context(format!(
                "while getting reverse assignment of {source} -> {target}"
            ))),
        }
    }

    /// Every assignment of the object in the formation, in any state.
    pub async fn list_formation_assignments_for_object_id(
        &self,
        scope: &Scope<'_>,
        formation_id: &str,
        object_id: &str,
    ) -> Result<Vec<FormationAssignment>> {
        self.assignments
            .list_for_object_id(scope, formation_id, object_id)
            .await
            .with_context(|| {
                format!("while listing assignments for {object_id} in formation {formation_id}")
            })
    }

    pub async fn list_by_formation_ids(
        &self,
        scope: &Scope<'_>,
        formation_ids: &[String],
        page_size: usize,
        after: Option<&str>,
    ) -> Result<HashMap<String, Page<FormationAssignment>>> {
        if page_size == 0 {
            return Err(Error::InvalidInput("page size must be positive".into()));
        }
        self.assignments
            .list_by_formation_ids(scope, formation_ids, page_size, after)
            .await
            .context("while listing assignments by formation IDs")
    }

    pub async fn update(
        &self,
        scope: &Scope<'_>,
        id: &str,
        assignment: &FormationAssignment,
    ) -> Result<()> {
        if !self.assignments.exists(scope, id).await? {
            return Err(Error::not_found("formation assignment", id));
        }
        self.assignments
            .update(scope, assignment)
            .await
            .with_context(|| format!("while updating formation assignment {id}"))
    }

    pub async fn delete(&self, scope: &Scope<'_>, id: &str) -> Result<()> {
        self.assignments
            .delete(scope, id)
            .await
            .with_context(|| format!("while deleting formation assignment {id}"))
    }

    /// Matches every assignment with its request and with the assignment of
    /// the opposite direction.
    pub fn build_pairs(
        &self,
        assignments: &[FormationAssignment],
        requests: &[NotificationRequest],
    ) -> Vec<AssignmentMappingPair> {
        let with_request = |fa: &FormationAssignment| AssignmentWithRequest {
            assignment: fa.clone(),
            request: requests
                .iter()
                .find(|r| r.matches(&fa.source, &fa.target))
                .cloned(),
        };

        assignments
            .iter()
            .map(|fa| AssignmentMappingPair {
                assignment: with_request(fa),
                reverse: assignments
                    .iter()
                    .find(|r| r.source == fa.target && r.target == fa.source && !fa.is_self())
                    .map(with_request),
            })
            .collect()
    }

    /// Sends the creation notification of the pair and records the result.
    /// Returns whether the assignment is still short of `READY`.
    pub async fn process_formation_assignment_pair(
        &self,
        scope: &Scope<'_>,
        pair: &AssignmentMappingPair,
    ) -> Result<bool> {
        let mut assignment = pair.assignment.assignment.clone();
        let Some(request) = &pair.assignment.request else {
            if assignment.state != AssignmentState::Ready || assignment.error.is_some() {
                assignment.state = AssignmentState::Ready;
                assignment.error = None;
                self.status
                    .update_with_constraints(scope, &assignment, FormationOperation::Assign)
                    .await?;
            }
            return Ok(false);
        };

        let request = with_assignments(request, &assignment, pair.reverse_assignment());
        match self.dispatcher.dispatch(&request).await {
            DeliveryOutcome::Delivered { config, incomplete } => {
                assignment.state = if incomplete {
                    AssignmentState::ConfigPending
                } else {
                    AssignmentState::Ready
                };
                assignment.error = None;
                if config.is_some() {
                    assignment.value = config;
                }
                self.status
                    .update_with_constraints(scope, &assignment, FormationOperation::Assign)
                    .await?;
                Ok(incomplete)
            }
            DeliveryOutcome::Accepted => {
                if assignment.state != AssignmentState::Initial || assignment.error.is_some() {
                    assignment.state = AssignmentState::Initial;
                    assignment.error = None;
                    self.status
                        .update_with_constraints(scope, &assignment, FormationOperation::Assign)
                        .await?;
                }
                Ok(true)
            }
            DeliveryOutcome::Rejected { message } => {
                self.status
                    .set_assignment_to_error_state(
                        scope,
                        &assignment,
                        NotificationError::client(message),
                        AssignmentState::CreateError,
                        FormationOperation::Assign,
                    )
                    .await?;
                Ok(true)
            }
            DeliveryOutcome::Failed { message } => {
                self.status
                    .set_assignment_to_error_state(
                        scope,
                        &assignment,
                        NotificationError::technical(message),
                        AssignmentState::CreateError,
                        FormationOperation::Assign,
                    )
                    .await?;
                Ok(true)
            }
        }
    }

    /// Sends the deletion notification of the pair. The assignment is removed
    /// once the receiver confirmed; returns whether it still exists.
    pub async fn cleanup_formation_assignment(
        &self,
        scope: &Scope<'_>,
        pair: &AssignmentMappingPair,
    ) -> Result<bool> {
        let mut assignment = pair.assignment.assignment.clone();
        let Some(request) = &pair.assignment.request else {
            self.status
                .delete_with_constraints(scope, &assignment, FormationOperation::Unassign)
                .await?;
            return Ok(false);
        };

        let request = with_assignments(request, &assignment, pair.reverse_assignment());
        match self.dispatcher.dispatch(&request).await {
            DeliveryOutcome::Delivered { .. } => {
                self.status
                    .delete_with_constraints(scope, &assignment, FormationOperation::Unassign)
                    .await?;
                Ok(false)
            }
            DeliveryOutcome::Accepted => {
                if assignment.state != AssignmentState::Deleting || assignment.error.is_some() {
                    assignment.state = AssignmentState::Deleting;
                    assignment.error = None;
                    self.status
                        .update_with_constraints(scope, &assignment, FormationOperation::Unassign)
                        .await?;
                }
                Ok(true)
            }
            DeliveryOutcome::Rejected { message } => {
                self.status
                    .set_assignment_to_error_state(
                        scope,
                        &assignment,
                        NotificationError::client(message),
                        AssignmentState::DeleteError,
                        FormationOperation::Unassign,
                    )
                    .await?;
                Ok(true)
            }
            DeliveryOutcome::Failed { message } => {
                self.status
                    .set_assignment_to_error_state(
                        scope,
                        &assignment,
                        NotificationError::technical(message),
                        AssignmentState::DeleteError,
                        FormationOperation::Unassign,
                    )
                    .await?;
                Ok(true)
            }
        }
    }

    /// Replaces the reverse of the pair with the record currently stored,
    /// keeping the reverse's request if it had one.
    pub async fn refresh_reverse(
        &self,
        scope: &Scope<'_>,
        pair: &mut AssignmentMappingPair,
    ) -> Result<()> {
        let fa = &pair.assignment.assignment;
        let current = self
            .get_reverse_by_source_and_target(scope, &fa.formation_id, &fa.source, &fa.target)
            .await?;
        pair.reverse = match (pair.reverse.take(), current) {
            (_, Some(current)) if current.is_self() => None,
            (Some(mut known), Some(current)) => {
                known.assignment = current;
                Some(known)
            }
            (None, Some(current)) => Some(AssignmentWithRequest {
                assignment: current,
                request: None,
            }),
            (_, None) => None,
        };
        Ok(())
    }

    /// Drives every assignment in the direction of `operation`, one after the
    /// other. Returns whether any of them is still pending.
    pub async fn process_formation_assignments(
        &self,
        scope: &Scope<'_>,
        assignments: &[FormationAssignment],
        requests: &[NotificationRequest],
        operation: FormationOperation,
    ) -> Result<bool> {
        let mut pending = false;
        for mut pair in self.build_pairs(assignments, requests) {
            // An earlier iteration may have changed or removed the reverse.
            self.refresh_reverse(scope, &mut pair).await?;

            let still_pending = match operation {
                FormationOperation::Unassign => {
                    self.cleanup_formation_assignment(scope, &pair).await?
                }
                _ => self.process_formation_assignment_pair(scope, &pair).await?,
            };
            pending |= still_pending;
        }
        Ok(pending)
    }
}
