//! State changes wrapped in constraint enforcement.
//!
//! Every formation or assignment state change runs the constraint engine
//! before the write (`PRE_NOTIFICATION_STATUS_RETURNED`) and after it
//! (`POST_NOTIFICATION_STATUS_RETURNED`), with one [`JoinPointDetails`] value
//! whose location is moved between the calls:
//!
//! * a failing pre check prevents the write;
//! * a failing write skips the post check;
//! * a failing post check does not undo the write. The error comes back as
//!   [`Error::MutationCommitted`] and [`crate::context::finish`] still commits
//!   the transaction, so callers see the error and the persisted state.

use crate::context::Scope;
use crate::errors::{Error, Result, ResultExt};
use crate::metrics_defs::FORMATION_STATE_TRANSITIONS;
use crate::model::{
    AssignmentState, Formation, FormationAssignment, FormationOperation, FormationState,
    NotificationError,
};
use crate::repository::{FormationAssignmentRepository, FormationRepository, ScenarioDefinitions};
use async_trait::async_trait;
use serde_json::Value;
use shared::counter;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintOperation {
    NotificationStatusReturned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintTiming {
    Pre,
    Post,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JoinPointLocation {
    pub operation: ConstraintOperation,
    pub timing: ConstraintTiming,
}

impl JoinPointLocation {
    pub const PRE_NOTIFICATION_STATUS_RETURNED: JoinPointLocation = JoinPointLocation {
        operation: ConstraintOperation::NotificationStatusReturned,
        timing: ConstraintTiming::Pre,
    };

    pub const POST_NOTIFICATION_STATUS_RETURNED: JoinPointLocation = JoinPointLocation {
        operation: ConstraintOperation::NotificationStatusReturned,
        timing: ConstraintTiming::Post,
    };
}

impl fmt::Display for JoinPointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timing = match self.timing {
            ConstraintTiming::Pre => "PRE",
            ConstraintTiming::Post => "POST",
        };
        let operation = match self.operation {
            ConstraintOperation::NotificationStatusReturned => "NOTIFICATION_STATUS_RETURNED",
        };
        write!(f, "{timing}_{operation}")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatusSubject {
    Formation(Formation),
    Assignment(FormationAssignment),
}

/// What the constraint engine sees about a state change.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinPointDetails {
    pub location: JoinPointLocation,
    pub operation: FormationOperation,
    pub subject: StatusSubject,
}

#[async_trait]
pub trait ConstraintEngine: Send + Sync {
    async fn enforce_constraints(
        &self,
        scope: &Scope<'_>,
        location: JoinPointLocation,
        details: &JoinPointDetails,
        formation_template_id: &str,
    ) -> Result<()>;
}

async fn enforce_pre(
    engine: &dyn ConstraintEngine,
    scope: &Scope<'_>,
    details: &mut JoinPointDetails,
    formation_template_id: &str,
) -> Result<()> {
    details.location = JoinPointLocation::PRE_NOTIFICATION_STATUS_RETURNED;
    engine
        .enforce_constraints(scope, details.location, details, formation_template_id)
        .await
        .with_context(|| format!("while enforcing constraints at {}", details.location))
}

async fn enforce_post(
    engine: &dyn ConstraintEngine,
    scope: &Scope<'_>,
    details: &mut JoinPointDetails,
    formation_template_id: &str,
) -> Result<()> {
    details.location = JoinPointLocation::POST_NOTIFICATION_STATUS_RETURNED;
    engine
        .enforce_constraints(scope, details.location, details, formation_template_id)
        .await
        .map_err(|e| {
            tracing::warn!(
                error = %e,
                location = %details.location,
                "Constraints failed after the state change was persisted"
            );
            Error::MutationCommitted(Box::new(e))
        })
}

pub struct FormationStatusService {
    formations: Arc<dyn FormationRepository>,
    scenarios: Arc<dyn ScenarioDefinitions>,
    constraints: Arc<dyn ConstraintEngine>,
}

impl FormationStatusService {
    pub fn new(
        formations: Arc<dyn FormationRepository>,
        scenarios: Arc<dyn ScenarioDefinitions>,
        constraints: Arc<dyn ConstraintEngine>,
    ) -> Self {
        FormationStatusService {
            formations,
            scenarios,
            constraints,
        }
    }

    pub async fn update_with_constraints(
        &self,
        scope: &Scope<'_>,
        formation: &Formation,
        operation: FormationOperation,
    ) -> Result<()> {
        let template_id = &formation.formation_template_id;
        let mut details = JoinPointDetails {
            location: JoinPointLocation::PRE_NOTIFICATION_STATUS_RETURNED,
            operation,
            subject: StatusSubject::Formation(formation.clone()),
        };

        enforce_pre(self.constraints.as_ref(), scope, &mut details, template_id).await?;
        self.formations
            .update(scope, formation)
            .await
            .with_context(|| format!("while updating formation {}", formation.id))?;
        counter!(FORMATION_STATE_TRANSITIONS, "state" => formation.state.as_str()).increment(1);
        tracing::info!(
            formation_id = %formation.id,
            state = formation.state.as_str(),
            "Updated formation state"
        );
        enforce_post(self.constraints.as_ref(), scope, &mut details, template_id).await
    }

    /// Moves the formation to an error state and records why.
    pub async fn set_formation_to_error_state_with_constraints(
        &self,
        scope: &Scope<'_>,
        formation: &Formation,
        error: NotificationError,
        state: FormationState,
        operation: FormationOperation,
    ) -> Result<Formation> {
        let mut formation = formation.clone();
        formation.state = state;
        formation.error = Some(error);
        self.update_with_constraints(scope, &formation, operation)
            .await?;
        Ok(formation)
    }

    /// Removes the formation and its scenario from the label definitions.
    pub async fn delete_formation_entity_and_scenarios_with_constraints(
        &self,
        scope: &Scope<'_>,
        formation: &Formation,
        operation: FormationOperation,
    ) -> Result<()> {
        let template_id = &formation.formation_template_id;
        let mut details = JoinPointDetails {
            location: JoinPointLocation::PRE_NOTIFICATION_STATUS_RETURNED,
            operation,
            subject: StatusSubject::Formation(formation.clone()),
        };

        enforce_pre(self.constraints.as_ref(), scope, &mut details, template_id).await?;
        self.formations
            .delete(scope, &formation.id)
            .await
            .with_context(|| format!("while deleting formation {}", formation.id))?;
        self.scenarios
            .remove_scenario(scope, &formation.name)
            .await
            .with_context(|| format!("while removing scenario {}", formation.name))?;
        counter!(FORMATION_STATE_TRANSITIONS, "state" => "DELETED").increment(1);
        tracing::info!(formation_id = %formation.id, "Deleted formation");
        enforce_post(self.constraints.as_ref(), scope, &mut details, template_id).await
    }
}

/// State reported by an async-callback receiver.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusReport {
    pub state: AssignmentState,
    pub configuration: Option<Value>,
    pub error: Option<String>,
}

pub struct AssignmentStatusService {
    assignments: Arc<dyn FormationAssignmentRepository>,
    formations: Arc<dyn FormationRepository>,
    constraints: Arc<dyn ConstraintEngine>,
}

impl AssignmentStatusService {
    pub fn new(
        assignments: Arc<dyn FormationAssignmentRepository>,
        formations: Arc<dyn FormationRepository>,
        constraints: Arc<dyn ConstraintEngine>,
    ) -> Self {
        AssignmentStatusService {
            assignments,
            formations,
            constraints,
        }
    }

    async fn template_id(&self, scope: &Scope<'_>, formation_id: &str) -> Result<String> {
        let formation = self
            .formations
            .get(scope, formation_id)
            .await
            .with_context(|| format!("while getting formation {formation_id}"))?;
        Ok(formation.formation_template_id)
    }

    pub async fn update_with_constraints(
        &self,
        scope: &Scope<'_>,
        assignment: &FormationAssignment,
        operation: FormationOperation,
    ) -> Result<()> {
        let template_id = self.template_id(scope, &assignment.formation_id).await?;
        let mut details = JoinPointDetails {
            location: JoinPointLocation::PRE_NOTIFICATION_STATUS_RETURNED,
            operation,
            subject: StatusSubject::Assignment(assignment.clone()),
        };

        enforce_pre(self.constraints.as_ref(), scope, &mut details, &template_id).await?;
        self.assignments
            .update(scope, assignment)
            .await
            .with_context(|| format!("while updating formation assignment {}", assignment.id))?;
        tracing::debug!(
            assignment_id = %assignment.id,
            state = assignment.state.as_str(),
            "Updated formation assignment state"
        );
        enforce_post(self.constraints.as_ref(), scope, &mut details, &template_id).await
    }

    pub async fn set_assignment_to_error_state(
        &self,
        scope: &Scope<'_>,
        assignment: &FormationAssignment,
        error: NotificationError,
        state: AssignmentState,
        operation: FormationOperation,
    ) -> Result<FormationAssignment> {
        let mut assignment = assignment.clone();
        assignment.state = state;
        assignment.error = Some(error);
        self.update_with_constraints(scope, &assignment, operation)
            .await?;
        Ok(assignment)
    }

    pub async fn delete_with_constraints(
        &self,
        scope: &Scope<'_>,
        assignment: &FormationAssignment,
        operation: FormationOperation,
    ) -> Result<()> {
        let template_id = self.template_id(scope, &assignment.formation_id).await?;
        let mut details = JoinPointDetails {
            location: JoinPointLocation::PRE_NOTIFICATION_STATUS_RETURNED,
            operation,
            subject: StatusSubject::Assignment(assignment.clone()),
        };

        enforce_pre(self.constraints.as_ref(), scope, &mut details, &template_id).await?;
        self.assignments
            .delete(scope, &assignment.id)
            .await
            .with_context(|| format!("while deleting formation assignment {}", assignment.id))?;
        tracing::debug!(assignment_id = %assignment.id, "Deleted formation assignment");
        enforce_post(self.constraints.as_ref(), scope, &mut details, &template_id).await
    }

    /// Applies a status report for an assignment whose webhook answered
    /// asynchronously. Returns the updated assignment, or `None` when the
    /// report completed a deletion.
    pub async fn handle_callback(
        &self,
        scope: &Scope<'_>,
        assignment_id: &str,
        report: StatusReport,
    ) -> Result<Option<FormationAssignment>> {
        let mut assignment = self
            .assignments
            .get(scope, assignment_id)
            .await
            .with_context(|| format!("while getting formation assignment {assignment_id}"))?;
        let message = || report.error.clone().unwrap_or_default();

        use AssignmentState::*;
        match (assignment.state, report.state) {
            (Deleting | DeleteError, Ready) => {
                self.delete_with_constraints(scope, &assignment, FormationOperation::Unassign)
                    .await?;
                Ok(None)
            }
            (Deleting | DeleteError, DeleteError) => {
                let updated = self
                    .set_assignment_to_error_state(
                        scope,
                        &assignment,
                        NotificationError::client(message()),
                        DeleteError,
                        FormationOperation::Unassign,
                    )
                    .await?;
                Ok(Some(updated))
            }
            (Initial | ConfigPending | CreateError | Ready, Ready | ConfigPending) => {
                assignment.state = report.state;
                assignment.error = None;
                if report.configuration.is_some() {
                    assignment.value = report.configuration;
                }
                self.update_with_constraints(scope, &assignment, FormationOperation::Assign)
                    .await?;
                Ok(Some(assignment))
            }
            (Initial | ConfigPending | CreateError | Ready, CreateError) => {
                let updated = self
                    .set_assignment_to_error_state(
                        scope,
                        &assignment,
                        NotificationError::client(message()),
                        CreateError,
                        FormationOperation::Assign,
                    )
                    .await?;
                Ok(Some(updated))
            }
            (current, reported) => Err(Error::InvalidState(format!(
                "formation assignment {assignment_id} in state {} cannot move to {}",
                current.as_str(),
                reported.as_str()
            ))),
        }
    }
}
