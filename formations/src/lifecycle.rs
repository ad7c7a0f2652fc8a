use crate::context::Scope;
use crate::dispatcher::{DeliveryOutcome, NotificationDispatcher};
use crate::errors::Result;
use crate::model::{
    CustomerTenantContext, Formation, FormationOperation, FormationState, NotificationError,
    Webhook,
};
use crate::notification::{NotificationRequest, NotificationsGenerator};
use crate::status::FormationStatusService;
use std::sync::Arc;

enum Aggregate {
    Delivered,
    Accepted,
    Failed(NotificationError),
}

/// Formation-level notifications sent to the webhooks of the formation
/// template, and the state changes that follow from their answers.
pub struct FormationLifecycle {
    generator: Arc<NotificationsGenerator>,
    dispatcher: Arc<NotificationDispatcher>,
    status: Arc<FormationStatusService>,
}

impl FormationLifecycle {
    pub fn new(
        generator: Arc<NotificationsGenerator>,
        dispatcher: Arc<NotificationDispatcher>,
        status: Arc<FormationStatusService>,
    ) -> Self {
        FormationLifecycle {
            generator,
            dispatcher,
            status,
        }
    }

    // Stops at the first failure; the remaining webhooks get the retry.
    async fn send_all(&self, requests: &[NotificationRequest]) -> Aggregate {
        let mut accepted = false;
        for request in requests {
            match self.dispatcher.dispatch(request).await {
                DeliveryOutcome::Delivered { .. } => {}
                DeliveryOutcome::Accepted => accepted = true,
                DeliveryOutcome::Rejected { message } => {
                    return Aggregate::Failed(NotificationError::client(message));
                }
                DeliveryOutcome::Failed { message } => {
                    return Aggregate::Failed(NotificationError::technical(message));
                }
            }
        }
        if accepted {
            Aggregate::Accepted
        } else {
            Aggregate::Delivered
        }
    }

    /// Announces the formation and moves it to `READY`, to `INITIAL` while an
    /// async receiver has not answered, or to `CREATE_ERROR`.
    pub async fn notify_created(
        &self,
        scope: &Scope<'_>,
        formation: &Formation,
        webhooks: &[Webhook],
        customer: &CustomerTenantContext,
    ) -> Result<Formation> {
        let operation = FormationOperation::CreateFormation;
        let aggregate = if webhooks.is_empty() {
            Aggregate::Delivered
        } else {
            let requests = self.generator.generate_formation_notifications(
                scope, webhooks, formation, operation, customer,
            )?;
            self.send_all(&requests).await
        };

        let mut updated = formation.clone();
        match aggregate {
            Aggregate::Delivered => {
                updated.state = FormationState::Ready;
                updated.error = None;
            }
            Aggregate::Accepted => {
                updated.state = FormationState::Initial;
                updated.error = None;
            }
            Aggregate::Failed(error) => {
                return self
                    .status
                    .set_formation_to_error_state_with_constraints(
                        scope,
                        formation,
                        error,
                        FormationState::CreateError,
                        operation,
                    )
                    .await;
            }
        }

        if updated != *formation {
            self.status
                .update_with_constraints(scope, &updated, operation)
                .await?;
        }
        Ok(updated)
    }

    /// Announces the deletion. Returns `true` once the formation is gone;
    /// otherwise it stays `DELETING` or `DELETE_ERROR`.
    pub async fn notify_deleted(
        &self,
        scope: &Scope<'_>,
        formation: &Formation,
        webhooks: &[Webhook],
        customer: &CustomerTenantContext,
    ) -> Result<bool> {
        let operation = FormationOperation::DeleteFormation;
        let aggregate = if webhooks.is_empty() {
            Aggregate::Delivered
        } else {
            let requests = self.generator.generate_formation_notifications(
                scope, webhooks, formation, operation, customer,
            )?;
            self.send_all(&requests).await
        };

        match aggregate {
            Aggregate::Delivered => {
                self.status
                    .delete_formation_entity_and_scenarios_with_constraints(
                        scope, formation, operation,
                    )
                    .await?;
                Ok(true)
            }
            Aggregate::Accepted => {
                if formation.state != FormationState::Deleting || formation.error.is_some() {
                    let mut updated = formation.clone();
                    updated.state = FormationState::Deleting;
                    updated.error = None;
                    self.status
                        .update_with_constraints(scope, &updated, operation)
                        .await?;
                }
                Ok(false)
            }
            Aggregate::Failed(error) => {
                self.status
                    .set_formation_to_error_state_with_constraints(
                        scope,
                        formation,
                        error,
                        FormationState::DeleteError,
                        operation,
                    )
                    .await?;
                Ok(false)
            }
        }
    }
}
