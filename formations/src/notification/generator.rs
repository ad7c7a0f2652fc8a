//! Fan-out computation: who has to be told about a membership change.
//!
//! For an object joining or leaving a formation the generator intersects
//! "who registered a webhook" with "who is in the formation" and builds one
//! request per interested counterparty. Requests come out in a fixed order
//! (application about runtimes, runtimes about application, applications
//! about each other) so results are deterministic.

use super::builder;
use super::{NotificationRequest, Participants};
use crate::context::Scope;
use crate::errors::{Error, Result, ResultExt};
use crate::model::{
    Application, ApplicationTemplateWithLabels, ApplicationWithLabels, CustomerTenantContext,
    Formation, FormationAssignment, FormationOperation, LabelableObject, Labels, ParticipantRef,
    ParticipantType, Runtime, RuntimeContext, RuntimeContextWithLabels, RuntimeWithLabels,
    Webhook, WebhookReferenceObjectType, WebhookType,
};
use crate::repository::{
    ApplicationRepository, ApplicationTemplateRepository, LabelRepository,
    RuntimeContextRepository, RuntimeRepository, WebhookRepository,
};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::sync::Arc;

/// The change being notified about.
#[derive(Clone, Copy, Debug)]
pub struct MembershipChange<'a> {
    pub formation: &'a Formation,
    pub operation: FormationOperation,
    pub customer: &'a CustomerTenantContext,
}

impl MembershipChange<'_> {
    fn scenarios(&self) -> Vec<String> {
        vec![self.formation.name.clone()]
    }
}

/// Applications with their labels and templates, in listing order.
#[derive(Default)]
struct LabeledApplications {
    applications: IndexMap<String, ApplicationWithLabels>,
    templates: HashMap<String, ApplicationTemplateWithLabels>,
}

impl LabeledApplications {
    fn get(
        &self,
        id: &str,
    ) -> Option<(ApplicationWithLabels, Option<ApplicationTemplateWithLabels>)> {
        let application = self.applications.get(id)?;
        let template = application
            .application
            .application_template_id
            .as_ref()
            .and_then(|template_id| self.templates.get(template_id))
            .cloned();
        Some((application.clone(), template))
    }
}

pub struct NotificationsGenerator {
    applications: Arc<dyn ApplicationRepository>,
    application_templates: Arc<dyn ApplicationTemplateRepository>,
    runtimes: Arc<dyn RuntimeRepository>,
    runtime_contexts: Arc<dyn RuntimeContextRepository>,
    labels: Arc<dyn LabelRepository>,
    webhooks: Arc<dyn WebhookRepository>,
}

impl NotificationsGenerator {
    pub fn new(
        applications: Arc<dyn ApplicationRepository>,
        application_templates: Arc<dyn ApplicationTemplateRepository>,
        runtimes: Arc<dyn RuntimeRepository>,
        runtime_contexts: Arc<dyn RuntimeContextRepository>,
        labels: Arc<dyn LabelRepository>,
        webhooks: Arc<dyn WebhookRepository>,
    ) -> Self {
        NotificationsGenerator {
            applications,
            application_templates,
            runtimes,
            runtime_contexts,
            labels,
            webhooks,
        }
    }

    /// All requests caused by `object_id` joining or leaving the formation.
    pub async fn generate_notifications(
        &self,
        scope: &Scope<'_>,
        change: MembershipChange<'_>,
        object_id: &str,
        object_type: ParticipantType,
    ) -> Result<Vec<NotificationRequest>> {
        let requests = match object_type {
            ParticipantType::Application => {
                let mut requests = self
                    .notify_application_about_runtimes(scope, change, object_id)
                    .await?;
                requests.extend(
                    self.notify_runtimes_about_application(scope, change, object_id)
                        .await?,
                );
                requests.extend(
                    self.notify_applications_about_each_other(scope, change, object_id)
                        .await?,
                );
                requests
            }
            ParticipantType::Runtime => {
                self.generate_for_runtime(scope, change, object_id).await?
            }
            ParticipantType::RuntimeContext => {
                self.generate_for_runtime_context(scope, change, object_id)
                    .await?
            }
        };

        tracing::debug!(
            formation_id = %change.formation.id,
            object_id,
            object_type = object_type.as_str(),
            operation = change.operation.as_str(),
            count = requests.len(),
            "Generated notifications"
        );
        Ok(requests)
    }

    /// Rebuilds the single request for a stored assignment. Self-assignments
    /// and relations nobody listens for have none.
    pub async fn generate_assignment_notification(
        &self,
        scope: &Scope<'_>,
        change: MembershipChange<'_>,
        assignment: &FormationAssignment,
    ) -> Result<Option<NotificationRequest>> {
        if assignment.is_self() {
            return Ok(None);
        }
        let participants = Participants {
            source: assignment.source_ref(),
            target: assignment.target_ref(),
        };

        let request = match (assignment.source_type, assignment.target_type) {
            (ParticipantType::Application, ParticipantType::Application) => {
                self.application_pair_request(scope, change, &assignment.source, &assignment.target, participants)
                    .await?
            }
            (ParticipantType::Runtime, ParticipantType::Application) => {
                let Some(webhook) = self
                    .application_configuration_webhook(scope, &assignment.target)
                    .await?
                else {
                    return Ok(None);
                };
                let runtime = self.runtimes.get_by_id(scope, &assignment.source).await?;
                let request = self
                    .runtime_pair_request(scope, change, &webhook, &assignment.target, runtime, None, participants)
                    .await?;
                Some(request)
            }
            (ParticipantType::RuntimeContext, ParticipantType::Application) => {
                let Some(webhook) = self
                    .application_configuration_webhook(scope, &assignment.target)
                    .await?
                else {
                    return Ok(None);
                };
                let context = self
                    .runtime_contexts
                    .get_by_id(scope, &assignment.source)
                    .await?;
                let runtime = self.runtimes.get_by_id(scope, &context.runtime_id).await?;
                let request = self
                    .runtime_pair_request(scope, change, &webhook, &assignment.target, runtime, Some(context), participants)
                    .await?;
                Some(request)
            }
            (ParticipantType::Application, ParticipantType::Runtime) => {
                let Some(webhook) = self
                    .runtime_configuration_webhook(scope, &assignment.target)
                    .await?
                else {
                    return Ok(None);
                };
                let runtime = self.runtimes.get_by_id(scope, &assignment.target).await?;
                let request = self
                    .runtime_pair_request(scope, change, &webhook, &assignment.source, runtime, None, participants)
                    .await?;
                Some(request)
            }
            (ParticipantType::Application, ParticipantType::RuntimeContext) => {
                let context = self
                    .runtime_contexts
                    .get_by_id(scope, &assignment.target)
                    .await?;
                let Some(webhook) = self
                    .runtime_configuration_webhook(scope, &context.runtime_id)
                    .await?
                else {
                    return Ok(None);
                };
                let runtime = self.runtimes.get_by_id(scope, &context.runtime_id).await?;
                let request = self
                    .runtime_pair_request(scope, change, &webhook, &assignment.source, runtime, Some(context), participants)
                    .await?;
                Some(request)
            }
            _ => None,
        };

        Ok(request)
    }

    /// Lifecycle webhooks registered on a formation template.
    pub async fn lifecycle_webhooks(
        &self,
        scope: &Scope<'_>,
        formation_template_id: &str,
    ) -> Result<Vec<Webhook>> {
        let webhooks = self
            .webhooks
            .list_by_reference_object_id(
                scope,
                formation_template_id,
                WebhookReferenceObjectType::FormationTemplateWebhook,
            )
            .await
            .with_context(|| {
                format!("while listing webhooks for formation template {formation_template_id}")
            })?;

        Ok(webhooks
            .into_iter()
            .filter(|w| w.webhook_type == WebhookType::FormationLifecycle)
            .collect())
    }

    /// One lifecycle request per webhook, describing the formation itself.
    pub fn generate_formation_notifications(
        &self,
        scope: &Scope<'_>,
        webhooks: &[Webhook],
        formation: &Formation,
        operation: FormationOperation,
        customer: &CustomerTenantContext,
    ) -> Result<Vec<NotificationRequest>> {
        webhooks
            .iter()
            .map(|webhook| {
                let object = builder::formation_lifecycle_input(operation, formation, customer.clone());
                builder::build_request(scope, webhook, object, None)
            })
            .collect()
    }

    async fn notify_application_about_runtimes(
        &self,
        scope: &Scope<'_>,
        change: MembershipChange<'_>,
        application_id: &str,
    ) -> Result<Vec<NotificationRequest>> {
        let Some(webhook) = self
            .application_configuration_webhook(scope, application_id)
            .await?
        else {
            return Ok(Vec::new());
        };

        let scenarios = change.scenarios();
        let runtimes_in_formation = self
            .runtimes
            .list_by_scenarios(scope, &scenarios)
            .await
            .with_context(|| format!("while listing runtimes in formation {}", change.formation.name))?;
        let contexts_in_formation = self
            .runtime_contexts
            .list_by_scenarios(scope, &scenarios)
            .await
            .with_context(|| {
                format!("while listing runtime contexts in formation {}", change.formation.name)
            })?;

        let runtime_ids = runtime_ids_with_context_parents(&runtimes_in_formation, &contexts_in_formation);
        let runtimes = self
            .runtimes
            .list_by_ids(scope, &runtime_ids)
            .await
            .context("while listing runtimes by IDs")?;
        let runtimes = self.label_runtimes(scope, runtimes).await?;
        let contexts = self.label_runtime_contexts(scope, contexts_in_formation).await?;

        let application = self.get_application(scope, application_id).await?;
        let applications = self.label_applications(scope, vec![application]).await?;
        let Some((application, template)) = applications.get(application_id) else {
            return Ok(Vec::new());
        };

        let mut requests = Vec::new();
        for runtime in &runtimes_in_formation {
            let runtime = labeled(&runtimes, &runtime.id, "runtime")?;
            let object = builder::configuration_change_input(
                change.operation,
                &change.formation.id,
                application.clone(),
                template.clone(),
                runtime.clone(),
                None,
                change.customer.clone(),
            );
            let participants = Participants {
                source: ParticipantRef::new(runtime.runtime.id.clone(), ParticipantType::Runtime),
                target: ParticipantRef::new(application_id, ParticipantType::Application),
            };
            requests.push(builder::build_request(scope, &webhook, object, Some(participants))?);
        }

        for context in contexts.values() {
            let runtime = labeled(&runtimes, &context.runtime_context.runtime_id, "runtime")?;
            let object = builder::configuration_change_input(
                change.operation,
                &change.formation.id,
                application.clone(),
                template.clone(),
                runtime.clone(),
                Some(context.clone()),
                change.customer.clone(),
            );
            let participants = Participants {
                source: ParticipantRef::new(
                    context.runtime_context.id.clone(),
                    ParticipantType::RuntimeContext,
                ),
                target: ParticipantRef::new(application_id, ParticipantType::Application),
            };
            requests.push(builder::build_request(scope, &webhook, object, Some(participants))?);
        }

        Ok(requests)
    }

    async fn notify_runtimes_about_application(
        &self,
        scope: &Scope<'_>,
        change: MembershipChange<'_>,
        application_id: &str,
    ) -> Result<Vec<NotificationRequest>> {
        let listening: IndexMap<String, Webhook> = self
            .webhooks
            .list_by_reference_object_type_and_webhook_type(
                scope,
                WebhookReferenceObjectType::RuntimeWebhook,
                WebhookType::ConfigurationChanged,
            )
            .await
            .context("while listing runtime configuration changed webhooks")?
            .into_iter()
            .map(|w| (w.object_id.clone(), w))
            .collect();
        if listening.is_empty() {
            return Ok(Vec::new());
        }

        let scenarios = change.scenarios();
        let listening_ids: Vec<String> = listening.keys().cloned().collect();
        let runtimes_in_formation = self
            .runtimes
            .list_by_scenarios_and_ids(scope, &scenarios, &listening_ids)
            .await
            .with_context(|| {
                format!("while listing listening runtimes in formation {}", change.formation.name)
            })?;
        let contexts_in_formation: Vec<RuntimeContext> = self
            .runtime_contexts
            .list_by_scenarios(scope, &scenarios)
            .await
            .with_context(|| {
                format!("while listing runtime contexts in formation {}", change.formation.name)
            })?
            .into_iter()
            .filter(|rc| listening.contains_key(&rc.runtime_id))
            .collect();
        if runtimes_in_formation.is_empty() && contexts_in_formation.is_empty() {
            return Ok(Vec::new());
        }

        let runtime_ids = runtime_ids_with_context_parents(&runtimes_in_formation, &contexts_in_formation);
        let runtimes = self
            .runtimes
            .list_by_ids(scope, &runtime_ids)
            .await
            .context("while listing runtimes by IDs")?;
        let runtimes = self.label_runtimes(scope, runtimes).await?;
        let contexts = self.label_runtime_contexts(scope, contexts_in_formation).await?;

        let application = self.get_application(scope, application_id).await?;
        let applications = self.label_applications(scope, vec![application]).await?;
        let Some((application, template)) = applications.get(application_id) else {
            return Ok(Vec::new());
        };

        let mut requests = Vec::new();
        for runtime in &runtimes_in_formation {
            let Some(webhook) = listening.get(&runtime.id) else {
                continue;
            };
            let runtime = labeled(&runtimes, &runtime.id, "runtime")?;
            let object = builder::configuration_change_input(
                change.operation,
                &change.formation.id,
                application.clone(),
                template.clone(),
                runtime.clone(),
                None,
                change.customer.clone(),
            );
            let participants = Participants {
                source: ParticipantRef::new(application_id, ParticipantType::Application),
                target: ParticipantRef::new(runtime.runtime.id.clone(), ParticipantType::Runtime),
            };
            requests.push(builder::build_request(scope, webhook, object, Some(participants))?);
        }

        for context in contexts.values() {
            let parent_id = &context.runtime_context.runtime_id;
            let Some(webhook) = listening.get(parent_id) else {
                continue;
            };
            let runtime = labeled(&runtimes, parent_id, "runtime")?;
            let object = builder::configuration_change_input(
                change.operation,
                &change.formation.id,
                application.clone(),
                template.clone(),
                runtime.clone(),
                Some(context.clone()),
                change.customer.clone(),
            );
            let participants = Participants {
                source: ParticipantRef::new(application_id, ParticipantType::Application),
                target: ParticipantRef::new(
                    context.runtime_context.id.clone(),
                    ParticipantType::RuntimeContext,
                ),
            };
            requests.push(builder::build_request(scope, webhook, object, Some(participants))?);
        }

        Ok(requests)
    }

    async fn notify_applications_about_each_other(
        &self,
        scope: &Scope<'_>,
        change: MembershipChange<'_>,
        application_id: &str,
    ) -> Result<Vec<NotificationRequest>> {
        let mut listening: IndexMap<String, Webhook> = self
            .webhooks
            .list_by_reference_object_type_and_webhook_type(
                scope,
                WebhookReferenceObjectType::ApplicationWebhook,
                WebhookType::ApplicationTenantMapping,
            )
            .await
            .context("while listing application tenant mapping webhooks")?
            .into_iter()
            .map(|w| (w.object_id.clone(), w))
            .collect();
        if listening.is_empty() {
            return Ok(Vec::new());
        }

        let scenarios = change.scenarios();
        let own_webhook = listening.shift_remove(application_id);

        // The changed application may or may not still carry the scenario,
        // depending on the operation. It is never its own counterparty.
        let others = match &own_webhook {
            Some(_) => self
                .applications
                .list_by_scenarios(scope, &scenarios)
                .await
                .with_context(|| {
                    format!("while listing applications in formation {}", change.formation.name)
                })?,
            None => {
                let listening_ids: Vec<String> = listening.keys().cloned().collect();
                if listening_ids.is_empty() {
                    return Ok(Vec::new());
                }
                self.applications
                    .list_by_scenarios_and_ids(scope, &scenarios, &listening_ids)
                    .await
                    .with_context(|| {
                        format!(
                            "while listing listening applications in formation {}",
                            change.formation.name
                        )
                    })?
            }
        };
        let others: Vec<Application> = others
            .into_iter()
            .filter(|app| app.id != application_id)
            .collect();
        if others.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = others.clone();
        all.push(self.get_application(scope, application_id).await?);
        let applications = self.label_applications(scope, all).await?;
        let Some((changed, changed_template)) = applications.get(application_id) else {
            return Ok(Vec::new());
        };

        let mut requests = Vec::new();
        if let Some(webhook) = &own_webhook {
            for other in &others {
                let Some((source, source_template)) = applications.get(&other.id) else {
                    continue;
                };
                let object = builder::application_tenant_mapping_input(
                    change.operation,
                    &change.formation.id,
                    source,
                    source_template,
                    changed.clone(),
                    changed_template.clone(),
                    change.customer.clone(),
                );
                let participants = Participants {
                    source: ParticipantRef::new(other.id.clone(), ParticipantType::Application),
                    target: ParticipantRef::new(application_id, ParticipantType::Application),
                };
                requests.push(builder::build_request(scope, webhook, object, Some(participants))?);
            }
        }

        for other in &others {
            let Some(webhook) = listening.get(&other.id) else {
                continue;
            };
            let Some((target, target_template)) = applications.get(&other.id) else {
                continue;
            };
            let object = builder::application_tenant_mapping_input(
                change.operation,
                &change.formation.id,
                changed.clone(),
                changed_template.clone(),
                target,
                target_template,
                change.customer.clone(),
            );
            let participants = Participants {
                source: ParticipantRef::new(application_id, ParticipantType::Application),
                target: ParticipantRef::new(other.id.clone(), ParticipantType::Application),
            };
            requests.push(builder::build_request(scope, webhook, object, Some(participants))?);
        }

        Ok(requests)
    }

    async fn generate_for_runtime(
        &self,
        scope: &Scope<'_>,
        change: MembershipChange<'_>,
        runtime_id: &str,
    ) -> Result<Vec<NotificationRequest>> {
        let runtime = self
            .runtimes
            .get_by_id(scope, runtime_id)
            .await
            .with_context(|| format!("while getting runtime {runtime_id}"))?;
        let runtimes = self.label_runtimes(scope, vec![runtime]).await?;
        let runtime = labeled(&runtimes, runtime_id, "runtime")?;
        let scenarios = change.scenarios();

        let mut requests = Vec::new();

        // Applications in the formation that listen hear about the runtime.
        let listening: IndexMap<String, Webhook> = self
            .webhooks
            .list_by_reference_object_type_and_webhook_type(
                scope,
                WebhookReferenceObjectType::ApplicationWebhook,
                WebhookType::ConfigurationChanged,
            )
            .await
            .context("while listing application configuration changed webhooks")?
            .into_iter()
            .map(|w| (w.object_id.clone(), w))
            .collect();
        if !listening.is_empty() {
            let listening_ids: Vec<String> = listening.keys().cloned().collect();
            let apps = self
                .applications
                .list_by_scenarios_and_ids(scope, &scenarios, &listening_ids)
                .await
                .with_context(|| {
                    format!("while listing listening applications in formation {}", change.formation.name)
                })?;
            let applications = self.label_applications(scope, apps).await?;
            for (app_id, webhook) in &listening {
                let Some((application, template)) = applications.get(app_id) else {
                    continue;
                };
                let object = builder::configuration_change_input(
                    change.operation,
                    &change.formation.id,
                    application,
                    template,
                    runtime.clone(),
                    None,
                    change.customer.clone(),
                );
                let participants = Participants {
                    source: ParticipantRef::new(runtime_id, ParticipantType::Runtime),
                    target: ParticipantRef::new(app_id.clone(), ParticipantType::Application),
                };
                requests.push(builder::build_request(scope, webhook, object, Some(participants))?);
            }
        }

        // The runtime hears about every application in the formation.
        if let Some(webhook) = self.runtime_configuration_webhook(scope, runtime_id).await? {
            let apps = self
                .applications
                .list_by_scenarios(scope, &scenarios)
                .await
                .with_context(|| {
                    format!("while listing applications in formation {}", change.formation.name)
                })?;
            let applications = self.label_applications(scope, apps).await?;
            for app_id in applications.applications.keys() {
                let Some((application, template)) = applications.get(app_id) else {
                    continue;
                };
                let object = builder::configuration_change_input(
                    change.operation,
                    &change.formation.id,
                    application,
                    template,
                    runtime.clone(),
                    None,
                    change.customer.clone(),
                );
                let participants = Participants {
                    source: ParticipantRef::new(app_id.clone(), ParticipantType::Application),
                    target: ParticipantRef::new(runtime_id, ParticipantType::Runtime),
                };
                requests.push(builder::build_request(scope, &webhook, object, Some(participants))?);
            }
        }

        Ok(requests)
    }

    async fn generate_for_runtime_context(
        &self,
        scope: &Scope<'_>,
        change: MembershipChange<'_>,
        runtime_context_id: &str,
    ) -> Result<Vec<NotificationRequest>> {
        let context = self
            .runtime_contexts
            .get_by_id(scope, runtime_context_id)
            .await
            .with_context(|| format!("while getting runtime context {runtime_context_id}"))?;
        let runtime_id = context.runtime_id.clone();
        let contexts = self.label_runtime_contexts(scope, vec![context]).await?;
        let context = labeled(&contexts, runtime_context_id, "runtime context")?.clone();

        let requests = self
            .generate_for_runtime(scope, change, &runtime_id)
            .await
            .with_context(|| {
                format!("while generating notifications for parent runtime of {runtime_context_id}")
            })?;

        let parent = ParticipantRef::new(runtime_id, ParticipantType::Runtime);
        let overlay = ParticipantRef::new(runtime_context_id, ParticipantType::RuntimeContext);
        Ok(requests
            .into_iter()
            .map(|mut request| {
                request.object.set_runtime_context(context.clone());
                if let Some(participants) = request.participants.as_mut() {
                    if participants.source == parent {
                        participants.source = overlay.clone();
                    }
                    if participants.target == parent {
                        participants.target = overlay.clone();
                    }
                }
                request
            })
            .collect())
    }

    /// Request on the target application's tenant mapping webhook about the
    /// source application.
    async fn application_pair_request(
        &self,
        scope: &Scope<'_>,
        change: MembershipChange<'_>,
        source_id: &str,
        target_id: &str,
        participants: Participants,
    ) -> Result<Option<NotificationRequest>> {
        let Some(webhook) = self
            .find_webhook(
                scope,
                target_id,
                WebhookReferenceObjectType::ApplicationWebhook,
                WebhookType::ApplicationTenantMapping,
            )
            .await?
        else {
            return Ok(None);
        };

        let ids = vec![source_id.to_string(), target_id.to_string()];
        let apps = self
            .applications
            .list_all_by_ids(scope, &ids)
            .await
            .context("while listing applications by IDs")?;
        let applications = self.label_applications(scope, apps).await?;
        let (Some((source, source_template)), Some((target, target_template))) =
            (applications.get(source_id), applications.get(target_id))
        else {
            return Err(Error::not_found("application", format!("{source_id} or {target_id}")));
        };

        let object = builder::application_tenant_mapping_input(
            change.operation,
            &change.formation.id,
            source,
            source_template,
            target,
            target_template,
            change.customer.clone(),
        );
        Ok(Some(builder::build_request(scope, &webhook, object, Some(participants))?))
    }

    /// Configuration change request between an application and a runtime
    /// (optionally one of its contexts), sent to `webhook`.
    #[allow(clippy::too_many_arguments)]
    async fn runtime_pair_request(
        &self,
        scope: &Scope<'_>,
        change: MembershipChange<'_>,
        webhook: &Webhook,
        application_id: &str,
        runtime: Runtime,
        context: Option<RuntimeContext>,
        participants: Participants,
    ) -> Result<NotificationRequest> {
        let application = self
            .applications
            .get_by_id(scope, application_id)
            .await
            .with_context(|| format!("while getting application {application_id}"))?;
        let applications = self.label_applications(scope, vec![application]).await?;
        let (application, template) = applications
            .get(application_id)
            .ok_or_else(|| Error::not_found("application", application_id))?;

        let runtime_id = runtime.id.clone();
        let runtimes = self.label_runtimes(scope, vec![runtime]).await?;
        let runtime = labeled(&runtimes, &runtime_id, "runtime")?.clone();

        let context = match context {
            Some(context) => {
                let id = context.id.clone();
                let contexts = self.label_runtime_contexts(scope, vec![context]).await?;
                Some(labeled(&contexts, &id, "runtime context")?.clone())
            }
            None => None,
        };

        let object = builder::configuration_change_input(
            change.operation,
            &change.formation.id,
            application,
            template,
            runtime,
            context,
            change.customer.clone(),
        );
        builder::build_request(scope, webhook, object, Some(participants))
    }

    async fn application_configuration_webhook(
        &self,
        scope: &Scope<'_>,
        application_id: &str,
    ) -> Result<Option<Webhook>> {
        self.find_webhook(
            scope,
            application_id,
            WebhookReferenceObjectType::ApplicationWebhook,
            WebhookType::ConfigurationChanged,
        )
        .await
    }

    async fn runtime_configuration_webhook(
        &self,
        scope: &Scope<'_>,
        runtime_id: &str,
    ) -> Result<Option<Webhook>> {
        self.find_webhook(
            scope,
            runtime_id,
            WebhookReferenceObjectType::RuntimeWebhook,
            WebhookType::ConfigurationChanged,
        )
        .await
    }

    /// A missing webhook means nobody listens, not a failure.
    async fn find_webhook(
        &self,
        scope: &Scope<'_>,
        object_id: &str,
        object_type: WebhookReferenceObjectType,
        webhook_type: WebhookType,
    ) -> Result<Option<Webhook>> {
        match self
            .webhooks
            .get_by_id_and_webhook_type(scope, object_id, object_type, webhook_type)
            .await
        {
            Ok(webhook) => Ok(Some(webhook)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.context(format!(
                "while getting {} webhook for {object_id}",
                webhook_type.as_str()
            ))),
        }
    }

    async fn labels_for(
        &self,
        scope: &Scope<'_>,
        object_type: LabelableObject,
        ids: Vec<String>,
    ) -> Result<HashMap<String, Labels>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.labels
            .list_for_object_ids(scope, object_type, &ids)
            .await
            .with_context(|| format!("while listing labels for {object_type:?} objects"))
    }

    async fn get_application(&self, scope: &Scope<'_>, application_id: &str) -> Result<Application> {
        self.applications
            .get_by_id(scope, application_id)
            .await
            .with_context(|| format!("while getting application {application_id}"))
    }

    async fn label_applications(
        &self,
        scope: &Scope<'_>,
        applications: Vec<Application>,
    ) -> Result<LabeledApplications> {
        let ids: IndexSet<String> = applications.iter().map(|a| a.id.clone()).collect();
        let mut labels = self
            .labels_for(scope, LabelableObject::Application, ids.into_iter().collect())
            .await?;

        let template_ids: IndexSet<String> = applications
            .iter()
            .filter_map(|a| a.application_template_id.clone())
            .collect();
        let mut templates = HashMap::new();
        if !template_ids.is_empty() {
            let template_ids: Vec<String> = template_ids.into_iter().collect();
            let found = self
                .application_templates
                .list_by_ids(scope, &template_ids)
                .await
                .context("while listing application templates by IDs")?;
            let mut template_labels = self
                .labels_for(scope, LabelableObject::ApplicationTemplate, template_ids)
                .await?;
            for template in found {
                let labels = template_labels.remove(&template.id).unwrap_or_default();
                templates.insert(
                    template.id.clone(),
                    ApplicationTemplateWithLabels { template, labels },
                );
            }
        }

        let mut result = LabeledApplications {
            applications: IndexMap::new(),
            templates,
        };
        for application in applications {
            if result.applications.contains_key(&application.id) {
                continue;
            }
            let labels = labels.remove(&application.id).unwrap_or_default();
            result.applications.insert(
                application.id.clone(),
                ApplicationWithLabels {
                    application,
                    labels,
                },
            );
        }
        Ok(result)
    }

    async fn label_runtimes(
        &self,
        scope: &Scope<'_>,
        runtimes: Vec<Runtime>,
    ) -> Result<IndexMap<String, RuntimeWithLabels>> {
        let ids: IndexSet<String> = runtimes.iter().map(|r| r.id.clone()).collect();
        let mut labels = self
            .labels_for(scope, LabelableObject::Runtime, ids.into_iter().collect())
            .await?;

        let mut result = IndexMap::new();
        for runtime in runtimes {
            let labels = labels.remove(&runtime.id).unwrap_or_default();
            result
                .entry(runtime.id.clone())
                .or_insert(RuntimeWithLabels { runtime, labels });
        }
        Ok(result)
    }

    async fn label_runtime_contexts(
        &self,
        scope: &Scope<'_>,
        contexts: Vec<RuntimeContext>,
    ) -> Result<IndexMap<String, RuntimeContextWithLabels>> {
        let ids: IndexSet<String> = contexts.iter().map(|rc| rc.id.clone()).collect();
        let mut labels = self
            .labels_for(scope, LabelableObject::RuntimeContext, ids.into_iter().collect())
            .await?;

        let mut result = IndexMap::new();
        for runtime_context in contexts {
            let labels = labels.remove(&runtime_context.id).unwrap_or_default();
            result
                .entry(runtime_context.id.clone())
                .or_insert(RuntimeContextWithLabels {
                    runtime_context,
                    labels,
                });
        }
        Ok(result)
    }
}

/// Runtimes in the formation plus the parents of runtime contexts in the
/// formation, deduplicated, in first-seen order. A context's parent counts
/// even when the parent itself is not a member.
pub(crate) fn runtime_ids_with_context_parents(
    runtimes: &[Runtime],
    contexts: &[RuntimeContext],
) -> Vec<String> {
    let ids: IndexSet<String> = runtimes
        .iter()
        .map(|r| r.id.clone())
        .chain(contexts.iter().map(|rc| rc.runtime_id.clone()))
        .collect();
    ids.into_iter().collect()
}

fn labeled<'m, T>(map: &'m IndexMap<String, T>, id: &str, resource: &'static str) -> Result<&'m T> {
    map.get(id).ok_or_else(|| Error::not_found(resource, id))
}
