//! In-memory doubles shared by the unit tests.

use crate::config::DispatchConfig;
use crate::context::{Scope, Transaction, Transactioner};
use crate::dispatcher::{
    NotificationDispatcher, TransportError, WebhookClient, WebhookResponse,
};
use crate::errors::{Error, Result};
use crate::formation::FormationService;
use crate::formation_assignment::FormationAssignmentService;
use crate::lifecycle::FormationLifecycle;
use crate::model::{
    Application, ApplicationTemplate, ApplicationWithLabels, AssignmentState,
    CustomerTenantContext, Formation, FormationAssignment, FormationOperation, FormationState,
    FormationTemplate, Label, LabelableObject, Labels, ParticipantType, Runtime, RuntimeContext,
    RuntimeWithLabels, SCENARIOS_LABEL_KEY, TransportWebhook, Webhook, WebhookMode,
    WebhookReferenceObjectType, WebhookType,
};
use crate::notification::{NotificationRequest, NotificationsGenerator};
use crate::notification::builder::configuration_change_input;
use crate::reconciler::FormationReconciler;
use crate::repository::{
    ApplicationRepository, ApplicationTemplateRepository, FormationAssignmentRepository,
    FormationRepository, FormationTemplateRepository, LabelRepository, Page,
    RuntimeContextRepository, RuntimeRepository, ScenarioDefinitions, TenantRepository,
    WebhookRepository,
};
use crate::scenario::ScenarioLabelService;
use crate::status::{
    AssignmentStatusService, ConstraintEngine, FormationStatusService, JoinPointDetails,
    JoinPointLocation,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEMPLATE_ID: &str = "FT";

#[derive(Default)]
struct Data {
    applications: Vec<Application>,
    application_templates: Vec<ApplicationTemplate>,
    runtimes: Vec<Runtime>,
    runtime_contexts: Vec<RuntimeContext>,
    labels: Vec<Label>,
    webhooks: Vec<Webhook>,
    formations: Vec<Formation>,
    formation_templates: Vec<FormationTemplate>,
    assignments: Vec<FormationAssignment>,
    removed_scenarios: Vec<String>,
    failures: HashSet<String>,
    writes: usize,
    commits: usize,
    rollbacks: usize,
    /// Pre-images of the records each open transaction changed.
    journal: HashMap<usize, Vec<Undo>>,
}

impl Data {
    fn scenarios_of(&self, object_type: LabelableObject, object_id: &str) -> Vec<String> {
        self.labels
            .iter()
            .find(|l| {
                l.object_type == object_type && l.object_id == object_id && l.key == SCENARIOS_LABEL_KEY
            })
            .and_then(|l| serde_json::from_value(l.value.clone()).ok())
            .unwrap_or_default()
    }

    fn in_scenarios(&self, object_type: LabelableObject, object_id: &str, scenarios: &[String]) -> bool {
        self.scenarios_of(object_type, object_id)
            .iter()
            .any(|s| scenarios.contains(s))
    }
}

/// Pre-image of one record written inside a transaction.
enum Undo {
    Label(String, Option<Label>),
    Formation(String, Option<Formation>),
    Assignment(String, Option<FormationAssignment>),
    RemovedScenario(String),
}

impl Undo {
    fn apply(self, d: &mut Data) {
        match self {
            Undo::Label(id, prior) => restore(&mut d.labels, &id, prior, label_id),
            Undo::Formation(id, prior) => restore(&mut d.formations, &id, prior, formation_id),
            Undo::Assignment(id, prior) => restore(&mut d.assignments, &id, prior, assignment_id),
            Undo::RemovedScenario(name) => {
                if let Some(index) = d.removed_scenarios.iter().rposition(|s| *s == name) {
                    d.removed_scenarios.remove(index);
                }
            }
        }
    }
}

fn label_id(label: &Label) -> &str {
    &label.id
}

fn formation_id(formation: &Formation) -> &str {
    &formation.id
}

fn assignment_id(assignment: &FormationAssignment) -> &str {
    &assignment.id
}

/// Records of `before` that are gone or different in `after`, plus the ids
/// of records `after` added.
fn changed<T: Clone + PartialEq>(
    before: &[T],
    after: &[T],
    id: fn(&T) -> &str,
) -> Vec<(String, Option<T>)> {
    let mut changes = Vec::new();
    for old in before {
        match after.iter().find(|new| id(new) == id(old)) {
            Some(new) if new == old => {}
            _ => changes.push((id(old).to_string(), Some(old.clone()))),
        }
    }
    for new in after {
        if !before.iter().any(|old| id(old) == id(new)) {
            changes.push((id(new).to_string(), None));
        }
    }
    changes
}

fn restore<T>(items: &mut Vec<T>, key: &str, prior: Option<T>, id: fn(&T) -> &str) {
    match prior {
        Some(item) => match items.iter().position(|existing| id(existing) == key) {
            Some(index) => items[index] = item,
            None => items.push(item),
        },
        None => items.retain(|existing| id(existing) != key),
    }
}

/// Copy of the tables writes can touch, taken right before one write.
struct Before {
    labels: Vec<Label>,
    formations: Vec<Formation>,
    assignments: Vec<FormationAssignment>,
    removed_scenarios: usize,
}

impl Before {
    fn of(d: &Data) -> Self {
        Before {
            labels: d.labels.clone(),
            formations: d.formations.clone(),
            assignments: d.assignments.clone(),
            removed_scenarios: d.removed_scenarios.len(),
        }
    }

    fn undo(self, d: &Data) -> Vec<Undo> {
        let mut undo: Vec<Undo> = changed(&self.labels, &d.labels, label_id)
            .into_iter()
            .map(|(id, prior)| Undo::Label(id, prior))
            .collect();
        undo.extend(
            changed(&self.formations, &d.formations, formation_id)
                .into_iter()
                .map(|(id, prior)| Undo::Formation(id, prior)),
        );
        undo.extend(
            changed(&self.assignments, &d.assignments, assignment_id)
                .into_iter()
                .map(|(id, prior)| Undo::Assignment(id, prior)),
        );
        undo.extend(
            d.removed_scenarios[self.removed_scenarios..]
                .iter()
                .cloned()
                .map(Undo::RemovedScenario),
        );
        undo
    }
}

/// Transactions are told apart by the address of their boxed state, which
/// is what both the repositories (through the scope) and the transaction
/// itself can see.
fn tx_key(tx: &dyn Transaction) -> usize {
    std::ptr::from_ref(tx).cast::<()>() as usize
}

/// Every repository plus the transactioner over one shared state.
///
/// Writes are visible to everyone at once; each transaction journals the
/// records it changed so a rollback puts exactly those back.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    data: Arc<Mutex<Data>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Data) -> T) -> T {
        f(&mut self.data.lock().unwrap())
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.with(|d| d.failures.contains(operation)) {
            return Err(Error::Internal(format!("injected failure in {operation}")));
        }
        Ok(())
    }

    fn write<T>(
        &self,
        scope: &Scope<'_>,
        operation: &str,
        f: impl FnOnce(&mut Data) -> Result<T>,
    ) -> Result<T> {
        self.check(operation)?;
        let key = tx_key(scope.tx());
        self.with(|d| {
            let before = Before::of(d);
            let value = f(d)?;
            d.writes += 1;
            let undo = before.undo(d);
            d.journal.entry(key).or_default().extend(undo);
            Ok(value)
        })
    }

    fn undo(&self, key: usize) {
        self.with(|d| {
            let undo = d.journal.remove(&key).unwrap_or_default();
            for entry in undo.into_iter().rev() {
                entry.apply(d);
            }
        });
    }

    /// Makes every later call of `operation` ("entity.method") fail.
    pub fn fail_on(&self, operation: &str) {
        self.with(|d| d.failures.insert(operation.to_string()));
    }

    pub fn writes(&self) -> usize {
        self.with(|d| d.writes)
    }

    pub fn commits(&self) -> usize {
        self.with(|d| d.commits)
    }

    pub fn rollbacks(&self) -> usize {
        self.with(|d| d.rollbacks)
    }

    pub fn formation(&self, id: &str) -> Option<Formation> {
        self.with(|d| d.formations.iter().find(|f| f.id == id).cloned())
    }

    pub fn assignment(&self, id: &str) -> Option<FormationAssignment> {
        self.with(|d| d.assignments.iter().find(|a| a.id == id).cloned())
    }

    pub fn assignments_of(&self, formation_id: &str) -> Vec<FormationAssignment> {
        self.with(|d| {
            d.assignments
                .iter()
                .filter(|a| a.formation_id == formation_id)
                .cloned()
                .collect()
        })
    }

    pub fn webhook(&self, id: &str) -> Option<Webhook> {
        self.with(|d| d.webhooks.iter().find(|w| w.id == id).cloned())
    }

    pub fn removed_scenarios(&self) -> Vec<String> {
        self.with(|d| d.removed_scenarios.clone())
    }

    pub fn scenarios_of(&self, object_type: LabelableObject, object_id: &str) -> Vec<String> {
        self.with(|d| d.scenarios_of(object_type, object_id))
    }

    pub fn put_assignment(&self, assignment: FormationAssignment) {
        self.with(|d| upsert(&mut d.assignments, assignment, |a, b| a.id == b.id));
    }

    pub fn put_webhook(&self, webhook: Webhook) {
        self.with(|d| upsert(&mut d.webhooks, webhook, |a, b| a.id == b.id));
    }

    pub fn put_formation(&self, formation: Formation) {
        self.with(|d| upsert(&mut d.formations, formation, |a, b| a.id == b.id));
    }

    pub fn put_formation_template(&self, template: FormationTemplate) {
        self.with(|d| upsert(&mut d.formation_templates, template, |a, b| a.id == b.id));
    }

    pub fn put_application(&self, application: Application) {
        self.with(|d| upsert(&mut d.applications, application, |a, b| a.id == b.id));
    }

    pub fn put_application_template(&self, template: ApplicationTemplate) {
        self.with(|d| upsert(&mut d.application_templates, template, |a, b| a.id == b.id));
    }

    pub fn put_runtime(&self, runtime: Runtime) {
        self.with(|d| upsert(&mut d.runtimes, runtime, |a, b| a.id == b.id));
    }

    pub fn put_runtime_context(&self, context: RuntimeContext) {
        self.with(|d| upsert(&mut d.runtime_contexts, context, |a, b| a.id == b.id));
    }

    pub fn put_scenarios(&self, object_type: LabelableObject, object_id: &str, scenarios: &[&str]) {
        if scenarios.is_empty() {
            return;
        }
        let label = Label {
            id: format!("scenarios-{object_id}"),
            tenant_id: "tenant".into(),
            key: SCENARIOS_LABEL_KEY.into(),
            value: json!(scenarios),
            object_id: object_id.into(),
            object_type,
            version: 0,
        };
        self.with(|d| {
            upsert(&mut d.labels, label, |a, b| {
                a.object_type == b.object_type && a.object_id == b.object_id && a.key == b.key
            })
        });
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T, &T) -> bool) {
    match items.iter().position(|existing| same(existing, &item)) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}

struct MemoryTransaction {
    store: InMemoryStore,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let key = tx_key(&*self);
        if let Err(e) = self.store.check("transaction.commit") {
            self.store.undo(key);
            return Err(e);
        }
        self.store.with(|d| {
            d.journal.remove(&key);
            d.commits += 1;
        });
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let key = tx_key(&*self);
        self.store.undo(key);
        self.store.with(|d| d.rollbacks += 1);
        Ok(())
    }
}

#[async_trait]
impl Transactioner for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.check("transaction.begin")?;
        let tx: Box<dyn Transaction> = Box::new(MemoryTransaction {
            store: self.clone(),
        });
        // A dropped, unfinished transaction may have lived at the same address.
        let key = tx_key(&*tx);
        self.with(|d| {
            d.journal.remove(&key);
        });
        Ok(tx)
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryStore {
    async fn get_by_id(&self, _scope: &Scope<'_>, id: &str) -> Result<Application> {
        self.check("application.get_by_id")?;
        self.with(|d| d.applications.iter().find(|a| a.id == id).cloned())
            .ok_or_else(|| Error::not_found("application", id))
    }

    async fn list_by_scenarios(&self, _scope: &Scope<'_>, scenarios: &[String]) -> Result<Vec<Application>> {
        self.check("application.list_by_scenarios")?;
        Ok(self.with(|d| {
            d.applications
                .iter()
                .filter(|a| d.in_scenarios(LabelableObject::Application, &a.id, scenarios))
                .cloned()
                .collect()
        }))
    }

    async fn list_by_scenarios_and_ids(
        &self,
        _scope: &Scope<'_>,
        scenarios: &[String],
        ids: &[String],
    ) -> Result<Vec<Application>> {
        self.check("application.list_by_scenarios_and_ids")?;
        Ok(self.with(|d| {
            d.applications
                .iter()
                .filter(|a| ids.contains(&a.id))
                .filter(|a| d.in_scenarios(LabelableObject::Application, &a.id, scenarios))
                .cloned()
                .collect()
        }))
    }

    async fn list_all_by_ids(&self, _scope: &Scope<'_>, ids: &[String]) -> Result<Vec<Application>> {
        self.check("application.list_all_by_ids")?;
        Ok(self.with(|d| {
            d.applications
                .iter()
                .filter(|a| ids.contains(&a.id))
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl ApplicationTemplateRepository for InMemoryStore {
    async fn list_by_ids(&self, _scope: &Scope<'_>, ids: &[String]) -> Result<Vec<ApplicationTemplate>> {
        self.check("application_template.list_by_ids")?;
        Ok(self.with(|d| {
            d.application_templates
                .iter()
                .filter(|t| ids.contains(&t.id))
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl RuntimeRepository for InMemoryStore {
    async fn get_by_id(&self, _scope: &Scope<'_>, id: &str) -> Result<Runtime> {
        self.check("runtime.get_by_id")?;
        self.with(|d| d.runtimes.iter().find(|r| r.id == id).cloned())
            .ok_or_else(|| Error::not_found("runtime", id))
    }

    async fn list_by_scenarios(&self, _scope: &Scope<'_>, scenarios: &[String]) -> Result<Vec<Runtime>> {
        self.check("runtime.list_by_scenarios")?;
        Ok(self.with(|d| {
            d.runtimes
                .iter()
                .filter(|r| d.in_scenarios(LabelableObject::Runtime, &r.id, scenarios))
                .cloned()
                .collect()
        }))
    }

    async fn list_by_scenarios_and_ids(
        &self,
        _scope: &Scope<'_>,
        scenarios: &[String],
        ids: &[String],
    ) -> Result<Vec<Runtime>> {
        self.check("runtime.list_by_scenarios_and_ids")?;
        Ok(self.with(|d| {
            d.runtimes
                .iter()
                .filter(|r| ids.contains(&r.id))
                .filter(|r| d.in_scenarios(LabelableObject::Runtime, &r.id, scenarios))
                .cloned()
                .collect()
        }))
    }

    async fn list_by_ids(&self, _scope: &Scope<'_>, ids: &[String]) -> Result<Vec<Runtime>> {
        self.check("runtime.list_by_ids")?;
        Ok(self.with(|d| {
            d.runtimes
                .iter()
                .filter(|r| ids.contains(&r.id))
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl RuntimeContextRepository for InMemoryStore {
    async fn get_by_id(&self, _scope: &Scope<'_>, id: &str) -> Result<RuntimeContext> {
        self.check("runtime_context.get_by_id")?;
        self.with(|d| d.runtime_contexts.iter().find(|c| c.id == id).cloned())
            .ok_or_else(|| Error::not_found("runtime context", id))
    }

    async fn list_by_scenarios(
        &self,
        _scope: &Scope<'_>,
        scenarios: &[String],
    ) -> Result<Vec<RuntimeContext>> {
        self.check("runtime_context.list_by_scenarios")?;
        Ok(self.with(|d| {
            d.runtime_contexts
                .iter()
                .filter(|c| d.in_scenarios(LabelableObject::RuntimeContext, &c.id, scenarios))
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl LabelRepository for InMemoryStore {
    async fn list_for_object_ids(
        &self,
        _scope: &Scope<'_>,
        object_type: LabelableObject,
        ids: &[String],
    ) -> Result<HashMap<String, Labels>> {
        self.check("label.list_for_object_ids")?;
        Ok(self.with(|d| {
            let mut labels: HashMap<String, Labels> = HashMap::new();
            for label in d
                .labels
                .iter()
                .filter(|l| l.object_type == object_type && ids.contains(&l.object_id))
            {
                labels
                    .entry(label.object_id.clone())
                    .or_default()
                    .insert(label.key.clone(), label.value.clone());
            }
            labels
        }))
    }

    async fn get_by_key(
        &self,
        _scope: &Scope<'_>,
        object_type: LabelableObject,
        object_id: &str,
        key: &str,
    ) -> Result<Label> {
        self.check("label.get_by_key")?;
        self.with(|d| {
            d.labels
                .iter()
                .find(|l| l.object_type == object_type && l.object_id == object_id && l.key == key)
                .cloned()
        })
        .ok_or_else(|| Error::not_found("label", format!("{key} of {object_id}")))
    }

    async fn create(&self, scope: &Scope<'_>, label: &Label) -> Result<()> {
        self.write(scope, "label.create", |d| {
            let exists = d.labels.iter().any(|l| {
                l.object_type == label.object_type && l.object_id == label.object_id && l.key == label.key
            });
            if exists {
                return Err(Error::AlreadyExists {
                    resource: "label",
                    id: label.id.clone(),
                });
            }
            d.labels.push(label.clone());
            Ok(())
        })
    }

    async fn update_with_version(&self, scope: &Scope<'_>, label: &Label) -> Result<()> {
        self.write(scope, "label.update_with_version", |d| {
            let stored = d
                .labels
                .iter_mut()
                .find(|l| l.id == label.id)
                .ok_or_else(|| Error::not_found("label", label.id.clone()))?;
            if stored.version != label.version {
                return Err(Error::ConcurrentUpdate {
                    resource: "label",
                    id: label.id.clone(),
                    expected: label.version,
                });
            }
            *stored = Label {
                version: label.version + 1,
                ..label.clone()
            };
            Ok(())
        })
    }

    async fn delete(
        &self,
        scope: &Scope<'_>,
        object_type: LabelableObject,
        object_id: &str,
        key: &str,
    ) -> Result<()> {
        self.write(scope, "label.delete", |d| {
            d.labels.retain(|l| {
                !(l.object_type == object_type && l.object_id == object_id && l.key == key)
            });
            Ok(())
        })
    }
}

#[async_trait]
impl WebhookRepository for InMemoryStore {
    async fn list_by_reference_object_type_and_webhook_type(
        &self,
        _scope: &Scope<'_>,
        object_type: WebhookReferenceObjectType,
        webhook_type: WebhookType,
    ) -> Result<Vec<Webhook>> {
        self.check("webhook.list_by_reference_object_type_and_webhook_type")?;
        Ok(self.with(|d| {
            d.webhooks
                .iter()
                .filter(|w| w.object_type == object_type && w.webhook_type == webhook_type)
                .cloned()
                .collect()
        }))
    }

    async fn get_by_id_and_webhook_type(
        &self,
        _scope: &Scope<'_>,
        object_id: &str,
        object_type: WebhookReferenceObjectType,
        webhook_type: WebhookType,
    ) -> Result<Webhook> {
        self.check("webhook.get_by_id_and_webhook_type")?;
        self.with(|d| {
            d.webhooks
                .iter()
                .find(|w| {
                    w.object_id == object_id
                        && w.object_type == object_type
                        && w.webhook_type == webhook_type
                })
                .cloned()
        })
        .ok_or_else(|| Error::not_found("webhook", object_id))
    }

    async fn list_by_reference_object_id(
        &self,
        _scope: &Scope<'_>,
        object_id: &str,
        object_type: WebhookReferenceObjectType,
    ) -> Result<Vec<Webhook>> {
        self.check("webhook.list_by_reference_object_id")?;
        Ok(self.with(|d| {
            d.webhooks
                .iter()
                .filter(|w| w.object_id == object_id && w.object_type == object_type)
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl FormationRepository for InMemoryStore {
    async fn get(&self, scope: &Scope<'_>, id: &str) -> Result<Formation> {
        self.check("formation.get")?;
        self.with(|d| {
            d.formations
                .iter()
                .find(|f| f.id == id && f.tenant_id == scope.tenant())
                .cloned()
        })
        .ok_or_else(|| Error::not_found("formation", id))
    }

    async fn get_by_name(&self, scope: &Scope<'_>, name: &str) -> Result<Formation> {
        self.check("formation.get_by_name")?;
        self.with(|d| {
            d.formations
                .iter()
                .find(|f| f.name == name && f.tenant_id == scope.tenant())
                .cloned()
        })
        .ok_or_else(|| Error::not_found("formation", name))
    }

    async fn create(&self, scope: &Scope<'_>, formation: &Formation) -> Result<()> {
        self.write(scope, "formation.create", |d| {
            if d.formations.iter().any(|f| f.id == formation.id) {
                return Err(Error::AlreadyExists {
                    resource: "formation",
                    id: formation.id.clone(),
                });
            }
            d.formations.push(formation.clone());
            Ok(())
        })
    }

    async fn update(&self, scope: &Scope<'_>, formation: &Formation) -> Result<()> {
        self.write(scope, "formation.update", |d| {
            let stored = d
                .formations
                .iter_mut()
                .find(|f| f.id == formation.id)
                .ok_or_else(|| Error::not_found("formation", formation.id.clone()))?;
            *stored = formation.clone();
            Ok(())
        })
    }

    async fn delete(&self, scope: &Scope<'_>, id: &str) -> Result<()> {
        self.write(scope, "formation.delete", |d| {
            d.formations.retain(|f| f.id != id);
            Ok(())
        })
    }
}

#[async_trait]
impl FormationTemplateRepository for InMemoryStore {
    async fn get(&self, _scope: &Scope<'_>, id: &str) -> Result<FormationTemplate> {
        self.check("formation_template.get")?;
        self.with(|d| d.formation_templates.iter().find(|t| t.id == id).cloned())
            .ok_or_else(|| Error::not_found("formation template", id))
    }
}

#[async_trait]
impl FormationAssignmentRepository for InMemoryStore {
    async fn create(&self, scope: &Scope<'_>, assignment: &FormationAssignment) -> Result<()> {
        self.write(scope, "formation_assignment.create", |d| {
            let exists = d.assignments.iter().any(|a| {
                a.formation_id == assignment.formation_id
                    && a.source == assignment.source
                    && a.target == assignment.target
            });
            if exists {
                return Err(Error::AlreadyExists {
                    resource: "formation assignment",
                    id: assignment.id.clone(),
                });
            }
            d.assignments.push(assignment.clone());
            Ok(())
        })
    }

    async fn get(&self, _scope: &Scope<'_>, id: &str) -> Result<FormationAssignment> {
        self.check("formation_assignment.get")?;
        self.assignment(id)
            .ok_or_else(|| Error::not_found("formation assignment", id))
    }

    async fn get_by_source_and_target(
        &self,
        _scope: &Scope<'_>,
        formation_id: &str,
        source: &str,
        target: &str,
    ) -> Result<FormationAssignment> {
        self.check("formation_assignment.get_by_source_and_target")?;
        self.with(|d| {
            d.assignments
                .iter()
                .find(|a| a.formation_id == formation_id && a.source == source && a.target == target)
                .cloned()
        })
        .ok_or_else(|| Error::not_found("formation assignment", format!("{source} -> {target}")))
    }

    async fn list_by_formation_ids(
        &self,
        _scope: &Scope<'_>,
        formation_ids: &[String],
        page_size: usize,
        after: Option<&str>,
    ) -> Result<HashMap<String, Page<FormationAssignment>>> {
        self.check("formation_assignment.list_by_formation_ids")?;
        let offset = match after {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| Error::InvalidInput(format!("invalid cursor {cursor}")))?,
            None => 0,
        };
        Ok(self.with(|d| {
            formation_ids
                .iter()
                .map(|formation_id| {
                    let all: Vec<_> = d
                        .assignments
                        .iter()
                        .filter(|a| &a.formation_id == formation_id)
                        .cloned()
                        .collect();
                    let data: Vec<_> = all.iter().skip(offset).take(page_size).cloned().collect();
                    let end = offset + data.len();
                    let page = Page {
                        total_count: all.len(),
                        end_cursor: Some(end.to_string()),
                        has_next_page: end < all.len(),
                        data,
                    };
                    (formation_id.clone(), page)
                })
                .collect()
        }))
    }

    async fn list_by_formation_and_states(
        &self,
        _scope: &Scope<'_>,
        formation_id: &str,
        states: &[AssignmentState],
    ) -> Result<Vec<FormationAssignment>> {
        self.check("formation_assignment.list_by_formation_and_states")?;
        Ok(self
            .assignments_of(formation_id)
            .into_iter()
            .filter(|a| states.contains(&a.state))
            .collect())
    }

    async fn list_for_object_id(
        &self,
        _scope: &Scope<'_>,
        formation_id: &str,
        object_id: &str,
    ) -> Result<Vec<FormationAssignment>> {
        self.check("formation_assignment.list_for_object_id")?;
        Ok(self
            .assignments_of(formation_id)
            .into_iter()
            .filter(|a| a.involves(object_id))
            .collect())
    }

    async fn list_for_formation(
        &self,
        _scope: &Scope<'_>,
        formation_id: &str,
    ) -> Result<Vec<FormationAssignment>> {
        self.check("formation_assignment.list_for_formation")?;
        Ok(self.assignments_of(formation_id))
    }

    async fn update(&self, scope: &Scope<'_>, assignment: &FormationAssignment) -> Result<()> {
        self.write(scope, "formation_assignment.update", |d| {
            let stored = d
                .assignments
                .iter_mut()
                .find(|a| a.id == assignment.id)
                .ok_or_else(|| Error::not_found("formation assignment", assignment.id.clone()))?;
            *stored = assignment.clone();
            Ok(())
        })
    }

    async fn delete(&self, scope: &Scope<'_>, id: &str) -> Result<()> {
        self.write(scope, "formation_assignment.delete", |d| {
            d.assignments.retain(|a| a.id != id);
            Ok(())
        })
    }

    async fn exists(&self, _scope: &Scope<'_>, id: &str) -> Result<bool> {
        self.check("formation_assignment.exists")?;
        Ok(self.assignment(id).is_some())
    }
}

#[async_trait]
impl TenantRepository for InMemoryStore {
    async fn customer_tenant_context(
        &self,
        _scope: &Scope<'_>,
        tenant_id: &str,
    ) -> Result<CustomerTenantContext> {
        self.check("tenant.customer_tenant_context")?;
        Ok(customer_of(tenant_id))
    }
}

#[async_trait]
impl ScenarioDefinitions for InMemoryStore {
    async fn remove_scenario(&self, scope: &Scope<'_>, name: &str) -> Result<()> {
        self.write(scope, "scenario.remove_scenario", |d| {
            d.removed_scenarios.push(name.to_string());
            Ok(())
        })
    }
}

fn customer_of(tenant_id: &str) -> CustomerTenantContext {
    CustomerTenantContext {
        customer_id: format!("customer-of-{tenant_id}"),
        account_id: Some(format!("account-of-{tenant_id}")),
        path: None,
        tenant_id: tenant_id.to_string(),
    }
}

#[derive(Clone, Debug)]
pub enum Scripted {
    Respond(WebhookResponse),
    Fail(TransportError),
    /// Answers 200 after the delay.
    Delay(Duration),
}

impl Scripted {
    pub fn respond(response: WebhookResponse) -> Self {
        Scripted::Respond(response)
    }

    pub fn fail(error: TransportError) -> Self {
        Scripted::Fail(error)
    }

    pub fn delay(delay: Duration) -> Self {
        Scripted::Delay(delay)
    }
}

fn ok_response() -> WebhookResponse {
    WebhookResponse {
        status_code: 200,
        ..Default::default()
    }
}

/// Records every request. Unscripted webhooks answer 200 without a body.
#[derive(Default)]
pub struct RecordingWebhookClient {
    scripts: Mutex<HashMap<String, Scripted>>,
    sent: Mutex<Vec<NotificationRequest>>,
}

impl RecordingWebhookClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, webhook_id: &str, scripted: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .insert(webhook_id.to_string(), scripted);
    }

    pub fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookClient for RecordingWebhookClient {
    async fn send(&self, request: &NotificationRequest) -> Result<WebhookResponse, TransportError> {
        self.sent.lock().unwrap().push(request.clone());
        let scripted = self.scripts.lock().unwrap().get(&request.webhook.id).cloned();
        match scripted {
            None => Ok(ok_response()),
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(ok_response())
            }
        }
    }
}

/// Records the join points it is called at and fails at the chosen one.
#[derive(Default)]
pub struct RecordingConstraintEngine {
    locations: Mutex<Vec<JoinPointLocation>>,
    fail_at: Mutex<Option<JoinPointLocation>>,
}

impl RecordingConstraintEngine {
    pub fn locations(&self) -> Vec<JoinPointLocation> {
        self.locations.lock().unwrap().clone()
    }

    pub fn fail_at(&self, location: JoinPointLocation) {
        *self.fail_at.lock().unwrap() = Some(location);
    }
}

#[async_trait]
impl ConstraintEngine for RecordingConstraintEngine {
    async fn enforce_constraints(
        &self,
        _scope: &Scope<'_>,
        location: JoinPointLocation,
        details: &JoinPointDetails,
        _formation_template_id: &str,
    ) -> Result<()> {
        assert_eq!(details.location, location);
        self.locations.lock().unwrap().push(location);
        if *self.fail_at.lock().unwrap() == Some(location) {
            return Err(Error::Constraint {
                location: location.to_string(),
                reason: "rejected by test engine".into(),
            });
        }
        Ok(())
    }
}

/// A configuration change request from A1 to R1 sent to `webhook_id`.
pub fn sample_request(webhook_id: &str, mode: WebhookMode) -> NotificationRequest {
    let object = configuration_change_input(
        FormationOperation::Assign,
        "formation-F",
        ApplicationWithLabels {
            application: Application {
                id: "A1".into(),
                name: "a1".into(),
                application_template_id: None,
            },
            labels: Labels::new(),
        },
        None,
        RuntimeWithLabels {
            runtime: Runtime {
                id: "R1".into(),
                name: "r1".into(),
            },
            labels: Labels::new(),
        },
        None,
        customer_of("tenant"),
    );
    NotificationRequest {
        webhook: TransportWebhook {
            id: webhook_id.to_string(),
            webhook_type: WebhookType::ConfigurationChanged,
            mode,
            url: format!("https://hooks.example/{webhook_id}").parse().unwrap(),
            timeout: None,
        },
        object,
        correlation_id: None,
        participants: None,
    }
}

/// Seeds entities into a store and wires services on top of it.
pub struct Fixture {
    pub store: InMemoryStore,
    pub client: Arc<RecordingWebhookClient>,
    pub constraints: Arc<RecordingConstraintEngine>,
    pub config: DispatchConfig,
}

impl Fixture {
    pub fn new(store: &InMemoryStore) -> Self {
        store.put_formation_template(FormationTemplate {
            id: TEMPLATE_ID.into(),
            name: "template".into(),
        });
        Fixture {
            store: store.clone(),
            client: Arc::new(RecordingWebhookClient::new()),
            constraints: Arc::new(RecordingConstraintEngine::default()),
            config: DispatchConfig::default(),
        }
    }

    pub fn formation(&self, name: &str, state: FormationState) -> Formation {
        let formation = Formation {
            id: format!("formation-{name}"),
            name: name.into(),
            formation_template_id: TEMPLATE_ID.into(),
            tenant_id: "tenant".into(),
            state,
            error: None,
        };
        self.store.put_formation(formation.clone());
        formation
    }

    pub fn application_template(&self, id: &str) -> ApplicationTemplate {
        let template = ApplicationTemplate {
            id: id.into(),
            name: id.to_lowercase(),
        };
        self.store.put_application_template(template.clone());
        template
    }

    pub fn application(&self, id: &str, template: Option<&str>, scenarios: &[&str]) -> Application {
        let application = Application {
            id: id.into(),
            name: id.to_lowercase(),
            application_template_id: template.map(String::from),
        };
        self.store.put_application(application.clone());
        self.store
            .put_scenarios(LabelableObject::Application, id, scenarios);
        application
    }

    pub fn runtime(&self, id: &str, scenarios: &[&str]) -> Runtime {
        let runtime = Runtime {
            id: id.into(),
            name: id.to_lowercase(),
        };
        self.store.put_runtime(runtime.clone());
        self.store.put_scenarios(LabelableObject::Runtime, id, scenarios);
        runtime
    }

    pub fn runtime_context(&self, id: &str, runtime_id: &str, scenarios: &[&str]) -> RuntimeContext {
        let context = RuntimeContext {
            id: id.into(),
            runtime_id: runtime_id.into(),
            key: "subaccount".into(),
            value: format!("{id}-value"),
        };
        self.store.put_runtime_context(context.clone());
        self.store
            .put_scenarios(LabelableObject::RuntimeContext, id, scenarios);
        context
    }

    pub fn webhook(
        &self,
        id: &str,
        object_id: &str,
        object_type: WebhookReferenceObjectType,
        webhook_type: WebhookType,
    ) -> Webhook {
        let webhook = Webhook {
            id: id.into(),
            webhook_type,
            object_type,
            object_id: object_id.into(),
            mode: Some(WebhookMode::Sync),
            url: Some(format!("https://hooks.example/{id}")),
            timeout_secs: None,
        };
        self.store.put_webhook(webhook.clone());
        webhook
    }

    pub fn customer(&self) -> CustomerTenantContext {
        customer_of("tenant")
    }

    /// An `INITIAL` assignment; not stored.
    pub fn assignment(
        &self,
        formation: &Formation,
        source: (&str, ParticipantType),
        target: (&str, ParticipantType),
    ) -> FormationAssignment {
        FormationAssignment {
            id: format!("fa-{}-{}-{}", formation.name, source.0, target.0),
            formation_id: formation.id.clone(),
            tenant_id: formation.tenant_id.clone(),
            source: source.0.into(),
            source_type: source.1,
            target: target.0.into(),
            target_type: target.1,
            state: AssignmentState::Initial,
            value: None,
            error: None,
        }
    }

    pub fn generator(&self) -> NotificationsGenerator {
        let store = Arc::new(self.store.clone());
        NotificationsGenerator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store,
        )
    }

    pub fn dispatcher(&self) -> NotificationDispatcher {
        NotificationDispatcher::new(self.client.clone(), &self.config)
    }

    pub fn formation_status(&self) -> FormationStatusService {
        let store = Arc::new(self.store.clone());
        FormationStatusService::new(store.clone(), store, self.constraints.clone())
    }

    pub fn assignment_status(&self) -> AssignmentStatusService {
        let store = Arc::new(self.store.clone());
        AssignmentStatusService::new(store.clone(), store, self.constraints.clone())
    }

    pub fn assignment_service(&self) -> FormationAssignmentService {
        let store = Arc::new(self.store.clone());
        FormationAssignmentService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            Arc::new(self.dispatcher()),
            Arc::new(self.assignment_status()),
        )
    }

    pub fn lifecycle(&self) -> FormationLifecycle {
        FormationLifecycle::new(
            Arc::new(self.generator()),
            Arc::new(self.dispatcher()),
            Arc::new(self.formation_status()),
        )
    }

    pub fn scenario_labels(&self) -> ScenarioLabelService {
        ScenarioLabelService::new(Arc::new(self.store.clone()))
    }

    pub fn reconciler(&self) -> FormationReconciler {
        let store = Arc::new(self.store.clone());
        FormationReconciler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            Arc::new(self.generator()),
            Arc::new(self.assignment_service()),
            Arc::new(self.formation_status()),
            Arc::new(self.lifecycle()),
            Arc::new(self.scenario_labels()),
            self.config.max_concurrent_dispatches,
        )
    }

    pub fn formation_service(&self) -> FormationService {
        let store = Arc::new(self.store.clone());
        FormationService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            Arc::new(self.generator()),
            Arc::new(self.assignment_service()),
            Arc::new(self.lifecycle()),
            Arc::new(self.scenario_labels()),
        )
    }
}

