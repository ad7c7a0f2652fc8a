//! Accessors the engine reads and writes through.
//!
//! Each trait is a narrow capability; components take only the ones they
//! call. Every method is bound to the tenant and transaction of the given
//! [`Scope`]. Single-item lookups return [`Error::NotFound`](crate::errors::Error::NotFound)
//! when nothing matches, list lookups return an empty list instead.
//!
//! Membership of a formation is expressed through scenarios: an object is in
//! formation `F` when its `scenarios` label contains `F`'s name.

use crate::context::Scope;
use crate::errors::Result;
use crate::model::{
    Application, ApplicationTemplate, AssignmentState, CustomerTenantContext, Formation,
    FormationAssignment, FormationTemplate, Label, LabelableObject, Labels, Runtime,
    RuntimeContext, Webhook, WebhookReferenceObjectType, WebhookType,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// One page of a cursor-paged listing.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total_count: usize,
    /// Cursor to pass as `after` for the next page.
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn get_by_id(&self, scope: &Scope<'_>, id: &str) -> Result<Application>;

    async fn list_by_scenarios(
        &self,
        scope: &Scope<'_>,
        scenarios: &[String],
    ) -> Result<Vec<Application>>;

    async fn list_by_scenarios_and_ids(
        &self,
        scope: &Scope<'_>,
        scenarios: &[String],
        ids: &[String],
    ) -> Result<Vec<Application>>;

    async fn list_all_by_ids(&self, scope: &Scope<'_>, ids: &[String])
    -> Result<Vec<Application>>;
}

#[async_trait]
pub trait ApplicationTemplateRepository: Send + Sync {
    async fn list_by_ids(
        &self,
        scope: &Scope<'_>,
        ids: &[String],
    ) -> Result<Vec<ApplicationTemplate>>;
}

#[async_trait]
pub trait RuntimeRepository: Send + Sync {
    async fn get_by_id(&self, scope: &Scope<'_>, id: &str) -> Result<Runtime>;

    async fn list_by_scenarios(&self, scope: &Scope<'_>, scenarios: &[String])
    -> Result<Vec<Runtime>>;

    async fn list_by_scenarios_and_ids(
        &self,
        scope: &Scope<'_>,
        scenarios: &[String],
        ids: &[String],
    ) -> Result<Vec<Runtime>>;

    async fn list_by_ids(&self, scope: &Scope<'_>, ids: &[String]) -> Result<Vec<Runtime>>;
}

#[async_trait]
pub trait RuntimeContextRepository: Send + Sync {
    async fn get_by_id(&self, scope: &Scope<'_>, id: &str) -> Result<RuntimeContext>;

    async fn list_by_scenarios(
        &self,
        scope: &Scope<'_>,
        scenarios: &[String],
    ) -> Result<Vec<RuntimeContext>>;
}

#[async_trait]
pub trait LabelRepository: Send + Sync {
    /// Labels of every given object, keyed by object ID. Objects without
    /// labels may be missing from the map.
    async fn list_for_object_ids(
        &self,
        scope: &Scope<'_>,
        object_type: LabelableObject,
        ids: &[String],
    ) -> Result<HashMap<String, Labels>>;

    async fn get_by_key(
        &self,
        scope: &Scope<'_>,
        object_type: LabelableObject,
        object_id: &str,
        key: &str,
    ) -> Result<Label>;

    async fn create(&self, scope: &Scope<'_>, label: &Label) -> Result<()>;

    /// Stores `label` if the stored version still equals `label.version`.
    /// Fails with `ConcurrentUpdate` otherwise.
    async fn update_with_version(&self, scope: &Scope<'_>, label: &Label) -> Result<()>;

    async fn delete(
        &self,
        scope: &Scope<'_>,
        object_type: LabelableObject,
        object_id: &str,
        key: &str,
    ) -> Result<()>;
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn list_by_reference_object_type_and_webhook_type(
        &self,
        scope: &Scope<'_>,
        object_type: WebhookReferenceObjectType,
        webhook_type: WebhookType,
    ) -> Result<Vec<Webhook>>;

    async fn get_by_id_and_webhook_type(
        &self,
        scope: &Scope<'_>,
        object_id: &str,
        object_type: WebhookReferenceObjectType,
        webhook_type: WebhookType,
    ) -> Result<Webhook>;

    async fn list_by_reference_object_id(
        &self,
        scope: &Scope<'_>,
        object_id: &str,
        object_type: WebhookReferenceObjectType,
    ) -> Result<Vec<Webhook>>;
}

#[async_trait]
pub trait FormationRepository: Send + Sync {
    async fn get(&self, scope: &Scope<'_>, id: &str) -> Result<Formation>;

    async fn get_by_name(&self, scope: &Scope<'_>, name: &str) -> Result<Formation>;

    async fn create(&self, scope: &Scope<'_>, formation: &Formation) -> Result<()>;

    async fn update(&self, scope: &Scope<'_>, formation: &Formation) -> Result<()>;

    async fn delete(&self, scope: &Scope<'_>, id: &str) -> Result<()>;
}

#[async_trait]
pub trait FormationTemplateRepository: Send + Sync {
    async fn get(&self, scope: &Scope<'_>, id: &str) -> Result<FormationTemplate>;
}

#[async_trait]
pub trait FormationAssignmentRepository: Send + Sync {
    async fn create(&self, scope: &Scope<'_>, assignment: &FormationAssignment) -> Result<()>;

    async fn get(&self, scope: &Scope<'_>, id: &str) -> Result<FormationAssignment>;

    async fn get_by_source_and_target(
        &self,
        scope: &Scope<'_>,
        formation_id: &str,
        source: &str,
        target: &str,
    ) -> Result<FormationAssignment>;

    async fn list_by_formation_ids(
        &self,
        scope: &Scope<'_>,
        formation_ids: &[String],
        page_size: usize,
        after: Option<&str>,
    ) -> Result<HashMap<String, Page<FormationAssignment>>>;

    async fn list_by_formation_and_states(
        &self,
        scope: &Scope<'_>,
        formation_id: &str,
        states: &[AssignmentState],
    ) -> Result<Vec<FormationAssignment>>;

    /// Every assignment of the formation where the object is source or
    /// target, in any state. Never paged.
    async fn list_for_object_id(
        &self,
        scope: &Scope<'_>,
        formation_id: &str,
        object_id: &str,
    ) -> Result<Vec<FormationAssignment>>;

    async fn list_for_formation(
        &self,
        scope: &Scope<'_>,
        formation_id: &str,
    ) -> Result<Vec<FormationAssignment>>;

    async fn update(&self, scope: &Scope<'_>, assignment: &FormationAssignment) -> Result<()>;

    async fn delete(&self, scope: &Scope<'_>, id: &str) -> Result<()>;

    async fn exists(&self, scope: &Scope<'_>, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn customer_tenant_context(
        &self,
        scope: &Scope<'_>,
        tenant_id: &str,
    ) -> Result<CustomerTenantContext>;
}

/// Bookkeeping of the allowed values of the scenarios label.
#[async_trait]
pub trait ScenarioDefinitions: Send + Sync {
    async fn remove_scenario(&self, scope: &Scope<'_>, name: &str) -> Result<()>;
}
