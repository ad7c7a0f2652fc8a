use crate::context::Scope;
use crate::errors::{Error, Result, ResultExt};
use crate::model::{Label, LabelableObject, SCENARIOS_LABEL_KEY};
use crate::repository::LabelRepository;
use serde_json::Value;
use std::sync::Arc;

/// Membership bookkeeping on the `scenarios` label of an object.
pub struct ScenarioLabelService {
    labels: Arc<dyn LabelRepository>,
}

fn scenarios_of(label: &Label) -> Result<Vec<String>> {
    serde_json::from_value(label.value.clone()).map_err(|e| {
        Error::InvalidInput(format!(
            "scenarios label of {} is not a list of names: {e}",
            label.object_id
        ))
    })
}

impl ScenarioLabelService {
    pub fn new(labels: Arc<dyn LabelRepository>) -> Self {
        ScenarioLabelService { labels }
    }

    pub async fn assign_to_scenario(
        &self,
        scope: &Scope<'_>,
        object_id: &str,
        object_type: LabelableObject,
        formation_name: &str,
    ) -> Result<()> {
        let mut label = match self
            .labels
            .get_by_key(scope, object_type, object_id, SCENARIOS_LABEL_KEY)
            .await
        {
            Ok(label) => label,
            Err(e) if e.is_not_found() => {
                let label = Label {
                    id: uuid::Uuid::new_v4().to_string(),
                    tenant_id: scope.tenant().to_string(),
                    key: SCENARIOS_LABEL_KEY.to_string(),
                    value: Value::from(vec![formation_name.to_string()]),
                    object_id: object_id.to_string(),
                    object_type,
                    version: 0,
                };
                return self
                    .labels
                    .create(scope, &label)
                    .await
                    .with_context(|| format!("while creating scenarios label for {object_id}"));
            }
            Err(e) => {
                return Err(e.context(format!("while getting scenarios label for {object_id}")));
            }
        };

        let mut scenarios = scenarios_of(&label)?;
        if scenarios.iter().any(|s| s == formation_name) {
            return Ok(());
        }
        scenarios.push(formation_name.to_string());
        label.value = Value::from(scenarios);
        self.labels
            .update_with_version(scope, &label)
            .await
            .with_context(|| format!("while updating scenarios label for {object_id}"))
    }

    /// Drops the formation from the object's scenarios. Removing the last
    /// scenario deletes the label instead of storing an empty list.
    pub async fn unassign_from_scenario(
        &self,
        scope: &Scope<'_>,
        object_id: &str,
        object_type: LabelableObject,
        formation_name: &str,
    ) -> Result<()> {
        let mut label = match self
            .labels
            .get_by_key(scope, object_type, object_id, SCENARIOS_LABEL_KEY)
            .await
        {
            Ok(label) => label,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(e.context(format!("while getting scenarios label for {object_id}")));
            }
        };

        let scenarios: Vec<String> = scenarios_of(&label)?
            .into_iter()
            .filter(|s| s != formation_name)
            .collect();

        if scenarios.is_empty() {
            tracing::debug!(object_id, "Removing last scenario, deleting label");
            return self
                .labels
                .delete(scope, object_type, object_id, SCENARIOS_LABEL_KEY)
                .await
                .with_context(|| format!("while deleting scenarios label for {object_id}"));
        }

        label.value = Value::from(scenarios);
        self.labels
            .update_with_version(scope, &label)
            .await
            .with_context(|| format!("while updating scenarios label for {object_id}"))
    }
}
