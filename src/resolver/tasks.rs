//! Task Completion Engine
//!
//! Drives a workflow task to completion: form and outcome resolution,
//! server-side validation, forced state overlay, identifier-sequence and
//! date assignment, then the engine call. Policy outcomes (unvalidated
//! submitter, failed validation) are normal return values; only the
//! fatal classes raise errors.

use super::{InstanceResolver, RequestContext};
use crate::acl::AclAction;
use crate::error::{ResolverError, ResolverResult};
use crate::model::{OutcomeResult, StateChange};
use crate::store::EagerRelation;
use crate::workflow::marshal_variables;
use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteTaskInput {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub form: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub state: Option<Map<String, Value>>,
}

/// Closed result set of a task completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaskCompletionOutcome {
    Success,
    ValidatedEmailRequired,
    ValidationFailed,
}

impl InstanceResolver {
    pub async fn complete_task(
        &self,
        ctx: &RequestContext,
        input: &CompleteTaskInput,
    ) -> ResolverResult<TaskCompletionOutcome> {
        for (name, value) in [
            ("id", &input.id),
            ("task_id", &input.task_id),
            ("form", &input.form),
            ("outcome", &input.outcome),
        ] {
            if value.is_empty() {
                return Err(ResolverError::UserInput(name.into()));
            }
        }

        let form = self
            .definition()
            .form(&input.form)
            .ok_or_else(|| ResolverError::not_found(format!("form '{}'", input.form)))?;
        let outcome = form.outcome(&input.outcome).ok_or_else(|| {
            ResolverError::not_found(format!(
                "outcome '{}' on form '{}'",
                input.outcome, input.form
            ))
        })?;
        if outcome.result != OutcomeResult::Complete {
            return Err(ResolverError::Logic(format!(
                "outcome '{}' does not complete the task",
                input.outcome
            )));
        }

        // Relations the validation set reads are prefetched with the
        // entity so rules evaluate against loaded data.
        let validation = form
            .validation
            .as_ref()
            .and_then(|name| self.definition().validations.get(name));
        let eager: Vec<EagerRelation> = validation
            .map(|set| {
                let bindings = set.referenced_bindings();
                self.view()
                    .relations()
                    .iter()
                    .filter_map(|relation| relation.field.clone())
                    .filter(|field| bindings.contains(field))
                    .map(EagerRelation::path)
                    .collect()
            })
            .unwrap_or_default();

        let (instance, subject, tasks) = tokio::join!(
            self.fetch_instance(ctx, &input.id, &eager),
            self.resolve_subject(ctx),
            async {
                self.engine
                    .list_tasks(&input.id)
                    .await
                    .map_err(|e| self.engine_error(e))
            }
        );
        let mut instance = instance?.ok_or_else(|| {
            ResolverError::not_found(format!("{} '{}'", self.definition().name, input.id))
        })?;
        let subject = subject?;
        let task = tasks?
            .into_iter()
            .find(|task| task.id == input.task_id)
            .ok_or_else(|| ResolverError::not_found(format!("task '{}'", input.task_id)))?;

        let (targets, owner) = self.targets(subject.as_ref(), Some(&instance));
        let access = self.acl(&targets, AclAction::Access, owner);
        if !access.allow || !access.scope_allows(owner) {
            return Err(ResolverError::authorization(format!(
                "access to {} '{}' denied",
                self.definition().name,
                input.id
            )));
        }
        let task_match = self.acl(&targets, AclAction::Task, owner);
        if !task_match.allow {
            return Err(ResolverError::authorization(format!(
                "completing tasks on {} '{}' denied",
                self.definition().name,
                input.id
            )));
        }

        if outcome.requires_validated_submitter {
            let Some(subject) = &subject else {
                return Err(ResolverError::authorization(
                    "outcome requires an authenticated submitter",
                ));
            };
            if !subject.email_validated {
                return Ok(TaskCompletionOutcome::ValidatedEmailRequired);
            }
        }

        if !task_match.task_allowed(&task.task_definition_key) {
            return Err(ResolverError::authorization(format!(
                "task '{}' not permitted",
                task.task_definition_key
            )));
        }

        if let Some(set) = validation {
            if !outcome.skip_validations {
                let failed = set.evaluate(instance.fields());
                if !failed.is_empty() {
                    debug!(
                        model = %self.definition().name,
                        id = %input.id,
                        bindings = ?failed,
                        "task completion rejected by validation"
                    );
                    return Ok(TaskCompletionOutcome::ValidationFailed);
                }
            }
        }

        // Client state restricted to declared state fields, then the
        // outcome's forced overlay; forced values win.
        let mut filtered_state = Map::new();
        if let Some(state) = &input.state {
            for (field, value) in state {
                if self.view().is_state_field(field) {
                    filtered_state.insert(field.clone(), value.clone());
                }
            }
        }
        for (field, change) in &outcome.state {
            match change {
                StateChange::Enum(reference) => {
                    // unresolvable enum references are dropped
                    if let Some(value) = self.definition().resolve_enum(reference) {
                        filtered_state.insert(field.clone(), value);
                    }
                }
                StateChange::Simple(value) => {
                    filtered_state.insert(field.clone(), value.clone());
                }
            }
        }

        let mut did_modify = false;
        for (field, value) in &filtered_state {
            did_modify |= instance.set(field, value.clone());
        }

        let pending: Vec<(&str, &str)> = outcome
            .sequence_assignment
            .iter()
            .filter_map(|field| {
                self.view()
                    .id_sequence(field)
                    .map(|sequence| (field.as_str(), sequence))
            })
            .filter(|(field, _)| instance.field_is_empty(field))
            .collect();
        let allocations = join_all(
            pending
                .iter()
                .map(|(_, sequence)| self.store.next_sequence_value(sequence)),
        )
        .await;
        for ((field, _), allocation) in pending.iter().zip(allocations) {
            let next = allocation?;
            did_modify |= instance.set(field, Value::String(format!("S{next:06}")));
        }

        for assignment in &outcome.date_assignments {
            if self.view().is_datetime_field(&assignment.field) {
                did_modify |=
                    instance.set(&assignment.field, Value::String(Utc::now().to_rfc3339()));
            }
        }

        if did_modify {
            instance.touch();
            self.store
                .save(&self.definition().name, &instance)
                .await?;
            ctx.remember(self.resolver_id, &instance).await;
        }

        self.engine
            .complete_task(&input.task_id, marshal_variables(&filtered_state))
            .await
            .map_err(|e| self.engine_error(e))?;

        info!(
            model = %self.definition().name,
            id = %input.id,
            task = %task.task_definition_key,
            outcome = %input.outcome,
            "task completed"
        );
        self.publish_updated(instance.id());
        Ok(TaskCompletionOutcome::Success)
    }
}
