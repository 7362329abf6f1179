//! Lifecycle Operations
//!
//! Create, update, destroy and process-level operations. Every
//! persisted change publishes a notification on the instance event bus.

use super::InstanceResolver;
use crate::acl::AclAction;
use crate::error::{ResolverError, ResolverResult};
use crate::resolver::RequestContext;
use crate::store::Instance;
use crate::workflow::{ProcessTask, StartInstruction, marshal_variables};
use serde_json::{Map, Value};
use tracing::info;

impl InstanceResolver {
    /// Instantiate a new entity, start its paired BPM process, and
    /// publish `created`. Owner join fields are written from the
    /// authenticated subject; defaults prefer `default_enum` over
    /// `default_value`.
    pub async fn create(&self, ctx: &RequestContext) -> ResolverResult<Instance> {
        let subject = self.resolve_subject(ctx).await?;
        let (targets, _) = self.targets(subject.as_ref(), None);
        let create = self.acl(&targets, AclAction::Create, false);
        if !create.allow {
            return Err(ResolverError::authorization(format!(
                "creating {} denied",
                self.definition().name
            )));
        }

        let mut instance = Instance::create();

        if let Some(subject) = &subject {
            for owner in self.view().owners() {
                if let Some(join_field) = &owner.join_field {
                    instance.set(join_field, Value::String(subject.id.clone()));
                }
            }
        }

        for element in &self.definition().elements {
            let Some(field) = &element.field else {
                continue;
            };
            let default = element
                .default_enum
                .as_ref()
                .zip(element.default_enum_key.as_ref())
                .and_then(|(name, key)| self.definition().resolve_enum(&format!("{name}.{key}")))
                .or_else(|| element.default_value.clone());
            if let Some(value) = default {
                instance.set(field, value);
            }
        }

        self.store
            .save(&self.definition().name, &instance)
            .await?;
        ctx.remember(self.resolver_id, &instance).await;

        // Entity save and process start are not transactional; an engine
        // failure here leaves a saved entity without a process instance.
        self.engine
            .start_process(&self.definition().process_key, instance.id(), None, None)
            .await
            .map_err(|e| self.engine_error(e))?;

        info!(model = %self.definition().name, id = %instance.id(), "instance created");
        self.publish_created(instance.id());
        Ok(instance)
    }

    /// Apply client input to an entity under the write ACL. Any key
    /// outside the allowed set fails the whole mutation.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        input: &Map<String, Value>,
    ) -> ResolverResult<Instance> {
        if !self.definition().input {
            return Err(ResolverError::Logic(format!(
                "{} does not accept updates",
                self.definition().name
            )));
        }
        let Some(id) = input.get("id").and_then(Value::as_str) else {
            return Err(ResolverError::UserInput("id".into()));
        };

        let (instance, subject) = tokio::join!(
            self.fetch_instance(ctx, id, &[]),
            self.resolve_subject(ctx)
        );
        let mut instance = instance?.ok_or_else(|| {
            ResolverError::not_found(format!("{} '{id}'", self.definition().name))
        })?;
        let subject = subject?;

        let (targets, owner) = self.targets(subject.as_ref(), Some(&instance));
        let access = self.acl(&targets, AclAction::Access, owner);
        if !access.allow || !access.scope_allows(owner) {
            return Err(ResolverError::authorization(format!(
                "access to {} '{id}' denied",
                self.definition().name
            )));
        }
        let write = self.acl(&targets, AclAction::Write, owner);
        if !write.allow {
            return Err(ResolverError::authorization(format!(
                "writing {} '{id}' denied",
                self.definition().name
            )));
        }

        let disallowed: Vec<String> = input
            .keys()
            .filter(|key| key.as_str() != "id")
            .filter(|key| !(self.view().writable().contains(*key) && write.field_allowed(key)))
            .cloned()
            .collect();
        if !disallowed.is_empty() {
            return Err(ResolverError::authorization_fields(
                format!("fields not writable on {}", self.definition().name),
                disallowed,
            ));
        }

        let mut changed = false;
        for (field, value) in input.iter().filter(|(key, _)| key.as_str() != "id") {
            changed |= instance.set(field, value.clone());
        }

        if changed {
            instance.touch();
            self.store
                .save(&self.definition().name, &instance)
                .await?;
            ctx.remember(self.resolver_id, &instance).await;
            self.publish_updated(instance.id());
        }
        Ok(instance)
    }

    /// Terminal transition: apply state overrides (exempt from the write
    /// ACL), cancel the paired process instance, publish `updated`.
    pub async fn destroy(
        &self,
        ctx: &RequestContext,
        id: &str,
        state: Option<&Map<String, Value>>,
    ) -> ResolverResult<bool> {
        let (instance, subject) = tokio::join!(
            self.fetch_instance(ctx, id, &[]),
            self.resolve_subject(ctx)
        );
        let mut instance = instance?.ok_or_else(|| {
            ResolverError::not_found(format!("{} '{id}'", self.definition().name))
        })?;
        let subject = subject?;

        let (targets, owner) = self.targets(subject.as_ref(), Some(&instance));
        let access = self.acl(&targets, AclAction::Access, owner);
        if !access.allow || !access.scope_allows(owner) {
            return Err(ResolverError::authorization(format!(
                "access to {} '{id}' denied",
                self.definition().name
            )));
        }
        let destroy = self.acl(&targets, AclAction::Destroy, owner);
        if !destroy.allow {
            return Err(ResolverError::authorization(format!(
                "destroying {} '{id}' denied",
                self.definition().name
            )));
        }

        let mut changed = false;
        if let Some(state) = state {
            // non-state keys are dropped silently
            for (field, value) in state {
                if self.view().is_state_field(field) {
                    changed |= instance.set(field, value.clone());
                }
            }
        }
        if changed {
            instance.touch();
            self.store
                .save(&self.definition().name, &instance)
                .await?;
            ctx.remember(self.resolver_id, &instance).await;
        }

        let instances = self
            .engine
            .list_process_instances(id)
            .await
            .map_err(|e| self.engine_error(e))?;
        let paired = instances.iter().find(|process| {
            process
                .business_key
                .as_deref()
                .map(|key| key.eq_ignore_ascii_case(id))
                .unwrap_or(false)
        });
        if let Some(process) = paired {
            self.engine
                .delete_process_instance(&process.id)
                .await
                .map_err(|e| self.engine_error(e))?;
            info!(model = %self.definition().name, id = %id, process = %process.id, "process instance cancelled");
        }

        self.publish_updated(instance.id());
        Ok(true)
    }

    /// Start a fresh process for an existing entity, resuming after the
    /// given activity with the current state fields as variables.
    pub async fn restart(
        &self,
        ctx: &RequestContext,
        id: &str,
        activity_id: &str,
    ) -> ResolverResult<()> {
        let instance = self.fetch_instance(ctx, id, &[]).await?.ok_or_else(|| {
            ResolverError::not_found(format!("{} '{id}'", self.definition().name))
        })?;

        let mut state = Map::new();
        for field in self.view().state_fields() {
            if let Some(value) = instance.get(field) {
                state.insert(field.clone(), value.clone());
            }
        }

        self.engine
            .start_process(
                &self.definition().process_key,
                instance.id(),
                Some(vec![StartInstruction::start_after_activity(activity_id)]),
                Some(marshal_variables(&state)),
            )
            .await
            .map_err(|e| self.engine_error(e))?;

        self.publish_updated(instance.id());
        Ok(())
    }

    /// Engine tasks for an entity, link-stripped and filtered to the
    /// caller's allowed task definition keys.
    pub async fn get_tasks(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> ResolverResult<Vec<ProcessTask>> {
        let (instance, subject) = tokio::join!(
            self.fetch_instance(ctx, id, &[]),
            self.resolve_subject(ctx)
        );
        let instance = instance?.ok_or_else(|| {
            ResolverError::not_found(format!("{} '{id}'", self.definition().name))
        })?;
        let subject = subject?;

        let (targets, owner) = self.targets(subject.as_ref(), Some(&instance));
        let task_match = self.acl(&targets, AclAction::Task, owner);
        if !task_match.allow {
            return Err(ResolverError::authorization(format!(
                "listing tasks for {} '{id}' denied",
                self.definition().name
            )));
        }

        let tasks = self
            .engine
            .list_tasks(instance.id())
            .await
            .map_err(|e| self.engine_error(e))?;

        Ok(tasks
            .into_iter()
            .map(ProcessTask::strip_links)
            .filter(|task| task_match.task_allowed(&task.task_definition_key))
            .collect())
    }
}
