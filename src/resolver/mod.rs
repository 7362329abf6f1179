//! Instance Resolver
//!
//! The model-driven core. One resolver instance serves one declared
//! entity type and implements CRUD, listing, relation traversal and
//! workflow-task completion against the shared persistence, engine and
//! identity ports. Resolvers are process-scoped singletons holding no
//! mutable state past construction.

mod context;
mod lifecycle;
mod planner;
mod projection;
mod tasks;

pub use context::RequestContext;
pub use planner::{
    FieldHook, FieldSelection, ListingInput, ModelExtension, QueryPlanner, selection_names,
};
pub use projection::{RESTRICTED_FIELDS_KEY, project_instance};
pub use tasks::{CompleteTaskInput, TaskCompletionOutcome};

use crate::acl::{self, AclAction, AclMatch, AclTarget, AclTracer, TracingAclTracer};
use crate::config::CoreConfig;
use crate::error::{ResolverError, ResolverResult};
use crate::events::{EventBus, INSTANCE_EVENT_BUS, InstanceEvent};
use crate::identity::{IdentityResolver, Subject};
use crate::model::{ModelDefinition, ModelView};
use crate::store::{EagerRelation, EntityStore, FULL_COUNT_FIELD, Instance};
use crate::workflow::ProcessEngine;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::warn;

static NEXT_RESOLVER_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub total_count: u64,
    pub offset: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingPage {
    pub results: Vec<Map<String, Value>>,
    pub page_info: PageInfo,
}

pub struct InstanceResolver {
    resolver_id: usize,
    definition: ModelDefinition,
    view: ModelView,
    store: Arc<dyn EntityStore>,
    engine: Arc<dyn ProcessEngine>,
    identity: Arc<dyn IdentityResolver>,
    bus: Arc<EventBus>,
    extensions: Vec<Arc<dyn ModelExtension>>,
    config: CoreConfig,
    tracer: Option<Arc<dyn AclTracer>>,
}

impl InstanceResolver {
    pub fn new(
        definition: ModelDefinition,
        store: Arc<dyn EntityStore>,
        engine: Arc<dyn ProcessEngine>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        let view = ModelView::introspect(&definition.elements);
        Self {
            resolver_id: NEXT_RESOLVER_ID.fetch_add(1, Ordering::Relaxed),
            definition,
            view,
            store,
            engine,
            identity,
            bus: INSTANCE_EVENT_BUS.clone(),
            extensions: Vec::new(),
            config: CoreConfig::default(),
            tracer: None,
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_config(mut self, config: CoreConfig) -> Self {
        if config.acl_trace && self.tracer.is_none() {
            self.tracer = Some(Arc::new(TracingAclTracer));
        }
        self.config = config;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn AclTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_extension(mut self, extension: Arc<dyn ModelExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn view(&self) -> &ModelView {
        &self.view
    }

    /// Fetch one entity with field-level authorization applied.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        id: &str,
        requested: &[FieldSelection],
    ) -> ResolverResult<Map<String, Value>> {
        if id.is_empty() {
            return Err(ResolverError::UserInput("id".into()));
        }

        let (instance, subject) = tokio::join!(
            self.fetch_instance(ctx, id, &[]),
            self.resolve_subject(ctx)
        );
        let instance = instance?.ok_or_else(|| {
            ResolverError::not_found(format!("{} '{id}'", self.definition.name))
        })?;
        let subject = subject?;

        let (targets, owner) = self.targets(subject.as_ref(), Some(&instance));
        let access = self.acl(&targets, AclAction::Access, owner);
        if !access.allow || !access.scope_allows(owner) {
            return Err(ResolverError::authorization(format!(
                "access to {} '{id}' denied",
                self.definition.name
            )));
        }

        let read = self.acl(&targets, AclAction::Read, owner);
        Ok(project_instance(
            &self.view,
            &read,
            &instance,
            &selection_names(requested),
        ))
    }

    /// Paged listing with per-row authorization.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        input: &ListingInput,
        requested: &[FieldSelection],
    ) -> ResolverResult<ListingPage> {
        let subject = self.resolve_subject(ctx).await?;
        let (targets, _) = self.targets(subject.as_ref(), None);
        let access = self.acl(&targets, AclAction::Access, false);
        if !access.allow {
            return Err(ResolverError::authorization(format!(
                "listing {} denied",
                self.definition.name
            )));
        }

        let owner_scope = if access.scope_allows(false) {
            None
        } else {
            match &subject {
                Some(subject) => Some(subject.id.as_str()),
                None => {
                    return Err(ResolverError::authorization(
                        "owner-scoped listing requires an authenticated subject",
                    ));
                }
            }
        };

        let planner = QueryPlanner {
            view: &self.view,
            extensions: &self.extensions,
            default_page_size: self.config.default_page_size,
        };
        let plan = planner.plan(requested, input, owner_scope);
        let rows = self.store.execute(&self.definition.name, &plan).await?;

        let total_count = match rows.first() {
            Some(row) => row
                .get(FULL_COUNT_FIELD)
                .and_then(Value::as_u64)
                .unwrap_or(0),
            // an empty page carries no window count; probe the same
            // filter once so zero-size and past-the-end pages still
            // report the real total
            None => {
                let mut probe = plan.clone();
                probe.projection = vec!["id".into()];
                probe.eager.clear();
                probe.limit = Some(1);
                probe.offset = 0;
                self.store
                    .execute(&self.definition.name, &probe)
                    .await?
                    .first()
                    .and_then(|row| row.get(FULL_COUNT_FIELD))
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
            }
        };

        let names = selection_names(requested);
        let results = rows
            .iter()
            .map(|row| {
                let (targets, owner) = self.targets(subject.as_ref(), Some(row));
                let read = self.acl(&targets, AclAction::Read, owner);
                project_instance(&self.view, &read, row, &names)
            })
            .collect();

        Ok(ListingPage {
            results,
            page_info: PageInfo {
                total_count,
                offset: input.offset.unwrap_or(0),
                // mirrors the planner's page ceiling
                page_size: input
                    .first
                    .unwrap_or(self.config.default_page_size)
                    .min(self.config.default_page_size),
            },
        })
    }

    /// Traverse a declared relation from an already-resolved entity.
    /// Eagerly loaded values are returned as-is; otherwise the target is
    /// fetched through the request cache and projected to the requested
    /// sub-fields. Field-level policy on the target type is applied by
    /// that type's own resolver at the GraphQL layer.
    pub async fn resolve_relation(
        &self,
        ctx: &RequestContext,
        entity: &Map<String, Value>,
        field: &str,
        requested: &[FieldSelection],
    ) -> ResolverResult<Option<Value>> {
        let element = self
            .view
            .relation(field)
            .or_else(|| {
                self.view
                    .owners()
                    .iter()
                    .find(|o| o.field.as_deref() == Some(field))
            })
            .ok_or_else(|| {
                ResolverError::Logic(format!(
                    "{} has no relation '{field}'",
                    self.definition.name
                ))
            })?;

        if let Some(value) = entity.get(field) {
            if !value.is_null() {
                return Ok(Some(value.clone()));
            }
        }

        let Some(join_field) = &element.join_field else {
            return Ok(None);
        };
        let Some(target) = &element.target else {
            return Ok(None);
        };

        // projected DTOs usually omit join columns; re-read the parent
        // through the request cache when the key is not on the map
        let related_id = match entity.get(join_field).and_then(Value::as_str) {
            Some(related_id) => related_id.to_string(),
            None => {
                let Some(parent_id) = entity.get("id").and_then(Value::as_str) else {
                    return Ok(None);
                };
                let Some(parent) = self.fetch_instance(ctx, parent_id, &[]).await? else {
                    return Ok(None);
                };
                match parent.get(join_field).and_then(Value::as_str) {
                    Some(related_id) => related_id.to_string(),
                    None => return Ok(None),
                }
            }
        };
        let related_id = related_id.as_str();

        let cache_key = format!("{target}/{related_id}");
        let related = match ctx.instance(self.resolver_id, &cache_key).await {
            Some(instance) => instance,
            None => {
                let Some(instance) = self.store.find_by_id(target, related_id, &[]).await? else {
                    return Ok(None);
                };
                ctx.remember_as(self.resolver_id, &cache_key, &instance).await;
                instance
            }
        };

        if requested.is_empty() {
            return Ok(Some(Value::Object(related.into_fields())));
        }
        let mut out = Map::new();
        if let Some(id) = related.get("id") {
            out.insert("id".into(), id.clone());
        }
        for selection in requested {
            if let Some(value) = related.get(&selection.name) {
                out.insert(selection.name.clone(), value.clone());
            }
        }
        Ok(Some(Value::Object(out)))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.bus.subscribe()
    }

    pub fn created_topic(&self) -> String {
        format!("{}.created", self.definition.name)
    }

    pub fn updated_topic(&self) -> String {
        format!("{}.updated", self.definition.name)
    }

    // ── shared internals ────────────────────────────────────────────

    /// Entity fetch through the request-scoped cache. Eager fetches
    /// bypass the cache so prefetched relations are never stale.
    pub(crate) async fn fetch_instance(
        &self,
        ctx: &RequestContext,
        id: &str,
        eager: &[EagerRelation],
    ) -> ResolverResult<Option<Instance>> {
        if eager.is_empty() {
            if let Some(instance) = ctx.instance(self.resolver_id, id).await {
                return Ok(Some(instance));
            }
        }
        let instance = self.store.find_by_id(&self.definition.name, id, eager).await?;
        if let Some(instance) = &instance {
            ctx.remember(self.resolver_id, instance).await;
        }
        Ok(instance)
    }

    pub(crate) async fn resolve_subject(
        &self,
        ctx: &RequestContext,
    ) -> ResolverResult<Option<Subject>> {
        Ok(ctx.subject(&self.identity).await?)
    }

    /// Whether any declared owner join field points at the subject.
    pub(crate) fn owner_flag(&self, subject: Option<&Subject>, instance: &Instance) -> bool {
        let Some(subject) = subject else {
            return false;
        };
        self.view.owners().iter().any(|owner| {
            owner
                .join_field
                .as_ref()
                .and_then(|join_field| instance.get(join_field))
                .and_then(Value::as_str)
                == Some(subject.id.as_str())
        })
    }

    pub(crate) fn targets(
        &self,
        subject: Option<&Subject>,
        instance: Option<&Instance>,
    ) -> (BTreeSet<AclTarget>, bool) {
        let owner = instance
            .map(|instance| self.owner_flag(subject, instance))
            .unwrap_or(false);
        (acl::subject_targets(subject, owner), owner)
    }

    pub(crate) fn acl(
        &self,
        targets: &BTreeSet<AclTarget>,
        action: AclAction,
        owner: bool,
    ) -> AclMatch {
        acl::evaluate(
            self.definition.acl.as_ref(),
            targets,
            action,
            owner,
            self.tracer.as_ref(),
        )
    }

    pub(crate) fn engine_error(&self, error: anyhow::Error) -> ResolverError {
        warn!(model = %self.definition.name, error = %error, "business engine call failed");
        ResolverError::Engine(error)
    }

    pub(crate) fn publish_created(&self, id: &str) {
        self.bus
            .publish(InstanceEvent::created(self.definition.name.as_str(), id));
    }

    pub(crate) fn publish_updated(&self, id: &str) {
        self.bus
            .publish(InstanceEvent::updated(self.definition.name.as_str(), id));
    }
}
