//! Persistence Port
//!
//! The entity representation and the store interface the resolver plans
//! queries against. Stores interpret `QueryPlan` values; the resolver
//! never issues SQL itself.

pub mod memory;
mod query;

pub use memory::MemoryStore;
pub use query::{Condition, EagerRelation, Ordering, QueryPlan};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Synthetic projection column carrying the unpaged row count.
pub const FULL_COUNT_FIELD: &str = "internal_full_count";

/// A persisted entity: an opaque id, bookkeeping timestamps, and the
/// declared fields as a dynamic JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instance {
    fields: Map<String, Value>,
}

impl Instance {
    /// Fresh entity with a new id and `created == updated == now`.
    pub fn create() -> Self {
        let now = Utc::now().to_rfc3339();
        let mut fields = Map::new();
        fields.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
        fields.insert("created".into(), Value::String(now.clone()));
        fields.insert("updated".into(), Value::String(now));
        Self { fields }
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn id(&self) -> &str {
        self.fields
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a field, reporting whether the stored value changed.
    pub fn set(&mut self, field: &str, value: Value) -> bool {
        if self.fields.get(field) == Some(&value) {
            return false;
        }
        self.fields.insert(field.to_string(), value);
        true
    }

    /// Refresh the `updated` timestamp; called before any persisted change.
    pub fn touch(&mut self) {
        self.fields
            .insert("updated".into(), Value::String(Utc::now().to_rfc3339()));
    }

    /// A field counts as empty when absent, null, or the empty string.
    pub fn field_is_empty(&self, field: &str) -> bool {
        match self.fields.get(field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

/// Port to the persistence layer.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch one entity, prefetching the given relation paths.
    async fn find_by_id(
        &self,
        type_name: &str,
        id: &str,
        eager: &[EagerRelation],
    ) -> anyhow::Result<Option<Instance>>;

    /// Execute a planned listing query.
    async fn execute(&self, type_name: &str, plan: &QueryPlan) -> anyhow::Result<Vec<Instance>>;

    /// Insert or replace an entity by id.
    async fn save(&self, type_name: &str, instance: &Instance) -> anyhow::Result<()>;

    /// Draw the next value from a named monotonic sequence.
    async fn next_sequence_value(&self, sequence: &str) -> anyhow::Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_assigns_id_and_timestamps() {
        let instance = Instance::create();
        assert!(!instance.id().is_empty());
        assert_eq!(instance.get("created"), instance.get("updated"));
    }

    #[test]
    fn set_reports_changes_only() {
        let mut instance = Instance::create();
        assert!(instance.set("title", json!("a")));
        assert!(!instance.set("title", json!("a")));
        assert!(instance.set("title", json!("b")));
    }

    #[test]
    fn empty_field_semantics() {
        let mut instance = Instance::create();
        assert!(instance.field_is_empty("manuscript_id"));
        instance.set("manuscript_id", Value::Null);
        assert!(instance.field_is_empty("manuscript_id"));
        instance.set("manuscript_id", json!(""));
        assert!(instance.field_is_empty("manuscript_id"));
        instance.set("manuscript_id", json!("S000001"));
        assert!(!instance.field_is_empty("manuscript_id"));
    }
}
