//! In-memory Store
//!
//! Reference `EntityStore` used by tests and single-process embeddings.
//! Collections are kept per type name in insertion order; related
//! entities live embedded on their parent, so eager directives reduce to
//! projection of the embedded objects.

use super::{Condition, EagerRelation, EntityStore, FULL_COUNT_FIELD, Instance, QueryPlan};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Instance>>>,
    sequences: Mutex<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity without going through a resolver.
    pub async fn insert(&self, type_name: &str, instance: Instance) {
        let mut collections = self.collections.write().await;
        collections
            .entry(type_name.to_string())
            .or_default()
            .push(instance);
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn find_by_id(
        &self,
        type_name: &str,
        id: &str,
        _eager: &[EagerRelation],
    ) -> anyhow::Result<Option<Instance>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(type_name)
            .and_then(|rows| rows.iter().find(|row| row.id() == id))
            .cloned())
    }

    async fn execute(&self, type_name: &str, plan: &QueryPlan) -> anyhow::Result<Vec<Instance>> {
        let collections = self.collections.read().await;
        let rows = collections.get(type_name).cloned().unwrap_or_default();
        drop(collections);

        let mut matched: Vec<Instance> = rows
            .into_iter()
            .filter(|row| plan.conditions.iter().all(|c| matches(row.fields(), c)))
            .collect();
        let total = matched.len() as u64;

        for ordering in plan.order.iter().rev() {
            matched.sort_by(|a, b| {
                let cmp = compare(
                    a.get(&ordering.column).unwrap_or(&Value::Null),
                    b.get(&ordering.column).unwrap_or(&Value::Null),
                );
                if ordering.descending { cmp.reverse() } else { cmp }
            });
        }

        let page = matched
            .into_iter()
            .skip(plan.offset)
            .take(plan.limit.unwrap_or(usize::MAX));

        Ok(page.map(|row| project(row, plan, total)).collect())
    }

    async fn save(&self, type_name: &str, instance: &Instance) -> anyhow::Result<()> {
        let mut collections = self.collections.write().await;
        let rows = collections.entry(type_name.to_string()).or_default();
        match rows.iter_mut().find(|row| row.id() == instance.id()) {
            Some(row) => *row = instance.clone(),
            None => rows.push(instance.clone()),
        }
        Ok(())
    }

    async fn next_sequence_value(&self, sequence: &str) -> anyhow::Result<u64> {
        let mut sequences = self.sequences.lock().await;
        let next = sequences.entry(sequence.to_string()).or_insert(0);
        *next += 1;
        Ok(*next)
    }
}

fn matches(row: &Map<String, Value>, condition: &Condition) -> bool {
    match condition {
        Condition::IsNull(column) => {
            matches!(row.get(column), None | Some(Value::Null))
        }
        Condition::Eq(column, value) => row.get(column) == Some(value),
        Condition::In(column, values) => row
            .get(column)
            .map(|v| values.contains(v))
            .unwrap_or(false),
        Condition::FalseOrNull(column) => {
            matches!(row.get(column), None | Some(Value::Null) | Some(Value::Bool(false)))
        }
        Condition::AnyOf(conditions) => conditions.iter().any(|c| matches(row, c)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Apply the plan's projection and eager directives to one row.
fn project(row: Instance, plan: &QueryPlan, total: u64) -> Instance {
    let source = row.into_fields();
    let mut out = Map::new();

    if let Some(id) = source.get("id") {
        out.insert("id".into(), id.clone());
    }
    for column in &plan.projection {
        if let Some(value) = source.get(column) {
            out.insert(column.clone(), value.clone());
        }
    }

    // Group eager directives by their leading segment. The relation's
    // own directive carries the sub-selection projection; dotted paths
    // keep the named sub-relations visible inside a projected relation.
    let mut heads: Vec<&str> = Vec::new();
    let mut projections: HashMap<&str, &[String]> = HashMap::new();
    let mut nested: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for eager in &plan.eager {
        let head = eager.path.split('.').next().unwrap_or(&eager.path);
        if !heads.contains(&head) {
            heads.push(head);
        }
        if let Some(projection) = &eager.projection {
            projections.entry(head).or_insert(projection.as_slice());
        }
        if let Some((_, tail)) = eager.path.split_once('.') {
            nested
                .entry(head)
                .or_default()
                .insert(tail.split('.').next().unwrap_or(tail));
        }
    }
    for head in heads {
        let Some(value) = source.get(head) else {
            continue;
        };
        out.insert(
            head.to_string(),
            restrict(
                value.clone(),
                projections.get(head).copied(),
                nested.get(head),
            ),
        );
    }

    if plan.include_total {
        out.insert(FULL_COUNT_FIELD.into(), Value::from(total));
    }

    Instance::from_fields(out)
}

fn restrict(
    value: Value,
    projection: Option<&[String]>,
    keep: Option<&BTreeSet<&str>>,
) -> Value {
    let Some(projection) = projection else {
        return value;
    };
    match value {
        Value::Object(object) => {
            let restricted: Map<String, Value> = object
                .into_iter()
                .filter(|(key, _)| {
                    key == "id"
                        || projection.iter().any(|p| p == key)
                        || keep.map(|k| k.contains(key.as_str())).unwrap_or(false)
                })
                .collect();
            Value::Object(restricted)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| restrict(item, Some(projection), keep))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(fields: Value) -> Instance {
        Instance::from_fields(fields.as_object().unwrap().clone())
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert(
                "Submission",
                instance(json!({"id": "s1", "phase": "draft", "curated": false, "identity_id": "u1"})),
            )
            .await;
        store
            .insert(
                "Submission",
                instance(json!({"id": "s2", "phase": "published", "curated": null, "identity_id": "u2"})),
            )
            .await;
        store
            .insert(
                "Submission",
                instance(json!({"id": "s3", "phase": "draft", "curated": true, "identity_id": "u1"})),
            )
            .await;
        store
    }

    #[tokio::test]
    async fn test_filtering_and_total_count() {
        let store = seeded().await;
        let plan = QueryPlan::select(vec!["phase".into()])
            .with_total()
            .and(Condition::Eq("phase".into(), json!("draft")))
            .page(1, 0);

        let rows = store.execute("Submission", &plan).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(FULL_COUNT_FIELD), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_false_filter_matches_false_and_null() {
        let store = seeded().await;
        let plan = QueryPlan::select(vec!["id".into()])
            .and(Condition::FalseOrNull("curated".into()));

        let rows = store.execute("Submission", &plan).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(Instance::id).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_owner_disjunction() {
        let store = seeded().await;
        let plan = QueryPlan::select(vec!["id".into()]).and(Condition::AnyOf(vec![
            Condition::Eq("identity_id".into(), json!("u2")),
        ]));

        let rows = store.execute("Submission", &plan).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), "s2");
    }

    #[tokio::test]
    async fn test_ordering_desc_and_paging() {
        let store = seeded().await;
        let plan = QueryPlan::select(vec!["id".into()])
            .order_by("id", true)
            .page(2, 1);

        let rows = store.execute("Submission", &plan).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(Instance::id).collect();
        assert_eq!(ids, vec!["s2", "s1"]);
    }

    #[tokio::test]
    async fn test_eager_projection_restricts_embedded_relation() {
        let store = MemoryStore::new();
        store
            .insert(
                "Submission",
                instance(json!({
                    "id": "s1",
                    "article": {"id": "a1", "title": "T", "doi": "10.1/x", "files": {"id": "f1"}}
                })),
            )
            .await;

        let plan = QueryPlan::select(vec!["id".into()])
            .eager_load(EagerRelation::with_projection("article", vec!["title".into()]))
            .eager_load(EagerRelation::path("article.files"));

        let rows = store.execute("Submission", &plan).await.unwrap();
        let article = rows[0].get("article").unwrap().as_object().unwrap();
        assert!(article.contains_key("id"));
        assert!(article.contains_key("title"));
        assert!(article.contains_key("files"));
        assert!(!article.contains_key("doi"));
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic_per_name() {
        let store = MemoryStore::new();
        assert_eq!(store.next_sequence_value("a").await.unwrap(), 1);
        assert_eq!(store.next_sequence_value("a").await.unwrap(), 2);
        assert_eq!(store.next_sequence_value("b").await.unwrap(), 1);
    }
}
