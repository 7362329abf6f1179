//! Query Planner
//!
//! Turns a GraphQL field selection plus listing input into a
//! `QueryPlan`: projection, eager relation directives, filter and
//! ownership conditions, ordering and paging. Model extensions hook into
//! planning and transform the plan by value.

use crate::model::ModelView;
use crate::store::{Condition, EagerRelation, QueryPlan};
use serde_json::{Map, Value};
use std::sync::Arc;

/// One requested field with its sub-selection, as reported by the
/// GraphQL layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelection {
    pub name: String,
    pub children: Vec<FieldSelection>,
}

impl FieldSelection {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(name: impl Into<String>, children: Vec<FieldSelection>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

/// Top-level names of a selection.
pub fn selection_names(selections: &[FieldSelection]) -> Vec<String> {
    selections.iter().map(|s| s.name.clone()).collect()
}

/// Listing arguments as they arrive from the client.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ListingInput {
    #[serde(default)]
    pub first: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub filter: Option<Map<String, Value>>,
    #[serde(default)]
    pub sorting: Option<Map<String, Value>>,
}

/// Outcome of a per-field extension hook. `Handled` short-circuits all
/// further processing for that filter field.
pub enum FieldHook {
    Handled(QueryPlan),
    Unhandled(QueryPlan),
}

/// Ordered plugin attached to a model. Every hook consumes the plan and
/// returns a new one.
pub trait ModelExtension: Send + Sync {
    fn filter_field(&self, plan: QueryPlan, _field: &str, _value: &Value) -> FieldHook {
        FieldHook::Unhandled(plan)
    }

    fn filter(&self, plan: QueryPlan, _filter: &Map<String, Value>) -> QueryPlan {
        plan
    }

    fn listing_query(&self, plan: QueryPlan) -> QueryPlan {
        plan
    }
}

pub struct QueryPlanner<'a> {
    pub view: &'a ModelView,
    pub extensions: &'a [Arc<dyn ModelExtension>],
    pub default_page_size: usize,
}

impl QueryPlanner<'_> {
    /// Plan a listing. `owner_scope` carries the subject id when the
    /// caller's restriction scope excludes `all`.
    pub fn plan(
        &self,
        requested: &[FieldSelection],
        input: &ListingInput,
        owner_scope: Option<&str>,
    ) -> QueryPlan {
        let mut plan = QueryPlan::select(self.projection(requested)).with_total();

        for selection in requested {
            if let Some(eager) = self.eager_for(selection) {
                plan.eager.extend(eager);
            }
        }

        if let Some(filter) = &input.filter {
            plan = self.apply_filter(plan, filter);
        }

        if let Some(subject_id) = owner_scope {
            plan = plan.and(self.owner_condition(subject_id));
        }

        if let Some(sorting) = &input.sorting {
            for (field, value) in sorting {
                // only declared sortable fields with boolean values count
                if let (true, Some(descending)) = (self.view.is_sortable(field), value.as_bool()) {
                    plan = plan.order_by(field.clone(), descending);
                }
            }
        }

        // default_page_size is both the fallback and the hard ceiling
        plan = plan.page(
            input
                .first
                .unwrap_or(self.default_page_size)
                .min(self.default_page_size),
            input.offset.unwrap_or(0),
        );

        for extension in self.extensions {
            plan = extension.listing_query(plan);
        }

        plan
    }

    /// Requested non-relation columns, plus `id` and the owner join
    /// fields the per-row authorization step depends on.
    fn projection(&self, requested: &[FieldSelection]) -> Vec<String> {
        let mut projection = vec!["id".to_string()];
        for selection in requested {
            if selection.name != "id" && !self.view.is_relation(&selection.name) {
                projection.push(selection.name.clone());
            }
        }
        for owner in self.view.owners() {
            if let Some(join_field) = &owner.join_field {
                if !projection.contains(join_field) {
                    projection.push(join_field.clone());
                }
            }
        }
        projection
    }

    /// Eager directives for one requested relation: the relation's own
    /// path (honoring its default eager hint) projected to the requested
    /// sub-fields, plus unrestricted nested paths for requested
    /// sub-relations.
    fn eager_for(&self, selection: &FieldSelection) -> Option<Vec<EagerRelation>> {
        let element = self.view.relation(&selection.name)?;
        let path = match &element.default_eager {
            Some(hint) => format!("{}.{}", selection.name, hint),
            None => selection.name.clone(),
        };

        let sub_fields: Vec<String> = selection
            .children
            .iter()
            .map(|child| child.name.clone())
            .collect();
        let mut directives = if sub_fields.is_empty() {
            vec![EagerRelation::path(path)]
        } else {
            vec![EagerRelation::with_projection(path, sub_fields)]
        };

        for child in &selection.children {
            if !child.children.is_empty() {
                directives.push(EagerRelation::path(format!(
                    "{}.{}",
                    selection.name, child.name
                )));
            }
        }
        Some(directives)
    }

    fn apply_filter(&self, mut plan: QueryPlan, filter: &Map<String, Value>) -> QueryPlan {
        'fields: for (field, value) in filter {
            let Some(element) = self.view.filterable(field) else {
                continue;
            };

            for extension in self.extensions {
                match extension.filter_field(plan, field, value) {
                    FieldHook::Handled(handled) => {
                        plan = handled;
                        continue 'fields;
                    }
                    FieldHook::Unhandled(unhandled) => plan = unhandled,
                }
            }

            let condition = match value {
                Value::Null => Condition::IsNull(field.clone()),
                Value::Array(values) if element.listing_filter_multiple => {
                    Condition::In(field.clone(), values.clone())
                }
                Value::Bool(false) => Condition::FalseOrNull(field.clone()),
                other => Condition::Eq(field.clone(), other.clone()),
            };
            plan = plan.and(condition);
        }

        for extension in self.extensions {
            plan = extension.filter(plan, filter);
        }
        plan
    }

    /// Disjunction over every owner join field.
    fn owner_condition(&self, subject_id: &str) -> Condition {
        Condition::AnyOf(
            self.view
                .owners()
                .iter()
                .filter_map(|owner| owner.join_field.clone())
                .map(|join_field| Condition::Eq(join_field, Value::String(subject_id.into())))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ElementDescriptor;
    use serde_json::json;

    fn view() -> ModelView {
        let elements: Vec<ElementDescriptor> = serde_json::from_value(json!([
            {"field": "title", "listing_sortable": true},
            {"field": "phase", "state": true, "listing_filter": true, "listing_filter_multiple": true},
            {"field": "curated", "listing_filter": true},
            {"field": "identity", "type": "Identity", "owner": true, "join_field": "identity_id"},
            {"field": "article", "type": "Article", "join_field": "article_id", "default_eager": "files"},
            {"field": "created", "listing_sortable": true}
        ]))
        .unwrap();
        ModelView::introspect(&elements)
    }

    fn planner(view: &ModelView) -> QueryPlanner<'_> {
        QueryPlanner {
            view,
            extensions: &[],
            default_page_size: 200,
        }
    }

    #[test]
    fn projection_excludes_relations_and_carries_owner_joins() {
        let view = view();
        let requested = vec![
            FieldSelection::leaf("title"),
            FieldSelection::leaf("phase"),
            FieldSelection::with_children("article", vec![FieldSelection::leaf("doi")]),
        ];
        let plan = planner(&view).plan(&requested, &ListingInput::default(), None);

        assert_eq!(plan.projection, vec!["id", "title", "phase", "identity_id"]);
        assert!(plan.include_total);
        assert_eq!(plan.eager.len(), 1);
        assert_eq!(plan.eager[0].path, "article.files");
        assert_eq!(plan.eager[0].projection, Some(vec!["doi".into()]));
    }

    #[test]
    fn nested_relation_selection_adds_unrestricted_path() {
        let view = view();
        let requested = vec![FieldSelection::with_children(
            "article",
            vec![
                FieldSelection::leaf("doi"),
                FieldSelection::with_children("journal", vec![FieldSelection::leaf("name")]),
            ],
        )];
        let plan = planner(&view).plan(&requested, &ListingInput::default(), None);

        let paths: Vec<&str> = plan.eager.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["article.files", "article.journal"]);
        assert_eq!(plan.eager[1].projection, None);
    }

    #[test]
    fn filter_rules_follow_value_shape() {
        let view = view();
        let input = ListingInput {
            filter: Some(
                json!({
                    "phase": ["draft", "review"],
                    "curated": false,
                    "unknown": "ignored"
                })
                .as_object()
                .unwrap()
                .clone(),
            ),
            ..Default::default()
        };
        let plan = planner(&view).plan(&[], &input, None);

        assert!(plan.conditions.contains(&Condition::In(
            "phase".into(),
            vec![json!("draft"), json!("review")]
        )));
        assert!(plan
            .conditions
            .contains(&Condition::FalseOrNull("curated".into())));
        assert_eq!(plan.conditions.len(), 2);
    }

    #[test]
    fn null_filter_plans_is_null() {
        let view = view();
        let input = ListingInput {
            filter: Some(json!({"curated": null}).as_object().unwrap().clone()),
            ..Default::default()
        };
        let plan = planner(&view).plan(&[], &input, None);
        assert_eq!(plan.conditions, vec![Condition::IsNull("curated".into())]);
    }

    #[test]
    fn owner_scope_appends_disjunction() {
        let view = view();
        let plan = planner(&view).plan(&[], &ListingInput::default(), Some("u1"));
        assert_eq!(
            plan.conditions,
            vec![Condition::AnyOf(vec![Condition::Eq(
                "identity_id".into(),
                json!("u1")
            )])]
        );
    }

    #[test]
    fn sorting_ignores_unknown_and_non_boolean_entries() {
        let view = view();
        let input = ListingInput {
            sorting: Some(
                json!({"created": true, "title": false, "phase": true, "curated": "desc"})
                    .as_object()
                    .unwrap()
                    .clone(),
            ),
            ..Default::default()
        };
        let plan = planner(&view).plan(&[], &input, None);

        assert_eq!(plan.order.len(), 2);
        assert!(plan
            .order
            .iter()
            .any(|o| o.column == "created" && o.descending));
        assert!(plan
            .order
            .iter()
            .any(|o| o.column == "title" && !o.descending));
    }

    #[test]
    fn paging_defaults_apply() {
        let view = view();
        let plan = planner(&view).plan(&[], &ListingInput::default(), None);
        assert_eq!(plan.limit, Some(200));
        assert_eq!(plan.offset, 0);

        let input = ListingInput {
            first: Some(0),
            offset: Some(5),
            ..Default::default()
        };
        let plan = planner(&view).plan(&[], &input, None);
        assert_eq!(plan.limit, Some(0));
        assert_eq!(plan.offset, 5);
    }

    #[test]
    fn oversized_first_is_clamped_to_the_page_ceiling() {
        let view = view();
        let input = ListingInput {
            first: Some(100_000),
            ..Default::default()
        };
        let plan = planner(&view).plan(&[], &input, None);
        assert_eq!(plan.limit, Some(200));
    }

    struct PhaseRewrite;

    impl ModelExtension for PhaseRewrite {
        fn filter_field(&self, plan: QueryPlan, field: &str, value: &Value) -> FieldHook {
            if field == "phase" && value == &json!("open") {
                FieldHook::Handled(plan.and(Condition::In(
                    "phase".into(),
                    vec![json!("draft"), json!("review")],
                )))
            } else {
                FieldHook::Unhandled(plan)
            }
        }
    }

    struct AlwaysExclude;

    impl ModelExtension for AlwaysExclude {
        fn filter(&self, plan: QueryPlan, _filter: &Map<String, Value>) -> QueryPlan {
            plan.and(Condition::FalseOrNull("hidden".into()))
        }
    }

    #[test]
    fn per_field_extension_short_circuits_default_handling() {
        let view = view();
        let extensions: Vec<Arc<dyn ModelExtension>> =
            vec![Arc::new(PhaseRewrite), Arc::new(AlwaysExclude)];
        let planner = QueryPlanner {
            view: &view,
            extensions: &extensions,
            default_page_size: 200,
        };
        let input = ListingInput {
            filter: Some(json!({"phase": "open"}).as_object().unwrap().clone()),
            ..Default::default()
        };
        let plan = planner.plan(&[], &input, None);

        // rewritten by the extension, no Eq("phase", "open") default,
        // and the whole-filter extension still ran
        assert!(plan.conditions.contains(&Condition::In(
            "phase".into(),
            vec![json!("draft"), json!("review")]
        )));
        assert!(!plan
            .conditions
            .contains(&Condition::Eq("phase".into(), json!("open"))));
        assert!(plan
            .conditions
            .contains(&Condition::FalseOrNull("hidden".into())));
    }
}
