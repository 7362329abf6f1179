//! Query Plans
//!
//! The opaque query value the planner builds and extensions transform.
//! Every combinator consumes and returns the plan, so extension chains
//! cannot mutate a query behind the resolver's back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A where-clause fragment. Fragments held directly on the plan are
/// combined with AND.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Column is SQL NULL (or absent).
    IsNull(String),
    /// Column equals the value.
    Eq(String, Value),
    /// Column is one of the values.
    In(String, Vec<Value>),
    /// Tri-state boolean: column is false or NULL.
    FalseOrNull(String),
    /// Disjunction of fragments.
    AnyOf(Vec<Condition>),
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ordering {
    pub column: String,
    pub descending: bool,
}

/// An eager relation prefetch directive: a dotted traversal path and an
/// optional projection applied to the loaded relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EagerRelation {
    pub path: String,
    #[serde(default)]
    pub projection: Option<Vec<String>>,
}

impl EagerRelation {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            projection: None,
        }
    }

    pub fn with_projection(path: impl Into<String>, projection: Vec<String>) -> Self {
        Self {
            path: path.into(),
            projection: Some(projection),
        }
    }
}

/// A complete planned listing query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Top-level columns to select. `id` is always present.
    pub projection: Vec<String>,
    /// Whether to compute the windowed full count alongside the page.
    pub include_total: bool,
    /// AND-combined where fragments.
    pub conditions: Vec<Condition>,
    pub order: Vec<Ordering>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub eager: Vec<EagerRelation>,
}

impl QueryPlan {
    pub fn select(projection: Vec<String>) -> Self {
        Self {
            projection,
            ..Default::default()
        }
    }

    pub fn with_total(mut self) -> Self {
        self.include_total = true;
        self
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order.push(Ordering {
            column: column.into(),
            descending,
        });
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    pub fn eager_load(mut self, relation: EagerRelation) -> Self {
        self.eager.push(relation);
        self
    }
}
