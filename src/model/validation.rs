//! Validation Sets
//!
//! Server-side validation rules attached to workflow forms. The
//! structures are produced by an external compiler; this module only
//! evaluates them against an entity before a task completion is allowed
//! to proceed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "condition", content = "argument")]
pub enum ValidationCondition {
    /// Field must be present and not null.
    Required,
    /// String or array must be non-empty.
    NonEmpty,
    /// String must match the given pattern.
    Pattern(String),
    /// String must be at least this long.
    MinLength(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Dotted field path into the entity, e.g. `article.title`.
    pub binding: String,
    #[serde(flatten)]
    pub condition: ValidationCondition,
}

impl ValidationRule {
    fn holds(&self, entity: &Map<String, Value>) -> bool {
        let value = lookup(entity, &self.binding);
        match &self.condition {
            ValidationCondition::Required => {
                value.map(|v| !v.is_null()).unwrap_or(false)
            }
            ValidationCondition::NonEmpty => match value {
                Some(Value::String(s)) => !s.is_empty(),
                Some(Value::Array(a)) => !a.is_empty(),
                Some(Value::Null) | None => false,
                Some(_) => true,
            },
            ValidationCondition::Pattern(pattern) => {
                let Some(Value::String(s)) = value else {
                    return false;
                };
                Regex::new(pattern).map(|re| re.is_match(s)).unwrap_or(false)
            }
            ValidationCondition::MinLength(min) => {
                let Some(Value::String(s)) = value else {
                    return false;
                };
                s.chars().count() >= *min
            }
        }
    }
}

/// A named set of rules evaluated together.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationSet {
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
}

impl ValidationSet {
    /// First path segment of every rule binding. The task engine eager
    /// loads the relations these touch before evaluating.
    pub fn referenced_bindings(&self) -> BTreeSet<String> {
        self.rules
            .iter()
            .filter_map(|r| r.binding.split('.').next())
            .map(str::to_string)
            .collect()
    }

    /// Evaluate every rule; returns the bindings that failed.
    pub fn evaluate(&self, entity: &Map<String, Value>) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| !rule.holds(entity))
            .map(|rule| rule.binding.clone())
            .collect()
    }
}

fn lookup<'a>(entity: &'a Map<String, Value>, binding: &str) -> Option<&'a Value> {
    let mut segments = binding.split('.');
    let mut current = entity.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
