//! Declarative Model Definitions
//!
//! The structures a model-definition loader produces and the resolver
//! consumes: element descriptors, workflow forms with their outcomes,
//! enum tables and named validation sets. A definition is immutable for
//! the lifetime of its resolver.

mod introspect;
pub mod validation;

pub use introspect::{ElementKind, ModelView};
pub use validation::{ValidationCondition, ValidationRule, ValidationSet};

use crate::acl::AclPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

fn default_true() -> bool {
    true
}

/// One declared field of an instance type.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ElementDescriptor {
    /// Field name; descriptors without one are ignored.
    #[serde(default)]
    pub field: Option<String>,

    /// Target type name; presence makes the element a relation.
    #[serde(default, rename = "type")]
    pub target: Option<String>,

    /// Marks the relation as an owner link.
    #[serde(default)]
    pub owner: bool,

    /// Marks a workflow state field.
    #[serde(default)]
    pub state: bool,

    /// Marks a wall-clock timestamp field.
    #[serde(default)]
    pub datetime: bool,

    /// Named monotonic sequence backing this field.
    #[serde(default)]
    pub id_sequence: Option<String>,

    /// Whether the field accepts client input on mutations.
    #[serde(default = "default_true")]
    pub input: bool,

    #[serde(default)]
    pub listing_filter: bool,
    #[serde(default)]
    pub listing_filter_multiple: bool,
    #[serde(default)]
    pub listing_sortable: bool,

    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub default_enum: Option<String>,
    #[serde(default)]
    pub default_enum_key: Option<String>,

    /// Column holding the related entity id for owner/relation elements.
    #[serde(default)]
    pub join_field: Option<String>,

    /// Dotted relation path the persistence layer should prefetch by
    /// default when this relation is requested.
    #[serde(default)]
    pub default_eager: Option<String>,
}

impl ElementDescriptor {
    /// Classify with precedence owner > relation > state > scalar.
    /// Id-sequence and datetime markers are orthogonal and tracked as
    /// separate views by the introspector.
    pub fn kind(&self) -> ElementKind {
        if self.owner {
            ElementKind::Owner
        } else if self.target.is_some() {
            ElementKind::Relation
        } else if self.state {
            ElementKind::State
        } else {
            ElementKind::Scalar
        }
    }
}

/// Forced state written by a form outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum StateChange {
    /// Dotted `Enum.Key` reference resolved through the model's enums.
    Enum(String),
    /// Literal value applied as-is.
    Simple(Value),
}

/// A named terminal branch of a form completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeDescriptor {
    pub outcome: String,
    pub result: OutcomeResult,
    #[serde(default)]
    pub requires_validated_submitter: bool,
    #[serde(default)]
    pub skip_validations: bool,
    #[serde(default)]
    pub state: HashMap<String, StateChange>,
    #[serde(default)]
    pub sequence_assignment: Vec<String>,
    #[serde(default)]
    pub date_assignments: Vec<DateAssignment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeResult {
    Complete,
    Save,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateAssignment {
    pub field: String,
}

/// A workflow form and the outcomes a task completion may select.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDescriptor {
    pub form: String,
    /// Name of the validation set evaluated before completion.
    #[serde(default)]
    pub validation: Option<String>,
    #[serde(default)]
    pub outcomes: Vec<OutcomeDescriptor>,
}

impl FormDescriptor {
    pub fn outcome(&self, name: &str) -> Option<&OutcomeDescriptor> {
        self.outcomes.iter().find(|o| o.outcome == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnumDefinition {
    #[serde(default)]
    pub values: HashMap<String, Value>,
}

/// Complete declarative definition of one instance type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Type name used in pub/sub topics and generated payload keys.
    pub name: String,

    /// Whether update mutations are allowed at all.
    #[serde(default)]
    pub input: bool,

    #[serde(default)]
    pub elements: Vec<ElementDescriptor>,

    /// Absent policy means permissive.
    #[serde(default)]
    pub acl: Option<AclPolicy>,

    /// BPM process-definition key started for each new entity.
    pub process_key: String,

    #[serde(default)]
    pub forms: Vec<FormDescriptor>,

    #[serde(default)]
    pub enums: HashMap<String, EnumDefinition>,

    #[serde(default)]
    pub validations: HashMap<String, ValidationSet>,
}

impl ModelDefinition {
    pub fn form(&self, name: &str) -> Option<&FormDescriptor> {
        self.forms.iter().find(|f| f.form == name)
    }

    /// Resolve a dotted `Enum.Key` reference to its declared value.
    pub fn resolve_enum(&self, reference: &str) -> Option<Value> {
        let (enum_name, key) = reference.split_once('.')?;
        self.enums.get(enum_name)?.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_precedence_owner_over_relation_over_state() {
        let owner = ElementDescriptor {
            field: Some("identity".into()),
            target: Some("Identity".into()),
            owner: true,
            state: true,
            ..Default::default()
        };
        assert_eq!(owner.kind(), ElementKind::Owner);

        let relation = ElementDescriptor {
            field: Some("article".into()),
            target: Some("Article".into()),
            state: true,
            ..Default::default()
        };
        assert_eq!(relation.kind(), ElementKind::Relation);

        let state = ElementDescriptor {
            field: Some("phase".into()),
            state: true,
            ..Default::default()
        };
        assert_eq!(state.kind(), ElementKind::State);
    }

    #[test]
    fn enum_reference_resolution() {
        let definition: ModelDefinition = serde_json::from_value(json!({
            "name": "Submission",
            "process_key": "submission-flow",
            "enums": {
                "Phase": { "values": { "Published": "published" } }
            }
        }))
        .unwrap();

        assert_eq!(
            definition.resolve_enum("Phase.Published"),
            Some(json!("published"))
        );
        assert_eq!(definition.resolve_enum("Phase.Missing"), None);
        assert_eq!(definition.resolve_enum("NoDot"), None);
    }

    #[test]
    fn state_change_deserializes_tagged() {
        let forced: StateChange =
            serde_json::from_value(json!({"type": "enum", "value": "Phase.Published"})).unwrap();
        match forced {
            StateChange::Enum(reference) => assert_eq!(reference, "Phase.Published"),
            other => panic!("unexpected change: {other:?}"),
        }

        let simple: StateChange =
            serde_json::from_value(json!({"type": "simple", "value": 7})).unwrap();
        match simple {
            StateChange::Simple(value) => assert_eq!(value, json!(7)),
            other => panic!("unexpected change: {other:?}"),
        }
    }
}
