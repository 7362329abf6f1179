//! Model Introspector
//!
//! One-time classification of a model definition into the filtered views
//! the planner, projector and task engine consult on every operation.

use super::ElementDescriptor;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Scalar,
    Relation,
    Owner,
    State,
}

/// Immutable views over a model's elements, computed once per resolver.
#[derive(Debug, Clone, Default)]
pub struct ModelView {
    relations: Vec<ElementDescriptor>,
    owners: Vec<ElementDescriptor>,
    state_fields: BTreeSet<String>,
    filterable: HashMap<String, ElementDescriptor>,
    sortable: BTreeSet<String>,
    id_sequences: HashMap<String, String>,
    datetime_fields: BTreeSet<String>,
    readable: BTreeSet<String>,
    writable: BTreeSet<String>,
}

impl ModelView {
    pub fn introspect(elements: &[ElementDescriptor]) -> Self {
        let mut view = Self::default();

        for element in elements {
            let Some(field) = element.field.clone() else {
                continue;
            };

            match element.kind() {
                ElementKind::Owner => view.owners.push(element.clone()),
                ElementKind::Relation => view.relations.push(element.clone()),
                ElementKind::State => {
                    view.state_fields.insert(field.clone());
                }
                ElementKind::Scalar => {}
            }

            if element.listing_filter || element.listing_filter_multiple {
                view.filterable.insert(field.clone(), element.clone());
            }
            if element.listing_sortable {
                view.sortable.insert(field.clone());
            }
            if let Some(sequence) = &element.id_sequence {
                view.id_sequences.insert(field.clone(), sequence.clone());
            }
            if element.datetime {
                view.datetime_fields.insert(field.clone());
            }

            view.readable.insert(field.clone());
            if element.input {
                view.writable.insert(field);
            }
        }

        view
    }

    pub fn relations(&self) -> &[ElementDescriptor] {
        &self.relations
    }

    pub fn relation(&self, field: &str) -> Option<&ElementDescriptor> {
        self.relations
            .iter()
            .find(|e| e.field.as_deref() == Some(field))
    }

    pub fn is_relation(&self, field: &str) -> bool {
        self.relation(field).is_some()
    }

    pub fn owners(&self) -> &[ElementDescriptor] {
        &self.owners
    }

    pub fn is_state_field(&self, field: &str) -> bool {
        self.state_fields.contains(field)
    }

    pub fn state_fields(&self) -> &BTreeSet<String> {
        &self.state_fields
    }

    pub fn filterable(&self, field: &str) -> Option<&ElementDescriptor> {
        self.filterable.get(field)
    }

    pub fn is_sortable(&self, field: &str) -> bool {
        self.sortable.contains(field)
    }

    /// Sequence name backing an id-sequence field.
    pub fn id_sequence(&self, field: &str) -> Option<&str> {
        self.id_sequences.get(field).map(String::as_str)
    }

    pub fn is_datetime_field(&self, field: &str) -> bool {
        self.datetime_fields.contains(field)
    }

    pub fn readable(&self) -> &BTreeSet<String> {
        &self.readable
    }

    pub fn writable(&self) -> &BTreeSet<String> {
        &self.writable
    }
}
