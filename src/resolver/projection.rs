//! Authorization Projector
//!
//! Rewrites a retrieved entity so only ACL-allowed fields leave the
//! resolver, reporting everything withheld through `restrictedFields`.

use crate::acl::AclMatch;
use crate::model::ModelView;
use crate::store::Instance;
use serde_json::{Map, Value};

/// Transparency key listing requested fields the caller may not see.
pub const RESTRICTED_FIELDS_KEY: &str = "restrictedFields";

/// Fields exposed regardless of the ACL field grant.
const FIXED_EXPOSURES: [&str; 5] = ["id", "created", "updated", "tasks", RESTRICTED_FIELDS_KEY];

/// Project one entity for one caller per the read match.
pub fn project_instance(
    view: &ModelView,
    read: &AclMatch,
    instance: &Instance,
    requested: &[String],
) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert(
        "id".into(),
        Value::String(instance.id().to_string()),
    );

    if !read.allow {
        let restricted: Vec<Value> = requested
            .iter()
            .filter(|field| field.as_str() != "id")
            .map(|field| Value::String(field.clone()))
            .collect();
        if !restricted.is_empty() {
            out.insert(RESTRICTED_FIELDS_KEY.into(), Value::Array(restricted));
        }
        return out;
    }

    let mut restricted = Vec::new();
    for field in requested {
        if field == "id" {
            continue;
        }
        let fixed = FIXED_EXPOSURES.contains(&field.as_str());
        let exposed = fixed || (view.readable().contains(field) && read.field_allowed(field));
        if !exposed {
            restricted.push(Value::String(field.clone()));
            continue;
        }
        match instance.get(field) {
            Some(value) => {
                out.insert(field.clone(), value.clone());
            }
            // declared columns project as null; synthetic fields such as
            // `tasks` are resolved elsewhere and stay absent
            None if view.readable().contains(field) => {
                out.insert(field.clone(), Value::Null);
            }
            None => {}
        }
    }

    if !restricted.is_empty() {
        out.insert(RESTRICTED_FIELDS_KEY.into(), Value::Array(restricted));
    }
    out
}
