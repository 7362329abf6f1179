//! Subject Identity
//!
//! Resolves the request's opaque user handle into a subject the ACL
//! evaluator and owner derivation can work with.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An authenticated subject as seen by the resolver core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_validated: bool,
    #[serde(default)]
    pub administrator: bool,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            email_validated: false,
            administrator: false,
        }
    }
}

/// Port to the identity provider.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a user handle into a subject. `Ok(None)` means the handle
    /// is unknown; the request then proceeds as anonymous.
    async fn resolve(&self, user: &str) -> anyhow::Result<Option<Subject>>;
}

/// Identity source backed by a fixed set of subjects. Useful for tests
/// and single-tenant embeddings.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityResolver {
    subjects: Vec<Subject>,
}

impl StaticIdentityResolver {
    pub fn new(subjects: Vec<Subject>) -> Self {
        Self { subjects }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, user: &str) -> anyhow::Result<Option<Subject>> {
        Ok(self.subjects.iter().find(|s| s.id == user).cloned())
    }
}
