//! Request Context
//!
//! Per-request state owned by a single GraphQL request: the opaque user
//! handle, the memoized subject resolution, and the instance lookup map
//! keyed by resolver id so distinct resolvers never collide.

use crate::identity::{IdentityResolver, Subject};
use crate::store::Instance;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct RequestContext {
    user: Option<String>,
    subject: RwLock<Option<Option<Subject>>>,
    instances: RwLock<HashMap<(usize, String), Instance>>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::default()
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Resolve the request's subject once; later calls reuse the result.
    pub async fn subject(
        &self,
        identity: &Arc<dyn IdentityResolver>,
    ) -> anyhow::Result<Option<Subject>> {
        if let Some(resolved) = self.subject.read().await.clone() {
            return Ok(resolved);
        }

        let resolved = match &self.user {
            Some(user) => identity.resolve(user).await?,
            None => None,
        };
        *self.subject.write().await = Some(resolved.clone());
        Ok(resolved)
    }

    /// Memoized entity for this request, if one resolver already fetched it.
    pub(crate) async fn instance(&self, resolver_id: usize, id: &str) -> Option<Instance> {
        let instances = self.instances.read().await;
        instances.get(&(resolver_id, id.to_string())).cloned()
    }

    pub(crate) async fn remember(&self, resolver_id: usize, instance: &Instance) {
        self.remember_as(resolver_id, instance.id(), instance).await;
    }

    /// Memoize under an explicit key; relation traversal uses composite
    /// `<Type>/<id>` keys to stay clear of the resolver's own entities.
    pub(crate) async fn remember_as(&self, resolver_id: usize, key: &str, instance: &Instance) {
        let mut instances = self.instances.write().await;
        instances.insert((resolver_id, key.to_string()), instance.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentityResolver;
    use serde_json::json;

    #[tokio::test]
    async fn test_subject_resolution_is_memoized() {
        let identity: Arc<dyn IdentityResolver> = Arc::new(StaticIdentityResolver::new(vec![
            Subject::new("u1"),
        ]));
        let ctx = RequestContext::for_user("u1");

        let first = ctx.subject(&identity).await.unwrap();
        let second = ctx.subject(&identity).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn test_anonymous_context_has_no_subject() {
        let identity: Arc<dyn IdentityResolver> =
            Arc::new(StaticIdentityResolver::new(vec![Subject::new("u1")]));
        let ctx = RequestContext::anonymous();
        assert!(ctx.subject(&identity).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_instance_lookup_is_scoped_by_resolver_id() {
        let ctx = RequestContext::anonymous();
        let mut instance = Instance::create();
        instance.set("title", json!("x"));

        ctx.remember(1, &instance).await;
        assert!(ctx.instance(1, instance.id()).await.is_some());
        assert!(ctx.instance(2, instance.id()).await.is_none());
    }
}
