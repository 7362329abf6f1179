//! Editorial Core
//!
//! Model-driven instance resolution for an editorial workflow backend
//! (submission → curation → publication). Given a declarative model
//! definition and an ACL policy, a resolver implements CRUD, listing,
//! relation traversal and BPM task completion with:
//! - Field-level and row-level authorization
//! - Declarative query planning with extension hooks
//! - Workflow process lifecycle and task pipelines
//! - Pub/sub lifecycle notifications and request-scoped memoization

pub mod acl;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod model;
pub mod resolver;
pub mod store;
pub mod workflow;

// Re-exports for convenience
pub use config::CoreConfig;
pub use error::{ResolverError, ResolverResult};
pub use events::{EventBus, InstanceEvent, InstanceEventKind};
pub use identity::{IdentityResolver, Subject};
pub use model::ModelDefinition;
pub use resolver::{
    CompleteTaskInput, FieldSelection, InstanceResolver, ListingInput, ListingPage, PageInfo,
    RequestContext, TaskCompletionOutcome,
};
pub use store::{EntityStore, Instance, MemoryStore};
pub use workflow::{ProcessEngine, RestProcessEngine};
