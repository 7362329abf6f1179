//! Resolver Error Taxonomy
//!
//! The closed set of failure classes every public operation can surface.
//! Policy outcomes of task completion (validation sentinels) are normal
//! return values and never appear here.

use thiserror::Error;

pub type ResolverResult<T> = Result<T, ResolverError>;

#[derive(Debug, Error)]
pub enum ResolverError {
    /// A required argument was missing from the caller's input.
    #[error("missing required input: {0}")]
    UserInput(String),

    /// The addressed entity, form, outcome or task does not exist.
    #[error("{0}")]
    NotFound(String),

    /// An ACL check, restriction scope or owner check rejected the
    /// operation. Write failures carry the offending field names.
    #[error("not authorized: {message}")]
    Authorization {
        message: String,
        fields: Vec<String>,
    },

    /// The model or form configuration does not permit the operation.
    #[error("{0}")]
    Logic(String),

    /// Any business-engine failure. The caller sees one opaque message;
    /// the detailed cause is retained for logging.
    #[error("business process engine request failed")]
    Engine(#[source] anyhow::Error),

    /// Persistence or transport fault outside the domain classes.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ResolverError {
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn authorization_fields(message: impl Into<String>, fields: Vec<String>) -> Self {
        Self::Authorization {
            message: message.into(),
            fields,
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} was not found"))
    }
}
