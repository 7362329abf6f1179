//! Process Configuration
//!
//! Environment-driven settings for the resolver core.

use serde::{Deserialize, Serialize};

/// Configuration shared by every resolver in the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Emit a trace report for every ACL evaluation.
    pub acl_trace: bool,
    /// Page size applied when a listing omits `first`.
    pub default_page_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            acl_trace: false,
            default_page_size: 200,
        }
    }
}

impl CoreConfig {
    /// Load configuration from the environment (`.env` honored).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let acl_trace = std::env::var("EDITORIAL_ACL_TRACE")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let default_page_size = std::env::var("EDITORIAL_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(200);

        Self {
            acl_trace,
            default_page_size,
        }
    }
}
