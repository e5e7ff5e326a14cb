//! Typed failure taxonomy for the search engine.
//!
//! Breaker rejections and backend failures are expected and recovered via
//! fallback; governance and configuration failures are fatal to the request.

use thiserror::Error;

pub type Result<T, E = SearchError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("database connection failed: {0}")]
    DatabaseConnection(String),

    #[error("cache connection failed: {0}")]
    CacheConnection(String),

    #[error("search timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("circuit breaker open for {backend} ({failure_count} consecutive failures)")]
    CircuitBreakerOpen { backend: String, failure_count: u32 },

    #[error("backend search failed: {0}")]
    Backend(String),

    #[error("access denied for user {user_id} with role {user_role}: {message}")]
    AccessDenied {
        user_id: String,
        user_role: String,
        message: String,
    },

    #[error("hybrid search failed; cache: {cache_error}; database: {database_error}")]
    HybridSearchFailure {
        cache_error: String,
        database_error: String,
    },

    #[error("data governance not configured")]
    GovernanceNotConfigured,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("governance policy error: {0}")]
    Policy(String),
}

impl SearchError {
    /// Whether the engine should try the fallback backend after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SearchError::DatabaseConnection(_)
                | SearchError::CacheConnection(_)
                | SearchError::CircuitBreakerOpen { .. }
                | SearchError::Backend(_)
        )
    }
}
