//! Error types for the Lens domain.
//!
//! Uses `thiserror` for ergonomic error definitions. The variants mirror the
//! HTTP surface: the gateway maps each kind to exactly one status code, so
//! lower layers never reason about HTTP.

use thiserror::Error;

/// The top-level error type for all Lens operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request body, bad id, unknown enum value, missing field.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Missing or invalid credential.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Target does not exist or is not owned by the caller.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Unique-constraint violation (email, api key hash).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller is being throttled.
    #[error("Rate limited")]
    RateLimited,

    // --- Storage errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Row does not exist, or the (project, id) pair does not match.
    #[error("Not found")]
    NotFound,

    /// Unique-constraint violation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Connection failure, timeout, retryable backend error.
    #[error("Backend unavailable: {0}")]
    Transient(String),

    /// Invariant violation: dangling FK, corrupted row. Never retryable.
    #[error("Backend invariant violated: {0}")]
    Fatal(String),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    Query(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_propagates_into_error() {
        let err: Error = StoreError::Conflict("projects.api_key_hash".into()).into();
        assert!(err.to_string().contains("api_key_hash"));
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = Error::NotFound("trace");
        assert_eq!(err.to_string(), "trace not found");
    }
}
