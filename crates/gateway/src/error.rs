//! HTTP mapping for the domain error taxonomy.
//!
//! One kind, one status code. Cross-tenant lookups surface as 404 rather
//! than 403 so the API never acts as an existence oracle; backend failures
//! reach the client as a bare 500 with details kept in the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use lens_core::{Error, StoreError};
use serde::Serialize;

/// Wire shape for every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A domain error carried to the HTTP edge.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self(Error::Validation(message.into()))
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self(Error::Unauthenticated(message.into()))
    }

    pub fn not_found(entity: &'static str) -> Self {
        Self(Error::NotFound(entity))
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(Error::Store(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::Unauthenticated(_) => {
                (StatusCode::UNAUTHORIZED, "invalid or missing credentials".into())
            }
            Error::NotFound(entity) => (StatusCode::NOT_FOUND, format!("{entity} not found")),
            Error::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Error::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate limited".into()),
            Error::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "not found".into())
            }
            Error::Store(StoreError::Conflict(msg)) => (StatusCode::CONFLICT, msg.clone()),
            Error::Store(err) => {
                // Transient and fatal backend errors share a client-facing
                // 500; detail stays server-side.
                tracing::error!(error = %err, "backend failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
            Error::Serialization(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Internal(err) => {
                tracing::error!(error = %err, "internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
