//! Authentication for the two principal kinds.
//!
//! API-key paths carry `Authorization: Bearer le_<opaque>`; the server
//! hashes the presented token and looks the project up by hash, so no
//! plaintext comparison ever happens. Session paths carry a JWT minted at
//! login; signature or expiry failures are a plain 401.

use crate::error::ApiError;
use crate::state::SharedState;
use argon2::password_hash::{PasswordHash, SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use lens_core::{Project, project};
use serde::{Deserialize, Serialize};

/// JWT payload for dashboard sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    /// Expiry as a unix timestamp.
    pub exp: usize,
}

/// Extract the bearer token from the Authorization header.
fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// The project resolved from an API key, for SDK-facing routes.
#[derive(Debug, Clone)]
pub struct ApiKeyProject(pub Project);

impl FromRequestParts<SharedState> for ApiKeyProject {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)
            .ok_or_else(|| ApiError::unauthenticated("missing bearer token"))?;
        if !token.starts_with(project::API_KEY_PREFIX) {
            return Err(ApiError::unauthenticated("not an api key"));
        }

        let hash = project::hash_api_key(token);
        let found = state.store.project_by_api_key_hash(&hash).await?;
        found
            .map(ApiKeyProject)
            .ok_or_else(|| ApiError::unauthenticated("unknown api key"))
    }
}

/// The authenticated dashboard user, for session-JWT routes.
#[derive(Debug, Clone)]
pub struct SessionUser(pub Claims);

impl FromRequestParts<SharedState> for SessionUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)
            .ok_or_else(|| ApiError::unauthenticated("missing bearer token"))?;
        let claims = decode_token(token, &state.config.auth.jwt_secret)?;
        Ok(SessionUser(claims))
    }
}

/// Mint a session token for a user.
pub fn issue_token(
    user_id: &str,
    email: &str,
    secret: &str,
    ttl_hours: u64,
) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: (Utc::now() + chrono::Duration::hours(ttl_hours as i64)).timestamp() as usize,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError(lens_core::Error::Internal(format!("jwt encode: {e}"))))
}

/// Validate a session token, rejecting bad signatures and expired tokens.
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::unauthenticated("invalid session token"))
}

/// Argon2 hash for stored passwords.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError(lens_core::Error::Internal(format!("password hash: {e}"))))
}

/// Verify a password against its stored hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .and_then(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter2hunter2", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn token_round_trip() {
        let token = issue_token("u1", "dev@example.com", "test-secret", 1).unwrap();
        let claims = decode_token(&token, "test-secret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email, "dev@example.com");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("u1", "dev@example.com", "secret-a", 1).unwrap();
        assert!(decode_token(&token, "secret-b").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        // A token that expired an hour ago.
        let claims = Claims {
            sub: "u1".into(),
            email: "dev@example.com".into(),
            exp: (Utc::now() - chrono::Duration::hours(1)).timestamp() as usize,
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"s"),
        )
        .unwrap();
        assert!(decode_token(&token, "s").is_err());
    }
}
