//! Dashboard account endpoints: register and login.
//!
//! Both mint a session JWT. OAuth linkage lives on the user record
//! (`google_id`) but the callback flow is handled by the fronting identity
//! proxy, not here.

use crate::auth::{hash_password, issue_token, verify_password};
use crate::error::ApiError;
use crate::state::SharedState;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use lens_core::User;
use serde::{Deserialize, Serialize};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    email: String,
    password: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    token: String,
    user: User,
}

/// `POST /auth/register`
pub async fn register(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::validation("invalid email"));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let mut user = User::with_password(&email, hash_password(&req.password)?);
    user.name = req.name;
    state.store.create_user(&user).await?;
    tracing::info!(user_id = %user.id, "user registered");

    let token = issue_token(
        &user.id,
        &user.email,
        &state.config.auth.jwt_secret,
        state.config.auth.token_ttl_hours,
    )?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = state
        .store
        .user_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::unauthenticated("unknown email or password"))?;

    let valid = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&req.password, hash));
    if !valid {
        return Err(ApiError::unauthenticated("unknown email or password"));
    }

    let token = issue_token(
        &user.id,
        &user.email,
        &state.config.auth.jwt_secret,
        state.config.auth.token_ttl_hours,
    )?;
    Ok(Json(AuthResponse { token, user }))
}
