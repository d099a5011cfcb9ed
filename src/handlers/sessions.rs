//! # Session API Handlers
//!
//! Password sign-in against the database identity provider. Accounts created
//! through an invite sign in here before using the rest of the API.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, unauthorized};
use crate::identity::{Identity, IdentityError};
use crate::server::AppState;

/// Request payload for signing in
#[derive(Debug, Deserialize, ToSchema)]
pub struct SignInRequest {
    #[schema(example = "ada@acme.test")]
    pub email: String,
    #[schema(format = Password)]
    pub password: String,
}

/// A newly issued session
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    /// Bearer token; shown once
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    request_body = SignInRequest,
    responses(
        (status = 201, description = "Session issued", body = SessionResponse),
        (status = 400, description = "Malformed request", body = ApiError),
        (status = 401, description = "Invalid email or password", body = ApiError),
        (status = 503, description = "Identity provider unavailable", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let Json(request) = payload?;

    let session = state
        .identity
        .sign_in(&request.email, &request.password)
        .await
        .map_err(|err| match err {
            IdentityError::Unavailable(message) => {
                tracing::error!(error = %message, "Sign-in failed");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Sign-in is temporarily unavailable",
                )
                .with_retry_after(1)
            }
            _ => unauthorized(Some("Invalid email or password")),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token: session.token.expose().to_string(),
            expires_at: session.expires_at,
            identity: session.identity,
        }),
    ))
}
