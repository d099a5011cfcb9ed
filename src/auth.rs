//! # Authentication
//!
//! Resolves `Authorization: Bearer <session token>` through the
//! [`IdentityProvider`] once per request and exposes the result to handlers
//! through the [`CurrentSession`] and [`RequireSession`] extractors.
//!
//! A request without the header is anonymous; a header that does not resolve
//! to a live session is rejected outright rather than silently downgraded.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::error::{ApiError, unauthorized};
use crate::identity::{Identity, IdentityError, IdentityProvider};

/// The caller's identity, or `None` for an anonymous request.
#[derive(Debug, Clone, Default)]
pub struct CurrentSession(pub Option<Identity>);

/// The caller's identity; rejects anonymous requests with 401.
#[derive(Debug, Clone)]
pub struct RequireSession(pub Identity);

/// Session middleware applied to every API route.
pub async fn session_middleware(
    State(identity): State<Arc<dyn IdentityProvider>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let session = match extract_bearer_token(request.headers())? {
        None => CurrentSession(None),
        Some(token) => {
            let resolved = identity.current_session(token).await.map_err(|err| match err {
                IdentityError::Unavailable(message) => {
                    tracing::error!(error = %message, "Session lookup failed");
                    ApiError::new(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "SERVICE_UNAVAILABLE",
                        "Session lookup is temporarily unavailable",
                    )
                    .with_retry_after(1)
                }
                _ => unauthorized(Some("Invalid session")),
            })?;

            match resolved {
                Some(identity) => {
                    tracing::debug!(identity_id = %identity.id, "Authenticated request");
                    CurrentSession(Some(identity))
                }
                None => return Err(unauthorized(Some("Invalid or expired session"))),
            }
        }
    };

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let header = value
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Some)
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .unwrap_or_default())
    }
}

impl<S> FromRequestParts<S> for RequireSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .and_then(|session| session.0.clone())
            .map(RequireSession)
            .ok_or_else(|| unauthorized(Some("Sign in required")))
    }
}
