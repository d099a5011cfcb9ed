//! # Notification API Handlers
//!
//! In-app inbox of pending invites, with accept and decline actions that do
//! not require the raw invite link.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::auth::{CurrentSession, RequireSession};
use crate::error::ApiError;
use crate::invite_service::{AcceptOutcome, InboxEntry};
use crate::server::AppState;

/// List the caller's pending invite notifications
#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Notifications for invites that can still be accepted", body = Vec<InboxEntry>),
        (status = 401, description = "Sign in required", body = ApiError),
        (status = 503, description = "Temporary failure", body = ApiError)
    ),
    tag = "notifications"
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    RequireSession(caller): RequireSession,
) -> Result<Json<Vec<InboxEntry>>, ApiError> {
    Ok(Json(state.invites.inbox(&caller).await?))
}

/// Accept the invite behind a notification
#[utoipa::path(
    post,
    path = "/api/v1/notifications/{id}/accept",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Notification UUID")
    ),
    responses(
        (status = 200, description = "Invite accepted", body = AcceptOutcome),
        (status = 401, description = "Sign in required", body = ApiError),
        (status = 404, description = "Notification not found for this account", body = ApiError),
        (status = 409, description = "Wrong account or invite already used", body = ApiError),
        (status = 410, description = "Invite expired or revoked", body = ApiError),
        (status = 503, description = "Temporary failure", body = ApiError)
    ),
    tag = "notifications"
)]
pub async fn accept_notification(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<AcceptOutcome>, ApiError> {
    let outcome = state
        .invites
        .accept_by_notification(notification_id, session.as_ref())
        .await?;

    Ok(Json(outcome))
}

/// Decline the invite behind a notification
#[utoipa::path(
    post,
    path = "/api/v1/notifications/{id}/decline",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Notification UUID")
    ),
    responses(
        (status = 204, description = "Invite declined"),
        (status = 401, description = "Sign in required", body = ApiError),
        (status = 404, description = "Notification not found for this account", body = ApiError),
        (status = 409, description = "Invite already accepted", body = ApiError),
        (status = 503, description = "Temporary failure", body = ApiError)
    ),
    tag = "notifications"
)]
pub async fn decline_notification(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(notification_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .invites
        .decline_by_notification(notification_id, session.as_ref())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
