//! # Invite API Handlers
//!
//! Public validation and acceptance, plus the administrator surface for
//! issuing, regenerating, listing and revoking an employee's invites.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{CurrentSession, RequireSession};
use crate::error::ApiError;
use crate::invite_service::{
    AcceptOutcome, InvitePreview, InviteSummary, IssuedInviteLink, RevokeOutcome,
};
use crate::models::role::CompanyRole;
use crate::server::AppState;

/// Query string of the public validation endpoint
#[derive(Debug, Deserialize, IntoParams)]
pub struct ValidateInviteQuery {
    /// Raw invite secret taken from the deep link
    pub token: String,
}

/// Request payload for accepting an invite
#[derive(Debug, Deserialize, ToSchema)]
pub struct AcceptInviteRequest {
    /// Raw invite secret taken from the deep link
    pub token: String,
    /// Email for the new account; ignored when a session is present
    #[schema(example = "ada@acme.test")]
    pub email: Option<String>,
    /// Credential for the new account; required without a session
    #[schema(format = Password)]
    pub password: Option<String>,
}

/// Request payload for issuing an invite
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct IssueInviteRequest {
    /// Role to offer; defaults to the employee's role
    pub role: Option<CompanyRole>,
}

/// Validate an invite token
#[utoipa::path(
    get,
    path = "/api/v1/invites/validate",
    params(ValidateInviteQuery),
    responses(
        (status = 200, description = "Invite is pending and acceptable", body = InvitePreview),
        (status = 400, description = "Missing token", body = ApiError),
        (status = 404, description = "Unknown or malformed token", body = ApiError),
        (status = 409, description = "Invite already used", body = ApiError),
        (status = 410, description = "Invite expired or revoked", body = ApiError),
        (status = 503, description = "Temporary failure", body = ApiError)
    ),
    tag = "invites"
)]
pub async fn validate_invite(
    State(state): State<AppState>,
    query: Result<Query<ValidateInviteQuery>, QueryRejection>,
) -> Result<Json<InvitePreview>, ApiError> {
    let Query(query) = query?;
    let preview = state.invites.validate(&query.token).await?;
    Ok(Json(preview))
}

/// Accept an invite
///
/// With a bearer session the signed-in account is linked. Without one a new
/// account is created from `email` and `password` and the caller must sign
/// in afterwards.
#[utoipa::path(
    post,
    path = "/api/v1/invites/accept",
    request_body = AcceptInviteRequest,
    security((), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "Invite accepted", body = AcceptOutcome),
        (status = 400, description = "Weak credential or invalid email", body = ApiError),
        (status = 401, description = "Session or credential required", body = ApiError),
        (status = 404, description = "Unknown or malformed token", body = ApiError),
        (status = 409, description = "Wrong account, already used, or account exists", body = ApiError),
        (status = 410, description = "Invite expired or revoked", body = ApiError),
        (status = 503, description = "Temporary failure", body = ApiError)
    ),
    tag = "invites"
)]
pub async fn accept_invite(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    payload: Result<Json<AcceptInviteRequest>, JsonRejection>,
) -> Result<Json<AcceptOutcome>, ApiError> {
    let Json(request) = payload?;

    let outcome = state
        .invites
        .accept(
            &request.token,
            session.as_ref(),
            request.email.as_deref(),
            request.password.as_deref(),
        )
        .await?;

    Ok(Json(outcome))
}

/// Issue an invite for an employee
#[utoipa::path(
    post,
    path = "/api/v1/companies/{company_id}/employees/{employee_id}/invites",
    security(("bearer_auth" = [])),
    params(
        ("company_id" = Uuid, Path, description = "Company UUID"),
        ("employee_id" = Uuid, Path, description = "Employee UUID")
    ),
    request_body = IssueInviteRequest,
    responses(
        (status = 201, description = "Invite issued; prior pending invites revoked", body = IssuedInviteLink),
        (status = 401, description = "Sign in required", body = ApiError),
        (status = 403, description = "Owner or admin role required", body = ApiError),
        (status = 404, description = "Employee not found in company", body = ApiError),
        (status = 409, description = "Employee already linked to an account", body = ApiError),
        (status = 503, description = "Temporary failure", body = ApiError)
    ),
    tag = "invites"
)]
pub async fn issue_invite(
    State(state): State<AppState>,
    RequireSession(caller): RequireSession,
    Path((company_id, employee_id)): Path<(Uuid, Uuid)>,
    payload: Result<Json<IssueInviteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IssuedInviteLink>), ApiError> {
    let Json(request) = payload?;

    let issued = state
        .invites
        .issue(company_id, employee_id, request.role, &caller)
        .await?;

    Ok((StatusCode::CREATED, Json(issued)))
}

/// Regenerate an employee's invite
#[utoipa::path(
    post,
    path = "/api/v1/companies/{company_id}/employees/{employee_id}/invites/regenerate",
    security(("bearer_auth" = [])),
    params(
        ("company_id" = Uuid, Path, description = "Company UUID"),
        ("employee_id" = Uuid, Path, description = "Employee UUID")
    ),
    responses(
        (status = 201, description = "New invite issued with the previous role", body = IssuedInviteLink),
        (status = 401, description = "Sign in required", body = ApiError),
        (status = 403, description = "Owner or admin role required", body = ApiError),
        (status = 404, description = "Employee not found in company", body = ApiError),
        (status = 409, description = "Employee already linked to an account", body = ApiError),
        (status = 503, description = "Temporary failure", body = ApiError)
    ),
    tag = "invites"
)]
pub async fn regenerate_invite(
    State(state): State<AppState>,
    RequireSession(caller): RequireSession,
    Path((company_id, employee_id)): Path<(Uuid, Uuid)>,
) -> Result<(StatusCode, Json<IssuedInviteLink>), ApiError> {
    let issued = state
        .invites
        .regenerate(company_id, employee_id, &caller)
        .await?;

    Ok((StatusCode::CREATED, Json(issued)))
}

/// List an employee's invites
#[utoipa::path(
    get,
    path = "/api/v1/companies/{company_id}/employees/{employee_id}/invites",
    security(("bearer_auth" = [])),
    params(
        ("company_id" = Uuid, Path, description = "Company UUID"),
        ("employee_id" = Uuid, Path, description = "Employee UUID")
    ),
    responses(
        (status = 200, description = "Invites, newest first, with derived status", body = Vec<InviteSummary>),
        (status = 401, description = "Sign in required", body = ApiError),
        (status = 403, description = "Owner or admin role required", body = ApiError),
        (status = 404, description = "Employee not found in company", body = ApiError)
    ),
    tag = "invites"
)]
pub async fn list_invites(
    State(state): State<AppState>,
    RequireSession(caller): RequireSession,
    Path((company_id, employee_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<InviteSummary>>, ApiError> {
    let invites = state
        .invites
        .list_employee_invites(company_id, employee_id, &caller)
        .await?;

    Ok(Json(invites))
}

/// Revoke an employee's pending invites
#[utoipa::path(
    delete,
    path = "/api/v1/companies/{company_id}/employees/{employee_id}/invites",
    security(("bearer_auth" = [])),
    params(
        ("company_id" = Uuid, Path, description = "Company UUID"),
        ("employee_id" = Uuid, Path, description = "Employee UUID")
    ),
    responses(
        (status = 200, description = "Pending invites revoked", body = RevokeOutcome),
        (status = 401, description = "Sign in required", body = ApiError),
        (status = 403, description = "Owner or admin role required", body = ApiError),
        (status = 404, description = "Employee not found in company", body = ApiError),
        (status = 503, description = "Temporary failure", body = ApiError)
    ),
    tag = "invites"
)]
pub async fn revoke_invites(
    State(state): State<AppState>,
    RequireSession(caller): RequireSession,
    Path((company_id, employee_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RevokeOutcome>, ApiError> {
    let outcome = state
        .invites
        .revoke(company_id, employee_id, &caller)
        .await?;

    Ok(Json(outcome))
}
