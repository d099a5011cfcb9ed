//! Error taxonomy of the invite lifecycle and its HTTP mapping.

use axum::http::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::error::{ApiError, RepositoryError};
use crate::identity::IdentityError;
use crate::models::invite::InviteStatus;
use crate::repositories::TransitionError;

#[derive(Debug, Error)]
pub enum InviteError {
    #[error("invite not found")]
    NotFound,
    #[error("invite has expired")]
    Expired,
    #[error("invite has been revoked")]
    RevokedOrExpired,
    #[error("invite was already used")]
    AlreadyAccepted,
    #[error("signed-in account does not match the invited email")]
    WrongAccount,
    #[error("credential does not meet the minimum length of {min_length}")]
    WeakCredential { min_length: usize },
    #[error("an account with this email already exists")]
    IdentityAlreadyExists,
    #[error("authentication required")]
    Unauthenticated,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("no valid email is associated with this invite")]
    InvalidEmail,
    #[error("temporary failure: {0}")]
    Transient(String),
    #[error("compensation failed after {original}: {detail}")]
    CompensationFailed {
        original: Box<InviteError>,
        detail: String,
    },
}

impl InviteError {
    /// Retryable infrastructure failures; everything else is a business outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::CompensationFailed { .. })
    }

    /// Stable label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::RevokedOrExpired => "revoked",
            Self::AlreadyAccepted => "already_accepted",
            Self::WrongAccount => "wrong_account",
            Self::WeakCredential { .. } => "weak_credential",
            Self::IdentityAlreadyExists => "identity_exists",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::InvalidEmail => "invalid_email",
            Self::Transient(_) => "transient",
            Self::CompensationFailed { .. } => "compensation_failed",
        }
    }
}

impl From<RepositoryError> for InviteError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(_) => Self::NotFound,
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<TransitionError> for InviteError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Conflict(InviteStatus::Revoked) => Self::RevokedOrExpired,
            TransitionError::Conflict(_) => Self::AlreadyAccepted,
            TransitionError::Expired(_) => Self::Expired,
            TransitionError::Repository(inner) => inner.into(),
        }
    }
}

impl From<IdentityError> for InviteError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::AlreadyExists => Self::IdentityAlreadyExists,
            IdentityError::WeakCredential { min_length } => Self::WeakCredential { min_length },
            IdentityError::InvalidCredentials => Self::Unauthenticated,
            IdentityError::Unavailable(message) => Self::Transient(message),
        }
    }
}

impl From<InviteError> for ApiError {
    fn from(err: InviteError) -> Self {
        let (status, code, action) = match &err {
            InviteError::NotFound => (StatusCode::NOT_FOUND, "INVITE_NOT_FOUND", None),
            InviteError::Expired => (StatusCode::GONE, "INVITE_EXPIRED", Some("request_new_invite")),
            InviteError::RevokedOrExpired => {
                (StatusCode::GONE, "INVITE_REVOKED", Some("request_new_invite"))
            }
            InviteError::AlreadyAccepted => (
                StatusCode::CONFLICT,
                "INVITE_ALREADY_ACCEPTED",
                Some("invite_already_used"),
            ),
            InviteError::WrongAccount => (
                StatusCode::CONFLICT,
                "WRONG_ACCOUNT",
                Some("sign_out_and_use_invited_email"),
            ),
            InviteError::IdentityAlreadyExists => (
                StatusCode::CONFLICT,
                "IDENTITY_ALREADY_EXISTS",
                Some("sign_in_instead"),
            ),
            InviteError::WeakCredential { .. } => {
                (StatusCode::BAD_REQUEST, "WEAK_CREDENTIAL", None)
            }
            InviteError::InvalidEmail => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED", None),
            InviteError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", Some("sign_in"))
            }
            InviteError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", None),
            InviteError::Transient(_) | InviteError::CompensationFailed { .. } => {
                tracing::error!(error = %err, "Invite operation failed transiently");
                return ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "The invite service is temporarily unavailable",
                )
                .with_retry_after(2);
            }
        };

        let api_error = ApiError::new(status, code, err.to_string());
        match (action, &err) {
            (_, InviteError::WeakCredential { min_length }) => {
                api_error.with_details(json!({ "min_length": min_length }))
            }
            (Some(action), _) => api_error.with_details(json!({ "action": action })),
            (None, _) => api_error,
        }
    }
}
