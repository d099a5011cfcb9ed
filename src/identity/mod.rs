//! # Identity Provider Adapter
//!
//! The invite flow talks to authentication only through [`IdentityProvider`].
//! [`DatabaseIdentityProvider`] is the implementation the service ships with;
//! it keeps identities and sessions in the same database.
//! [`BoundedIdentityProvider`] caps each call at the store timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::crypto::RawSecret;

mod bounded;
mod database;

pub use bounded::BoundedIdentityProvider;
pub use database::DatabaseIdentityProvider;

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub id: Uuid,
    /// Always lower-case.
    pub email: String,
}

/// A freshly issued session. The token is only ever available here.
#[derive(Debug)]
pub struct IssuedSession {
    pub identity: Identity,
    pub token: RawSecret,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("an identity with this email already exists")]
    AlreadyExists,
    #[error("credential does not meet the minimum length of {min_length}")]
    WeakCredential { min_length: usize },
    #[error("invalid email or credential")]
    InvalidCredentials,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves a bearer session token; `None` when unknown or expired.
    async fn current_session(&self, session_token: &str)
    -> Result<Option<Identity>, IdentityError>;

    async fn create_identity(
        &self,
        email: &str,
        credential: &str,
    ) -> Result<Identity, IdentityError>;

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, IdentityError>;

    /// Only used to compensate a half-finished account creation.
    async fn delete_identity(&self, identity_id: Uuid) -> Result<(), IdentityError>;

    async fn sign_in(&self, email: &str, credential: &str)
    -> Result<IssuedSession, IdentityError>;
}

/// Lower-cases and trims an email for storage and comparison.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
