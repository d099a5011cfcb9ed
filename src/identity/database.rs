use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use tracing::instrument;
use uuid::Uuid;

use super::{Identity, IdentityError, IdentityProvider, IssuedSession, normalize_email};
use crate::crypto;
use crate::error::is_unique_violation;
use crate::models::{identity, session};

/// Identities and sessions stored alongside the invite tables.
#[derive(Clone)]
pub struct DatabaseIdentityProvider {
    db: Arc<DatabaseConnection>,
    session_ttl: Duration,
    min_credential_length: usize,
}

impl DatabaseIdentityProvider {
    pub fn new(db: Arc<DatabaseConnection>, session_ttl: Duration, min_credential_length: usize) -> Self {
        Self {
            db,
            session_ttl,
            min_credential_length,
        }
    }

    async fn find_row_by_email(&self, email: &str) -> Result<Option<identity::Model>, IdentityError> {
        identity::Entity::find()
            .filter(identity::Column::Email.eq(normalize_email(email)))
            .one(&*self.db)
            .await
            .map_err(unavailable)
    }
}

fn unavailable(err: DbErr) -> IdentityError {
    IdentityError::Unavailable(err.to_string())
}

fn to_identity(row: identity::Model) -> Identity {
    Identity {
        id: row.id,
        email: row.email,
    }
}

/// Runs credential hashing off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, IdentityError>
where
    F: FnOnce() -> Result<T, crypto::CryptoError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| IdentityError::Unavailable(e.to_string()))?
        .map_err(|e| IdentityError::Unavailable(e.to_string()))
}

#[async_trait]
impl IdentityProvider for DatabaseIdentityProvider {
    async fn current_session(&self, session_token: &str) -> Result<Option<Identity>, IdentityError> {
        let token_hash = crypto::hash(session_token);
        let Some(session) = session::Entity::find()
            .filter(session::Column::TokenHash.eq(token_hash.as_str()))
            .one(&*self.db)
            .await
            .map_err(unavailable)?
        else {
            return Ok(None);
        };

        if Utc::now() > session.expires_at {
            return Ok(None);
        }

        identity::Entity::find_by_id(session.identity_id)
            .one(&*self.db)
            .await
            .map(|row| row.map(to_identity))
            .map_err(unavailable)
    }

    #[instrument(skip_all)]
    async fn create_identity(&self, email: &str, credential: &str) -> Result<Identity, IdentityError> {
        if credential.chars().count() < self.min_credential_length {
            return Err(IdentityError::WeakCredential {
                min_length: self.min_credential_length,
            });
        }

        let email = normalize_email(email);
        if self.find_row_by_email(&email).await?.is_some() {
            return Err(IdentityError::AlreadyExists);
        }

        let credential = credential.to_owned();
        let password_hash = blocking(move || crypto::hash_credential(&credential)).await?;

        let row = identity::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email),
            password_hash: Set(password_hash),
            created_at: Set(Utc::now().fixed_offset()),
        }
        .insert(&*self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                IdentityError::AlreadyExists
            } else {
                unavailable(err)
            }
        })?;

        tracing::info!(identity_id = %row.id, "Identity created");
        Ok(to_identity(row))
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, IdentityError> {
        Ok(self.find_row_by_email(email).await?.map(to_identity))
    }

    #[instrument(skip(self))]
    async fn delete_identity(&self, identity_id: Uuid) -> Result<(), IdentityError> {
        session::Entity::delete_many()
            .filter(session::Column::IdentityId.eq(identity_id))
            .exec(&*self.db)
            .await
            .map_err(unavailable)?;
        identity::Entity::delete_by_id(identity_id)
            .exec(&*self.db)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn sign_in(&self, email: &str, credential: &str) -> Result<IssuedSession, IdentityError> {
        let Some(row) = self.find_row_by_email(email).await? else {
            return Err(IdentityError::InvalidCredentials);
        };

        let stored = row.password_hash.clone();
        let credential = credential.to_owned();
        let verified = blocking(move || crypto::verify_credential(&credential, &stored)).await?;
        if !verified {
            return Err(IdentityError::InvalidCredentials);
        }

        let (token, token_hash) = crypto::issue();
        let now = Utc::now();
        let expires_at = now + self.session_ttl;

        session::ActiveModel {
            id: Set(Uuid::new_v4()),
            identity_id: Set(row.id),
            token_hash: Set(token_hash.into_inner()),
            expires_at: Set(expires_at.fixed_offset()),
            created_at: Set(now.fixed_offset()),
        }
        .insert(&*self.db)
        .await
        .map_err(unavailable)?;

        tracing::info!(identity_id = %row.id, "Session issued");
        Ok(IssuedSession {
            identity: to_identity(row),
            token,
            expires_at,
        })
    }
}
