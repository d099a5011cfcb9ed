//! # Invite Repository
//!
//! SeaORM implementation of [`InviteStore`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait, prelude::DateTimeWithTimeZone,
};
use thiserror::Error;
use uuid::Uuid;

use super::{InviteStore, IssuedInvite, NewInvite};
use crate::crypto::LookupHash;
use crate::error::RepositoryError;
use crate::models::employee;
use crate::models::invite::{ActiveModel, Column, Entity, InviteStatus, Model};

/// Why a `pending -> accepted` transition did not happen.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("invite is no longer pending (status: {0})")]
    Conflict(InviteStatus),
    #[error("invite expired at {0}")]
    Expired(DateTimeWithTimeZone),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Repository for invite database operations
#[derive(Clone)]
pub struct InviteRepository {
    db: Arc<DatabaseConnection>,
}

impl InviteRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl InviteStore for InviteRepository {
    async fn issue(&self, new_invite: NewInvite) -> Result<IssuedInvite, RepositoryError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(RepositoryError::database_error)?;

        // Row lock on the employee serializes concurrent issuers on Postgres;
        // the second one re-reads the pending set after the first commits.
        let employee = employee::Entity::find_by_id(new_invite.employee_id)
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(RepositoryError::database_error)?
            .filter(|employee| employee.company_id == new_invite.company_id)
            .ok_or_else(|| RepositoryError::NotFound("employee".to_string()))?;

        let superseded: Vec<Uuid> = Entity::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::EmployeeId.eq(employee.id))
            .filter(Column::Status.eq(InviteStatus::Pending))
            .into_tuple()
            .all(&txn)
            .await
            .map_err(RepositoryError::database_error)?;

        if !superseded.is_empty() {
            Entity::update_many()
                .set(ActiveModel {
                    status: Set(InviteStatus::Revoked),
                    revoked_at: Set(Some(new_invite.issued_at.fixed_offset())),
                    ..Default::default()
                })
                .filter(Column::Id.is_in(superseded.clone()))
                .filter(Column::Status.eq(InviteStatus::Pending))
                .exec(&txn)
                .await
                .map_err(RepositoryError::database_error)?;
        }

        let invite = ActiveModel {
            id: Set(Uuid::new_v4()),
            company_id: Set(new_invite.company_id),
            employee_id: Set(new_invite.employee_id),
            role: Set(new_invite.role),
            target_email: Set(new_invite.target_email),
            lookup_hash: Set(new_invite.lookup_hash.into_inner()),
            status: Set(InviteStatus::Pending),
            issued_by: Set(new_invite.issued_by),
            issued_at: Set(new_invite.issued_at.fixed_offset()),
            expires_at: Set(new_invite.expires_at.fixed_offset()),
            accepted_at: Set(None),
            accepted_by: Set(None),
            revoked_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(RepositoryError::database_error)?;

        txn.commit()
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(IssuedInvite { invite, superseded })
    }

    async fn find_by_lookup_hash(
        &self,
        lookup_hash: &LookupHash,
    ) -> Result<Option<Model>, RepositoryError> {
        Entity::find()
            .filter(Column::LookupHash.eq(lookup_hash.as_str()))
            .one(&*self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    async fn find_by_id(&self, invite_id: Uuid) -> Result<Option<Model>, RepositoryError> {
        Entity::find_by_id(invite_id)
            .one(&*self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    async fn transition_to_accepted(
        &self,
        invite_id: Uuid,
        identity_id: Uuid,
        target_email: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Model, TransitionError> {
        let current = self
            .find_by_id(invite_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("invite".to_string()))?;

        if current.status != InviteStatus::Pending {
            return Err(TransitionError::Conflict(current.status));
        }
        if current.is_expired_at(occurred_at) {
            return Err(TransitionError::Expired(current.expires_at));
        }

        let mut changes = ActiveModel {
            status: Set(InviteStatus::Accepted),
            accepted_at: Set(Some(occurred_at.fixed_offset())),
            accepted_by: Set(Some(identity_id)),
            ..Default::default()
        };
        if current.target_email.is_none() && target_email.is_some() {
            changes.target_email = Set(target_email);
        }

        // The status predicate is the serialization point: of N racing
        // callers exactly one sees a row affected.
        let result = Entity::update_many()
            .set(changes)
            .filter(Column::Id.eq(invite_id))
            .filter(Column::Status.eq(InviteStatus::Pending))
            .exec(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        let updated = self
            .find_by_id(invite_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("invite".to_string()))?;

        if result.rows_affected == 0 {
            return Err(TransitionError::Conflict(updated.status));
        }

        Ok(updated)
    }

    async fn revoke_pending(
        &self,
        employee_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let pending: Vec<Uuid> = Entity::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::EmployeeId.eq(employee_id))
            .filter(Column::Status.eq(InviteStatus::Pending))
            .into_tuple()
            .all(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if pending.is_empty() {
            return Ok(pending);
        }

        Entity::update_many()
            .set(ActiveModel {
                status: Set(InviteStatus::Revoked),
                revoked_at: Set(Some(occurred_at.fixed_offset())),
                ..Default::default()
            })
            .filter(Column::Id.is_in(pending.clone()))
            .filter(Column::Status.eq(InviteStatus::Pending))
            .exec(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(pending)
    }

    async fn revoke_one(
        &self,
        invite_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = Entity::update_many()
            .set(ActiveModel {
                status: Set(InviteStatus::Revoked),
                revoked_at: Set(Some(occurred_at.fixed_offset())),
                ..Default::default()
            })
            .filter(Column::Id.eq(invite_id))
            .filter(Column::Status.eq(InviteStatus::Pending))
            .exec(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected == 1)
    }

    async fn list_for_employee(&self, employee_id: Uuid) -> Result<Vec<Model>, RepositoryError> {
        Entity::find()
            .filter(Column::EmployeeId.eq(employee_id))
            .order_by_desc(Column::IssuedAt)
            .all(&*self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
