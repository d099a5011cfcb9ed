//! # Membership Repository
//!
//! SeaORM implementation of [`MembershipStore`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait, Set, sea_query::OnConflict};
use uuid::Uuid;

use super::MembershipStore;
use crate::error::RepositoryError;
use crate::models::membership::{ActiveModel, Column, Entity, MembershipStatus, Model};
use crate::models::role::CompanyRole;

/// Repository for membership database operations
#[derive(Clone)]
pub struct MembershipRepository {
    db: Arc<DatabaseConnection>,
}

impl MembershipRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Sets role and status unconditionally. Operator tooling only; the invite
    /// flow goes through [`MembershipStore::upsert`], which never changes a role.
    pub async fn grant(
        &self,
        company_id: Uuid,
        identity_id: Uuid,
        role: CompanyRole,
    ) -> Result<Model, RepositoryError> {
        self.write(
            company_id,
            identity_id,
            role,
            MembershipStatus::Active,
            OnConflict::columns([Column::CompanyId, Column::IdentityId])
                .update_columns([Column::Role, Column::Status, Column::UpdatedAt])
                .to_owned(),
        )
        .await
    }

    async fn write(
        &self,
        company_id: Uuid,
        identity_id: Uuid,
        role: CompanyRole,
        status: MembershipStatus,
        on_conflict: OnConflict,
    ) -> Result<Model, RepositoryError> {
        let now = Utc::now().fixed_offset();
        let row = ActiveModel {
            company_id: Set(company_id),
            identity_id: Set(identity_id),
            role: Set(role),
            status: Set(status),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Entity::insert(row)
            .on_conflict(on_conflict)
            .exec_without_returning(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        self.find(company_id, identity_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("membership".to_string()))
    }
}

#[async_trait]
impl MembershipStore for MembershipRepository {
    async fn upsert(
        &self,
        company_id: Uuid,
        identity_id: Uuid,
        role: CompanyRole,
        status: MembershipStatus,
    ) -> Result<Model, RepositoryError> {
        self.write(
            company_id,
            identity_id,
            role,
            status,
            OnConflict::columns([Column::CompanyId, Column::IdentityId])
                .update_columns([Column::Status, Column::UpdatedAt])
                .to_owned(),
        )
        .await
    }

    async fn find(
        &self,
        company_id: Uuid,
        identity_id: Uuid,
    ) -> Result<Option<Model>, RepositoryError> {
        Entity::find_by_id((company_id, identity_id))
            .one(&*self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
