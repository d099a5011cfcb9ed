//! # Company Directory Repository
//!
//! Reads companies and employees, and writes the three employee fields the
//! invite flow owns: identity link, email and invitation-status mirror.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, Set,
    sea_query::Expr,
};
use uuid::Uuid;

use super::CompanyDirectory;
use crate::error::RepositoryError;
use crate::models::invite::InviteStatus;
use crate::models::{company, employee};

/// Repository for company and employee lookups
#[derive(Clone)]
pub struct CompanyDirectoryRepository {
    db: Arc<DatabaseConnection>,
}

impl CompanyDirectoryRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CompanyDirectory for CompanyDirectoryRepository {
    async fn find_company(
        &self,
        company_id: Uuid,
    ) -> Result<Option<company::Model>, RepositoryError> {
        company::Entity::find_by_id(company_id)
            .one(&*self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    async fn find_employee(
        &self,
        employee_id: Uuid,
    ) -> Result<Option<employee::Model>, RepositoryError> {
        employee::Entity::find_by_id(employee_id)
            .one(&*self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    async fn link_identity(
        &self,
        employee_id: Uuid,
        identity_id: Uuid,
        email: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let linked = employee::Entity::update_many()
            .set(employee::ActiveModel {
                identity_id: Set(Some(identity_id)),
                invitation_status: Set(Some(InviteStatus::Accepted)),
                updated_at: Set(occurred_at.fixed_offset()),
                ..Default::default()
            })
            .filter(employee::Column::Id.eq(employee_id))
            .filter(
                Condition::any()
                    .add(employee::Column::IdentityId.is_null())
                    .add(employee::Column::IdentityId.eq(identity_id)),
            )
            .exec(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if linked.rows_affected == 0 {
            return Ok(false);
        }

        if let Some(email) = email {
            employee::Entity::update_many()
                .col_expr(employee::Column::Email, Expr::value(email))
                .filter(employee::Column::Id.eq(employee_id))
                .filter(employee::Column::Email.is_null())
                .exec(&*self.db)
                .await
                .map_err(RepositoryError::database_error)?;
        }

        Ok(true)
    }

    async fn unlink_identity(
        &self,
        employee_id: Uuid,
        identity_id: Uuid,
        filled_email: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = employee::Entity::update_many()
            .set(employee::ActiveModel {
                identity_id: Set(None),
                invitation_status: Set(Some(InviteStatus::Pending)),
                updated_at: Set(occurred_at.fixed_offset()),
                ..Default::default()
            })
            .filter(employee::Column::Id.eq(employee_id))
            .filter(employee::Column::IdentityId.eq(identity_id))
            .exec(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Ok(false);
        }

        if let Some(email) = filled_email {
            employee::Entity::update_many()
                .col_expr(employee::Column::Email, Expr::value(Option::<String>::None))
                .filter(employee::Column::Id.eq(employee_id))
                .filter(employee::Column::Email.eq(email))
                .exec(&*self.db)
                .await
                .map_err(RepositoryError::database_error)?;
        }

        Ok(true)
    }

    async fn set_invitation_status(
        &self,
        employee_id: Uuid,
        status: InviteStatus,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = employee::Entity::update_many()
            .set(employee::ActiveModel {
                invitation_status: Set(Some(status)),
                updated_at: Set(occurred_at.fixed_offset()),
                ..Default::default()
            })
            .filter(employee::Column::Id.eq(employee_id))
            .exec(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound("employee".to_string()));
        }
        Ok(())
    }
}
