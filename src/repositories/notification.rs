//! # Notification Repository
//!
//! SeaORM implementation of [`NotificationRelay`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::NotificationRelay;
use crate::error::RepositoryError;
use crate::models::invite;
use crate::models::notification::{ActiveModel, Column, Entity, Model, NotificationKind};

/// Repository for notification database operations
#[derive(Clone)]
pub struct NotificationRepository {
    db: Arc<DatabaseConnection>,
}

impl NotificationRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationRelay for NotificationRepository {
    async fn notify_invite(
        &self,
        recipient_id: Uuid,
        invite: &invite::Model,
    ) -> Result<Model, RepositoryError> {
        let existing = Entity::find()
            .filter(Column::RecipientId.eq(recipient_id))
            .filter(Column::InviteId.eq(invite.id))
            .one(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if let Some(existing) = existing {
            return Ok(existing);
        }

        ActiveModel {
            id: Set(Uuid::new_v4()),
            recipient_id: Set(recipient_id),
            kind: Set(NotificationKind::CompanyInvite),
            invite_id: Set(invite.id),
            company_id: Set(invite.company_id),
            read_at: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
        }
        .insert(&*self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    async fn find(&self, notification_id: Uuid) -> Result<Option<Model>, RepositoryError> {
        Entity::find_by_id(notification_id)
            .one(&*self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    async fn mark_read(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = Entity::update_many()
            .set(ActiveModel {
                read_at: Set(Some(occurred_at.fixed_offset())),
                ..Default::default()
            })
            .filter(Column::Id.eq(notification_id))
            .filter(Column::RecipientId.eq(recipient_id))
            .filter(Column::ReadAt.is_null())
            .exec(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected > 0)
    }

    async fn mark_read_for_invite(
        &self,
        invite_id: Uuid,
        recipient_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = Entity::update_many()
            .set(ActiveModel {
                read_at: Set(Some(occurred_at.fixed_offset())),
                ..Default::default()
            })
            .filter(Column::InviteId.eq(invite_id))
            .filter(Column::RecipientId.eq(recipient_id))
            .filter(Column::ReadAt.is_null())
            .exec(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected)
    }

    async fn delete_all_for_invite(
        &self,
        invite_id: Uuid,
        except_recipient_id: Option<Uuid>,
    ) -> Result<u64, RepositoryError> {
        let mut query = Entity::delete_many().filter(Column::InviteId.eq(invite_id));
        if let Some(keep) = except_recipient_id {
            query = query.filter(Column::RecipientId.ne(keep));
        }

        let result = query
            .exec(&*self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected)
    }

    async fn list_for_recipient(&self, recipient_id: Uuid) -> Result<Vec<Model>, RepositoryError> {
        Entity::find()
            .filter(Column::RecipientId.eq(recipient_id))
            .order_by_desc(Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
