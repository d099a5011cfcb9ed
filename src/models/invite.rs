//! Invite entity model
//!
//! One offer of company membership to one employee record. Rows are never
//! deleted; `status` only moves from `pending` to `accepted` or `revoked`.
//! Expiry is derived at read time from `expires_at` and never stored.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::role::CompanyRole;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "invites")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub company_id: Uuid,

    pub employee_id: Uuid,

    pub role: CompanyRole,

    /// Email the invite is addressed to, if known at issuance.
    pub target_email: Option<String>,

    /// SHA-256 hex digest of the invite secret.
    #[sea_orm(unique)]
    pub lookup_hash: String,

    pub status: InviteStatus,

    pub issued_by: Uuid,

    pub issued_at: DateTimeWithTimeZone,

    pub expires_at: DateTimeWithTimeZone,

    pub accepted_at: Option<DateTimeWithTimeZone>,

    pub accepted_by: Option<Uuid>,

    pub revoked_at: Option<DateTimeWithTimeZone>,
}

/// Stored invite status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum InviteStatus {
    #[sea_orm(string_value = "pending")]
    #[serde(rename = "pending")]
    #[default]
    Pending,

    #[sea_orm(string_value = "accepted")]
    #[serde(rename = "accepted")]
    Accepted,

    #[sea_orm(string_value = "revoked")]
    #[serde(rename = "revoked")]
    Revoked,
}

impl std::fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Revoked => "revoked",
        })
    }
}

/// Status as observed at a point in time, including the derived `expired` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveInviteStatus {
    Pending,
    Accepted,
    Revoked,
    Expired,
}

impl Model {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at.with_timezone(&Utc)
    }

    /// Revoked and accepted are terminal and win over expiry; only a pending
    /// invite can read as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveInviteStatus {
        match self.status {
            InviteStatus::Accepted => EffectiveInviteStatus::Accepted,
            InviteStatus::Revoked => EffectiveInviteStatus::Revoked,
            InviteStatus::Pending if self.is_expired_at(now) => EffectiveInviteStatus::Expired,
            InviteStatus::Pending => EffectiveInviteStatus::Pending,
        }
    }

    /// Short, non-reversible prefix of the lookup hash for log correlation.
    pub fn hash_prefix(&self) -> &str {
        self.lookup_hash.get(..8).unwrap_or(&self.lookup_hash)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::employee::Entity",
        from = "Column::EmployeeId",
        to = "super::employee::Column::Id"
    )]
    Employee,

    #[sea_orm(
        belongs_to = "super::company::Entity",
        from = "Column::CompanyId",
        to = "super::company::Column::Id"
    )]
    Company,
}

impl Related<super::employee::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Employee.def()
    }
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Company.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
