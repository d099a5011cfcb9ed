//! Company roles shared by invites and memberships.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum CompanyRole {
    #[sea_orm(string_value = "owner")]
    #[serde(rename = "owner")]
    Owner,

    #[sea_orm(string_value = "admin")]
    #[serde(rename = "admin")]
    Admin,

    #[sea_orm(string_value = "member")]
    #[serde(rename = "member")]
    #[default]
    Member,
}

impl CompanyRole {
    /// Maps a free-form role string (as stored on employee records) onto a
    /// company role. Unknown or empty values become `Member`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "owner" => Self::Owner,
            "admin" | "administrator" => Self::Admin,
            _ => Self::Member,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Owner => 3,
            Self::Admin => 2,
            Self::Member => 1,
        }
    }

    /// Owners and admins may manage invites.
    pub fn can_manage_invites(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }

    /// Whether a holder of `self` may grant `other` to someone else.
    pub fn can_grant(&self, other: CompanyRole) -> bool {
        self.can_manage_invites() && self.rank() >= other.rank()
    }
}

impl std::fmt::Display for CompanyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
