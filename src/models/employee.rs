//! Employee entity model
//!
//! The company-side profile an invite grants access to. Only the identity
//! link, email and invitation-status mirror are written by the invite flow.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use super::invite::InviteStatus;
use super::role::CompanyRole;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "employees")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub company_id: Uuid,

    pub display_name: String,

    /// Contact email; may be filled in from the accepting identity.
    pub email: Option<String>,

    /// Role as entered by the wider application (free-form, see [`CompanyRole::normalize`]).
    pub role: String,

    /// Linked identity, set once on acceptance.
    pub identity_id: Option<Uuid>,

    /// Denormalized copy of the latest invite status for cheap display.
    pub invitation_status: Option<InviteStatus>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn normalized_role(&self) -> CompanyRole {
        CompanyRole::normalize(&self.role)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::company::Entity",
        from = "Column::CompanyId",
        to = "super::company::Column::Id"
    )]
    Company,

    #[sea_orm(has_many = "super::invite::Entity")]
    Invite,
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Company.def()
    }
}

impl Related<super::invite::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invite.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
