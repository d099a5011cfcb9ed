//! # Data Models
//!
//! SeaORM entities for the invite flow plus a few small API-facing types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod company;
pub mod employee;
pub mod identity;
pub mod invite;
pub mod membership;
pub mod notification;
pub mod role;
pub mod session;

pub use company::Entity as Company;
pub use employee::Entity as Employee;
pub use identity::Entity as Identity;
pub use invite::Entity as Invite;
pub use membership::Entity as Membership;
pub use notification::Entity as Notification;
pub use role::CompanyRole;
pub use session::Entity as Session;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "invites".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
