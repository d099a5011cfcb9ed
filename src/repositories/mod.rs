//! # Repository Layer
//!
//! Store contracts used by the invite lifecycle service and their SeaORM
//! implementations. The service only sees the traits, so tests can wrap a
//! real store to inject failures or latency.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::crypto::LookupHash;
use crate::error::RepositoryError;
use crate::models::{
    company::Model as CompanyModel, employee::Model as EmployeeModel, invite::InviteStatus,
    invite::Model as InviteModel, membership::MembershipStatus,
    membership::Model as MembershipModel, notification::Model as NotificationModel,
    role::CompanyRole,
};

pub mod company_directory;
pub mod invite;
pub mod membership;
pub mod notification;

pub use company_directory::CompanyDirectoryRepository;
pub use invite::{InviteRepository, TransitionError};
pub use membership::MembershipRepository;
pub use notification::NotificationRepository;

/// Everything needed to persist a freshly issued invite.
#[derive(Debug, Clone)]
pub struct NewInvite {
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub role: CompanyRole,
    pub target_email: Option<String>,
    pub lookup_hash: LookupHash,
    pub issued_by: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of [`InviteStore::issue`]: the new invite plus the ids of the
/// pending invites it superseded.
#[derive(Debug, Clone)]
pub struct IssuedInvite {
    pub invite: InviteModel,
    pub superseded: Vec<Uuid>,
}

/// Persistence for invite records.
#[async_trait]
pub trait InviteStore: Send + Sync {
    /// Inserts a pending invite and revokes every other pending invite of the
    /// same employee in one transaction, serialized per employee.
    async fn issue(&self, new_invite: NewInvite) -> Result<IssuedInvite, RepositoryError>;

    async fn find_by_lookup_hash(
        &self,
        lookup_hash: &LookupHash,
    ) -> Result<Option<InviteModel>, RepositoryError>;

    async fn find_by_id(&self, invite_id: Uuid) -> Result<Option<InviteModel>, RepositoryError>;

    /// Compare-and-swap `pending -> accepted`. `target_email` only fills an
    /// empty email column.
    async fn transition_to_accepted(
        &self,
        invite_id: Uuid,
        identity_id: Uuid,
        target_email: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<InviteModel, TransitionError>;

    /// Revokes all pending invites for the employee, returning their ids.
    async fn revoke_pending(
        &self,
        employee_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, RepositoryError>;

    /// Revokes one invite if it is still pending.
    async fn revoke_one(
        &self,
        invite_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Newest first.
    async fn list_for_employee(
        &self,
        employee_id: Uuid,
    ) -> Result<Vec<InviteModel>, RepositoryError>;
}

/// Persistence for company memberships.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Insert-or-update keyed by (company, identity). An existing row keeps
    /// its role; only status and `updated_at` are refreshed.
    async fn upsert(
        &self,
        company_id: Uuid,
        identity_id: Uuid,
        role: CompanyRole,
        status: MembershipStatus,
    ) -> Result<MembershipModel, RepositoryError>;

    async fn find(
        &self,
        company_id: Uuid,
        identity_id: Uuid,
    ) -> Result<Option<MembershipModel>, RepositoryError>;
}

/// Inbox of pending-invite notifications.
#[async_trait]
pub trait NotificationRelay: Send + Sync {
    /// Creates a `company_invite` notification unless the recipient already
    /// has one for this invite.
    async fn notify_invite(
        &self,
        recipient_id: Uuid,
        invite: &InviteModel,
    ) -> Result<NotificationModel, RepositoryError>;

    async fn find(
        &self,
        notification_id: Uuid,
    ) -> Result<Option<NotificationModel>, RepositoryError>;

    async fn mark_read(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Marks every copy the recipient holds for `invite_id` as read.
    async fn mark_read_for_invite(
        &self,
        invite_id: Uuid,
        recipient_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Deletes every notification for the invite except those addressed to
    /// `except_recipient_id` (all of them when `None`).
    async fn delete_all_for_invite(
        &self,
        invite_id: Uuid,
        except_recipient_id: Option<Uuid>,
    ) -> Result<u64, RepositoryError>;

    /// Newest first.
    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
    ) -> Result<Vec<NotificationModel>, RepositoryError>;
}

/// Read access to companies and employees, plus the employee fields the
/// invite flow owns.
#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    async fn find_company(&self, company_id: Uuid)
    -> Result<Option<CompanyModel>, RepositoryError>;

    async fn find_employee(
        &self,
        employee_id: Uuid,
    ) -> Result<Option<EmployeeModel>, RepositoryError>;

    /// Links the employee to `identity_id` unless it is linked to someone
    /// else; sets the mirror to `accepted` and fills an empty email.
    /// Returns `false` when another identity holds the link.
    async fn link_identity(
        &self,
        employee_id: Uuid,
        identity_id: Uuid,
        email: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Undoes [`CompanyDirectory::link_identity`] for exactly that identity.
    /// `filled_email` is the address the link wrote into an empty email; it
    /// is cleared again while the employee still carries it.
    async fn unlink_identity(
        &self,
        employee_id: Uuid,
        identity_id: Uuid,
        filled_email: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn set_invitation_status(
        &self,
        employee_id: Uuid,
        status: InviteStatus,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}
