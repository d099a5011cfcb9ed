//! # Invite Lifecycle Service
//!
//! Orchestrates issuance, validation, acceptance, revocation and regeneration
//! of company invites on top of the store traits in [`crate::repositories`]
//! and the [`IdentityProvider`].
//!
//! States: `pending -> accepted`, `pending -> revoked`, and the derived
//! `expired` (pending past `expires_at`, never written). Nothing leaves
//! `accepted` or `revoked`.
//!
//! The invite transition is the commit point of an acceptance. Writes that
//! happen before it are either idempotent (membership upsert, employee link
//! to the same identity) or compensated (identity creation in the new-account
//! flow). Every store and identity-provider call is bounded by the configured
//! store timeout and reported as [`InviteError::Transient`] when it expires;
//! the service never retries on its own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use regex::Regex;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{AppConfig, ConfigError};
use crate::crypto::{self, RawSecret};
use crate::identity::{Identity, IdentityProvider, normalize_email};
use crate::models::invite::{EffectiveInviteStatus, InviteStatus};
use crate::models::role::CompanyRole;
use crate::models::{employee::Model as EmployeeModel, invite::Model as InviteModel};
use crate::repositories::{
    CompanyDirectory, CompanyDirectoryRepository, InviteRepository, InviteStore, MembershipRepository,
    MembershipStore, NewInvite, NotificationRelay, NotificationRepository,
};

mod accept;
mod error;

#[cfg(test)]
mod tests;

pub use accept::{AcceptDisposition, AcceptOutcome, NextStep};
pub use error::InviteError;

/// Runtime policy derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct InvitePolicy {
    pub ttl: chrono::Duration,
    pub public_base_url: Url,
    pub min_credential_length: usize,
    pub store_timeout: Duration,
}

impl InvitePolicy {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let public_base_url =
            Url::parse(&config.public_base_url).map_err(|_| ConfigError::InvalidPublicBaseUrl {
                value: config.public_base_url.clone(),
            })?;

        Ok(Self {
            ttl: config.invite.ttl(),
            public_base_url,
            min_credential_length: config.invite.min_credential_length,
            store_timeout: config.invite.store_timeout(),
        })
    }
}

/// The stores the service composes.
#[derive(Clone)]
pub struct InviteStores {
    pub invites: Arc<dyn InviteStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub notifications: Arc<dyn NotificationRelay>,
    pub directory: Arc<dyn CompanyDirectory>,
}

impl InviteStores {
    /// SeaORM-backed stores sharing one pool.
    pub fn database(db: Arc<DatabaseConnection>) -> Self {
        Self {
            invites: Arc::new(InviteRepository::new(db.clone())),
            memberships: Arc::new(MembershipRepository::new(db.clone())),
            notifications: Arc::new(NotificationRepository::new(db.clone())),
            directory: Arc::new(CompanyDirectoryRepository::new(db)),
        }
    }
}

/// Read-only data shown on the public landing page for a valid invite.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InvitePreview {
    pub invite_id: Uuid,
    pub company_id: Uuid,
    pub company_name: String,
    pub employee_id: Uuid,
    pub employee_name: String,
    pub role: CompanyRole,
    pub target_email: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Administrator view of one invite. Never carries the lookup hash.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InviteSummary {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub role: CompanyRole,
    pub status: EffectiveInviteStatus,
    pub target_email: Option<String>,
    pub issued_by: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub accepted_by: Option<Uuid>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl InviteSummary {
    pub fn from_model(invite: &InviteModel, now: DateTime<Utc>) -> Self {
        Self {
            id: invite.id,
            company_id: invite.company_id,
            employee_id: invite.employee_id,
            role: invite.role,
            status: invite.effective_status(now),
            target_email: invite.target_email.clone(),
            issued_by: invite.issued_by,
            issued_at: invite.issued_at.with_timezone(&Utc),
            expires_at: invite.expires_at.with_timezone(&Utc),
            accepted_at: invite.accepted_at.map(|at| at.with_timezone(&Utc)),
            accepted_by: invite.accepted_by,
            revoked_at: invite.revoked_at.map(|at| at.with_timezone(&Utc)),
        }
    }
}

/// A freshly issued invite and the deep link carrying its secret.
///
/// This is the only place the raw secret ever appears.
#[derive(Clone, Serialize, ToSchema)]
pub struct IssuedInviteLink {
    pub invite: InviteSummary,
    pub accept_url: String,
    #[serde(skip)]
    secret: RawSecret,
}

impl IssuedInviteLink {
    pub fn secret(&self) -> &str {
        self.secret.expose()
    }
}

impl std::fmt::Debug for IssuedInviteLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedInviteLink")
            .field("invite", &self.invite)
            .field("accept_url", &"[REDACTED]")
            .finish()
    }
}

/// Result of a revoke call.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevokeOutcome {
    pub employee_id: Uuid,
    pub revoked_invite_ids: Vec<Uuid>,
}

/// A pending invite surfaced in the caller's inbox.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InboxEntry {
    pub notification_id: Uuid,
    pub invite_id: Uuid,
    pub company_id: Uuid,
    pub company_name: String,
    pub role: CompanyRole,
    pub expires_at: DateTime<Utc>,
    pub read: bool,
}

pub struct InviteService {
    stores: InviteStores,
    identity: Arc<dyn IdentityProvider>,
    policy: InvitePolicy,
    // Per-employee serialization of issue/regenerate/revoke.
    issue_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InviteService {
    pub fn new(stores: InviteStores, identity: Arc<dyn IdentityProvider>, policy: InvitePolicy) -> Self {
        Self {
            stores,
            identity,
            policy,
            issue_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &InvitePolicy {
        &self.policy
    }

    /// Issues a new invite for an employee, revoking any pending one.
    ///
    /// `role` defaults to the employee's normalized role.
    #[instrument(skip(self, caller), fields(caller_id = %caller.id))]
    pub async fn issue(
        &self,
        company_id: Uuid,
        employee_id: Uuid,
        role: Option<CompanyRole>,
        caller: &Identity,
    ) -> Result<IssuedInviteLink, InviteError> {
        let issuer_role = self.authorize_admin(company_id, caller).await?;
        let employee = self.load_employee(company_id, employee_id).await?;
        let role = role.unwrap_or_else(|| employee.normalized_role());

        self.issue_for(employee, role, issuer_role, caller.id).await
    }

    /// Same as [`InviteService::issue`] but keeps the role of the latest
    /// invite, so a resent link never changes what is being offered.
    #[instrument(skip(self, caller), fields(caller_id = %caller.id))]
    pub async fn regenerate(
        &self,
        company_id: Uuid,
        employee_id: Uuid,
        caller: &Identity,
    ) -> Result<IssuedInviteLink, InviteError> {
        let issuer_role = self.authorize_admin(company_id, caller).await?;
        let employee = self.load_employee(company_id, employee_id).await?;

        let previous = self
            .bounded("list_for_employee", self.stores.invites.list_for_employee(employee_id))
            .await?;
        let role = previous
            .first()
            .map(|invite| invite.role)
            .unwrap_or_else(|| employee.normalized_role());

        self.issue_for(employee, role, issuer_role, caller.id).await
    }

    async fn issue_for(
        &self,
        employee: EmployeeModel,
        role: CompanyRole,
        issuer_role: CompanyRole,
        issuer_id: Uuid,
    ) -> Result<IssuedInviteLink, InviteError> {
        if !issuer_role.can_grant(role) {
            return Err(InviteError::Forbidden);
        }
        if employee.identity_id.is_some() {
            return Err(InviteError::AlreadyAccepted);
        }

        let lock = self.employee_lock(employee.id).await;
        let guard = lock.lock().await;
        let result = self.issue_locked(&employee, role, issuer_id).await;
        drop(guard);
        self.release_employee_lock(employee.id, lock).await;

        result
    }

    async fn issue_locked(
        &self,
        employee: &EmployeeModel,
        role: CompanyRole,
        issuer_id: Uuid,
    ) -> Result<IssuedInviteLink, InviteError> {
        let now = Utc::now();
        let (secret, lookup_hash) = crypto::issue();
        let target_email = employee
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|email| !email.is_empty());

        let issued = self
            .bounded(
                "issue",
                self.stores.invites.issue(NewInvite {
                    company_id: employee.company_id,
                    employee_id: employee.id,
                    role,
                    target_email,
                    lookup_hash,
                    issued_by: issuer_id,
                    issued_at: now,
                    expires_at: now + self.policy.ttl,
                }),
            )
            .await?;

        self.bounded(
            "set_invitation_status",
            self.stores
                .directory
                .set_invitation_status(employee.id, InviteStatus::Pending, now),
        )
        .await?;

        for superseded in &issued.superseded {
            self.drop_notifications(*superseded).await;
        }
        self.notify_existing_identity(&issued.invite).await;

        counter!("invites_issued_total").increment(1);
        info!(
            invite_id = %issued.invite.id,
            employee_id = %employee.id,
            company_id = %employee.company_id,
            hash_prefix = issued.invite.hash_prefix(),
            superseded = issued.superseded.len(),
            "Invite issued"
        );

        Ok(IssuedInviteLink {
            invite: InviteSummary::from_model(&issued.invite, now),
            accept_url: deep_link(&self.policy.public_base_url, &secret),
            secret,
        })
    }

    /// Revokes every pending invite of the employee.
    #[instrument(skip(self, caller), fields(caller_id = %caller.id))]
    pub async fn revoke(
        &self,
        company_id: Uuid,
        employee_id: Uuid,
        caller: &Identity,
    ) -> Result<RevokeOutcome, InviteError> {
        self.authorize_admin(company_id, caller).await?;
        let employee = self.load_employee(company_id, employee_id).await?;

        let lock = self.employee_lock(employee.id).await;
        let guard = lock.lock().await;
        let result = self.revoke_locked(&employee).await;
        drop(guard);
        self.release_employee_lock(employee.id, lock).await;

        result
    }

    async fn revoke_locked(&self, employee: &EmployeeModel) -> Result<RevokeOutcome, InviteError> {
        let now = Utc::now();
        let revoked = self
            .bounded(
                "revoke_pending",
                self.stores.invites.revoke_pending(employee.id, now),
            )
            .await?;

        // Once linked, the membership governs access and the mirror stays.
        if employee.identity_id.is_none() {
            self.bounded(
                "set_invitation_status",
                self.stores
                    .directory
                    .set_invitation_status(employee.id, InviteStatus::Revoked, now),
            )
            .await?;
        }

        for invite_id in &revoked {
            self.drop_notifications(*invite_id).await;
        }

        counter!("invites_revoked_total").increment(revoked.len() as u64);
        info!(employee_id = %employee.id, revoked = revoked.len(), "Invites revoked");

        Ok(RevokeOutcome {
            employee_id: employee.id,
            revoked_invite_ids: revoked,
        })
    }

    /// Classifies a raw secret without side effects. Safe to call
    /// unauthenticated and repeatedly.
    #[instrument(skip_all)]
    pub async fn validate(&self, raw_secret: &str) -> Result<InvitePreview, InviteError> {
        let now = Utc::now();
        let invite = self.resolve_token(raw_secret).await?;
        classify(&invite, now)?;

        let company = self
            .bounded(
                "find_company",
                self.stores.directory.find_company(invite.company_id),
            )
            .await?
            .ok_or(InviteError::NotFound)?;
        let employee = self.load_employee(invite.company_id, invite.employee_id).await?;

        Ok(InvitePreview {
            invite_id: invite.id,
            company_id: company.id,
            company_name: company.name,
            employee_id: employee.id,
            employee_name: employee.display_name,
            role: invite.role,
            target_email: invite.target_email.clone(),
            expires_at: invite.expires_at.with_timezone(&Utc),
        })
    }

    /// Every invite ever issued for the employee, newest first.
    #[instrument(skip(self, caller), fields(caller_id = %caller.id))]
    pub async fn list_employee_invites(
        &self,
        company_id: Uuid,
        employee_id: Uuid,
        caller: &Identity,
    ) -> Result<Vec<InviteSummary>, InviteError> {
        self.authorize_admin(company_id, caller).await?;
        let employee = self.load_employee(company_id, employee_id).await?;

        let now = Utc::now();
        let invites = self
            .bounded(
                "list_for_employee",
                self.stores.invites.list_for_employee(employee.id),
            )
            .await?;

        Ok(invites
            .iter()
            .map(|invite| InviteSummary::from_model(invite, now))
            .collect())
    }

    /// Notifications of the caller that still point at an acceptable invite.
    #[instrument(skip_all, fields(caller_id = %caller.id))]
    pub async fn inbox(&self, caller: &Identity) -> Result<Vec<InboxEntry>, InviteError> {
        let now = Utc::now();
        let notifications = self
            .bounded(
                "list_for_recipient",
                self.stores.notifications.list_for_recipient(caller.id),
            )
            .await?;

        let mut company_names: HashMap<Uuid, String> = HashMap::new();
        let mut entries = Vec::with_capacity(notifications.len());

        for notification in notifications {
            let Some(invite) = self
                .bounded(
                    "find_invite",
                    self.stores.invites.find_by_id(notification.invite_id),
                )
                .await?
            else {
                continue;
            };
            if invite.effective_status(now) != EffectiveInviteStatus::Pending {
                continue;
            }

            let company_name = match company_names.get(&invite.company_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .bounded(
                            "find_company",
                            self.stores.directory.find_company(invite.company_id),
                        )
                        .await?
                        .map(|company| company.name)
                        .unwrap_or_default();
                    company_names.insert(invite.company_id, name.clone());
                    name
                }
            };

            entries.push(InboxEntry {
                notification_id: notification.id,
                invite_id: invite.id,
                company_id: invite.company_id,
                company_name,
                role: invite.role,
                expires_at: invite.expires_at.with_timezone(&Utc),
                read: notification.read_at.is_some(),
            });
        }

        Ok(entries)
    }

    /// Requires an active owner or admin membership in the company.
    pub async fn authorize_admin(
        &self,
        company_id: Uuid,
        caller: &Identity,
    ) -> Result<CompanyRole, InviteError> {
        let membership = self
            .bounded(
                "find_membership",
                self.stores.memberships.find(company_id, caller.id),
            )
            .await?;

        match membership {
            Some(membership) if membership.is_active() && membership.role.can_manage_invites() => {
                Ok(membership.role)
            }
            _ => {
                warn!(%company_id, caller_id = %caller.id, "Invite management denied");
                Err(InviteError::Forbidden)
            }
        }
    }

    async fn load_employee(&self, company_id: Uuid, employee_id: Uuid) -> Result<EmployeeModel, InviteError> {
        self.bounded(
            "find_employee",
            self.stores.directory.find_employee(employee_id),
        )
        .await?
        .filter(|employee| employee.company_id == company_id)
        .ok_or(InviteError::NotFound)
    }

    /// Looks an invite up by its raw secret. Implausible input never reaches
    /// the store.
    async fn resolve_token(&self, raw_secret: &str) -> Result<InviteModel, InviteError> {
        let raw_secret = raw_secret.trim();
        if !crypto::is_plausible_secret(raw_secret) {
            return Err(InviteError::NotFound);
        }

        let lookup_hash = crypto::hash(raw_secret);
        self.bounded(
            "find_by_lookup_hash",
            self.stores.invites.find_by_lookup_hash(&lookup_hash),
        )
        .await?
        .ok_or(InviteError::NotFound)
    }

    /// Creates an inbox entry when the invited address already has an account.
    async fn notify_existing_identity(&self, invite: &InviteModel) {
        let Some(email) = invite.target_email.as_deref() else {
            return;
        };

        let recipient = match self
            .bounded("find_identity", self.identity.find_identity_by_email(email))
            .await
        {
            Ok(Some(identity)) => identity,
            Ok(None) => return,
            Err(err) => {
                warn!(invite_id = %invite.id, error = %err, "Identity lookup for invite notification failed");
                return;
            }
        };

        if let Err(err) = self
            .bounded(
                "notify_invite",
                self.stores.notifications.notify_invite(recipient.id, invite),
            )
            .await
        {
            warn!(invite_id = %invite.id, error = %err, "Failed to create invite notification");
        }
    }

    async fn drop_notifications(&self, invite_id: Uuid) {
        if let Err(err) = self
            .bounded(
                "delete_notifications",
                self.stores.notifications.delete_all_for_invite(invite_id, None),
            )
            .await
        {
            warn!(%invite_id, error = %err, "Failed to delete notifications of a closed invite");
        }
    }

    async fn employee_lock(&self, employee_id: Uuid) -> Arc<Mutex<()>> {
        self.issue_locks
            .lock()
            .await
            .entry(employee_id)
            .or_default()
            .clone()
    }

    async fn release_employee_lock(&self, employee_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.issue_locks.lock().await;
        drop(lock);
        if locks
            .get(&employee_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(&employee_id);
        }
    }

    /// Runs a store or identity call under the configured timeout.
    async fn bounded<T, E, F>(&self, operation: &'static str, call: F) -> Result<T, InviteError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<InviteError>,
    {
        match tokio::time::timeout(self.policy.store_timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                counter!("invite_store_timeouts_total", "operation" => operation).increment(1);
                warn!(operation, timeout_ms = self.policy.store_timeout.as_millis() as u64, "Store call timed out");
                Err(InviteError::Transient(format!("{operation} timed out")))
            }
        }
    }
}

/// Maps an invite's state at `now` onto the acceptance taxonomy.
fn classify(invite: &InviteModel, now: DateTime<Utc>) -> Result<(), InviteError> {
    match invite.effective_status(now) {
        EffectiveInviteStatus::Pending => Ok(()),
        EffectiveInviteStatus::Accepted => Err(InviteError::AlreadyAccepted),
        EffectiveInviteStatus::Revoked => Err(InviteError::RevokedOrExpired),
        EffectiveInviteStatus::Expired => Err(InviteError::Expired),
    }
}

/// `<base>/invite/accept?token=<secret>`, keeping any path prefix of the base.
fn deep_link(base: &Url, secret: &RawSecret) -> String {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend(["invite", "accept"]);
    }
    url.query_pairs_mut().append_pair("token", secret.expose());
    url.into()
}

fn is_valid_email(email: &str) -> bool {
    static EMAIL_SHAPE: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_SHAPE
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
        .is_some_and(|shape| shape.is_match(email))
}
