//! Acceptance flows: with an existing session, with a new account, and via
//! an inbox notification.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{InviteError, InviteService, classify, is_valid_email};
use crate::identity::{Identity, normalize_email};
use crate::models::invite::{EffectiveInviteStatus, InviteStatus, Model as InviteModel};
use crate::models::membership::MembershipStatus;

/// How an acceptance call concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AcceptDisposition {
    /// This call moved the invite to `accepted`.
    Accepted,
    /// The caller had already accepted this invite; nothing changed.
    AlreadyAccepted,
}

/// What the client should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    /// The current session already carries the membership.
    Continue,
    /// A new account was created; sign in with the new credential.
    SignIn,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AcceptOutcome {
    pub invite_id: Uuid,
    pub employee_id: Uuid,
    pub company_id: Uuid,
    pub identity_id: Uuid,
    pub disposition: AcceptDisposition,
    pub next_step: NextStep,
}

impl InviteService {
    /// Accepts an invite by raw secret.
    ///
    /// With a `caller` session the session's identity is linked. Without one a
    /// new account is created from `email` and `credential`.
    #[instrument(skip_all, fields(has_session = caller.is_some()))]
    pub async fn accept(
        &self,
        raw_secret: &str,
        caller: Option<&Identity>,
        email: Option<&str>,
        credential: Option<&str>,
    ) -> Result<AcceptOutcome, InviteError> {
        let now = Utc::now();
        let result = match self.resolve_token(raw_secret).await {
            Ok(invite) => match caller {
                Some(caller) => self.accept_with_session(invite, caller, None, now).await,
                None => self.accept_new_account(invite, email, credential, now).await,
            },
            Err(err) => Err(err),
        };

        record_rejection(&result);
        result
    }

    /// Accepts the invite referenced by one of the caller's notifications.
    #[instrument(skip(self, caller))]
    pub async fn accept_by_notification(
        &self,
        notification_id: Uuid,
        caller: Option<&Identity>,
    ) -> Result<AcceptOutcome, InviteError> {
        let now = Utc::now();
        let result = async {
            let caller = caller.ok_or(InviteError::Unauthenticated)?;
            let invite = self.resolve_notification(notification_id, caller).await?;
            self.accept_with_session(invite, caller, Some(notification_id), now)
                .await
        }
        .await;

        record_rejection(&result);
        result
    }

    /// Declines the invite referenced by one of the caller's notifications.
    /// A still-pending invite is revoked.
    #[instrument(skip(self, caller))]
    pub async fn decline_by_notification(
        &self,
        notification_id: Uuid,
        caller: Option<&Identity>,
    ) -> Result<(), InviteError> {
        let caller = caller.ok_or(InviteError::Unauthenticated)?;
        let invite = self.resolve_notification(notification_id, caller).await?;
        if invite.status == InviteStatus::Accepted {
            return Err(InviteError::AlreadyAccepted);
        }

        let now = Utc::now();
        let revoked = self
            .bounded("revoke_one", self.stores.invites.revoke_one(invite.id, now))
            .await?;

        if revoked {
            let employee = self
                .bounded(
                    "find_employee",
                    self.stores.directory.find_employee(invite.employee_id),
                )
                .await?;
            if employee.is_some_and(|employee| employee.identity_id.is_none()) {
                self.bounded(
                    "set_invitation_status",
                    self.stores.directory.set_invitation_status(
                        invite.employee_id,
                        InviteStatus::Revoked,
                        now,
                    ),
                )
                .await?;
            }
            counter!("invites_revoked_total").increment(1);
        }

        if let Err(err) = self
            .bounded(
                "mark_read",
                self.stores.notifications.mark_read(notification_id, caller.id, now),
            )
            .await
        {
            warn!(%notification_id, error = %err, "Failed to mark declined notification read");
        }
        if let Err(err) = self
            .bounded(
                "delete_notifications",
                self.stores
                    .notifications
                    .delete_all_for_invite(invite.id, Some(caller.id)),
            )
            .await
        {
            warn!(invite_id = %invite.id, error = %err, "Failed to delete other notification copies");
        }

        info!(invite_id = %invite.id, revoked, "Invite declined");
        Ok(())
    }

    async fn resolve_notification(
        &self,
        notification_id: Uuid,
        caller: &Identity,
    ) -> Result<InviteModel, InviteError> {
        // Someone else's notification is indistinguishable from a missing one.
        let notification = self
            .bounded(
                "find_notification",
                self.stores.notifications.find(notification_id),
            )
            .await?
            .filter(|notification| notification.recipient_id == caller.id)
            .ok_or(InviteError::NotFound)?;

        self.bounded(
            "find_invite",
            self.stores.invites.find_by_id(notification.invite_id),
        )
        .await?
        .ok_or(InviteError::NotFound)
    }

    /// Flow for a caller that already has a session.
    async fn accept_with_session(
        &self,
        invite: InviteModel,
        caller: &Identity,
        notification_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome, InviteError> {
        if invite.effective_status(now) == EffectiveInviteStatus::Accepted
            && invite.accepted_by == Some(caller.id)
        {
            return self.replay(invite, caller).await;
        }
        classify(&invite, now)?;

        let employee = self
            .load_employee(invite.company_id, invite.employee_id)
            .await?;

        let caller_email = normalize_email(&caller.email);
        let canonical = invite
            .target_email
            .as_deref()
            .or(employee.email.as_deref())
            .map(normalize_email)
            .filter(|email| !email.is_empty())
            .unwrap_or_else(|| caller_email.clone());
        if !is_valid_email(&canonical) {
            return Err(InviteError::InvalidEmail);
        }
        if caller_email != canonical {
            warn!(invite_id = %invite.id, caller_id = %caller.id, "Invite accepted from a different account");
            return Err(InviteError::WrongAccount);
        }

        if employee
            .identity_id
            .is_some_and(|linked| linked != caller.id)
        {
            return Err(InviteError::AlreadyAccepted);
        }

        let linked = self
            .bounded(
                "link_identity",
                self.stores.directory.link_identity(
                    employee.id,
                    caller.id,
                    Some(canonical.clone()),
                    now,
                ),
            )
            .await?;
        if !linked {
            return Err(InviteError::AlreadyAccepted);
        }

        self.bounded(
            "upsert_membership",
            self.stores.memberships.upsert(
                invite.company_id,
                caller.id,
                invite.role,
                MembershipStatus::Active,
            ),
        )
        .await?;

        // Commit point. A loser of a concurrent race still reports the
        // conflict; its link and membership writes duplicate the winner's.
        let accepted = self
            .bounded(
                "transition_to_accepted",
                self.stores.invites.transition_to_accepted(
                    invite.id,
                    caller.id,
                    Some(canonical),
                    now,
                ),
            )
            .await?;

        self.reconcile(&accepted, caller.id, notification_id, now)
            .await;

        counter!("invites_accepted_total", "flow" => "session").increment(1);
        info!(
            invite_id = %accepted.id,
            employee_id = %accepted.employee_id,
            company_id = %accepted.company_id,
            identity_id = %caller.id,
            "Invite accepted"
        );

        Ok(AcceptOutcome {
            invite_id: accepted.id,
            employee_id: accepted.employee_id,
            company_id: accepted.company_id,
            identity_id: caller.id,
            disposition: AcceptDisposition::Accepted,
            next_step: NextStep::Continue,
        })
    }

    /// Repeat acceptance by the identity that already accepted: re-run the
    /// idempotent membership upsert and report success.
    async fn replay(
        &self,
        invite: InviteModel,
        caller: &Identity,
    ) -> Result<AcceptOutcome, InviteError> {
        self.bounded(
            "upsert_membership",
            self.stores.memberships.upsert(
                invite.company_id,
                caller.id,
                invite.role,
                MembershipStatus::Active,
            ),
        )
        .await?;

        info!(invite_id = %invite.id, identity_id = %caller.id, "Invite acceptance replayed");

        Ok(AcceptOutcome {
            invite_id: invite.id,
            employee_id: invite.employee_id,
            company_id: invite.company_id,
            identity_id: caller.id,
            disposition: AcceptDisposition::AlreadyAccepted,
            next_step: NextStep::Continue,
        })
    }

    /// Flow for a caller without a session: create the account, then accept.
    async fn accept_new_account(
        &self,
        invite: InviteModel,
        email: Option<&str>,
        credential: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome, InviteError> {
        classify(&invite, now)?;
        let credential = credential.ok_or(InviteError::Unauthenticated)?;

        let employee = self
            .load_employee(invite.company_id, invite.employee_id)
            .await?;

        let stored = invite
            .target_email
            .as_deref()
            .or(employee.email.as_deref())
            .map(normalize_email)
            .filter(|email| !email.is_empty());
        let supplied = email.map(normalize_email).filter(|email| !email.is_empty());
        let canonical = match (stored, supplied) {
            (Some(stored), Some(supplied)) if stored != supplied => {
                return Err(InviteError::WrongAccount);
            }
            (Some(email), _) | (None, Some(email)) => email,
            (None, None) => return Err(InviteError::InvalidEmail),
        };
        if !is_valid_email(&canonical) {
            return Err(InviteError::InvalidEmail);
        }

        let min_length = self.policy.min_credential_length;
        if credential.chars().count() < min_length {
            return Err(InviteError::WeakCredential { min_length });
        }

        if employee.identity_id.is_some() {
            return Err(InviteError::AlreadyAccepted);
        }
        let filled_email = employee
            .email
            .as_deref()
            .map(str::trim)
            .is_none_or(str::is_empty)
            .then(|| canonical.clone());

        let identity = self
            .bounded(
                "create_identity",
                self.identity.create_identity(&canonical, credential),
            )
            .await?;

        match self
            .bounded(
                "link_identity",
                self.stores.directory.link_identity(
                    employee.id,
                    identity.id,
                    Some(canonical.clone()),
                    now,
                ),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Err(self
                    .compensate(identity.id, None, InviteError::AlreadyAccepted, now)
                    .await);
            }
            Err(err) => return Err(self.compensate(identity.id, None, err, now).await),
        }

        let accepted = match self
            .bounded(
                "transition_to_accepted",
                self.stores.invites.transition_to_accepted(
                    invite.id,
                    identity.id,
                    Some(canonical),
                    now,
                ),
            )
            .await
        {
            Ok(accepted) => accepted,
            Err(err) => {
                return Err(self
                    .compensate(identity.id, Some((employee.id, filled_email)), err, now)
                    .await);
            }
        };

        // Past the commit point; a failure here is recovered by signing in
        // and replaying the acceptance.
        self.bounded(
            "upsert_membership",
            self.stores.memberships.upsert(
                accepted.company_id,
                identity.id,
                accepted.role,
                MembershipStatus::Active,
            ),
        )
        .await?;

        self.reconcile(&accepted, identity.id, None, now).await;

        counter!("invites_accepted_total", "flow" => "new_account").increment(1);
        info!(
            invite_id = %accepted.id,
            employee_id = %accepted.employee_id,
            company_id = %accepted.company_id,
            identity_id = %identity.id,
            "Invite accepted with new account"
        );

        Ok(AcceptOutcome {
            invite_id: accepted.id,
            employee_id: accepted.employee_id,
            company_id: accepted.company_id,
            identity_id: identity.id,
            disposition: AcceptDisposition::Accepted,
            next_step: NextStep::SignIn,
        })
    }

    /// Undoes a half-finished new-account acceptance. Returns the error to
    /// surface: the original one, or `CompensationFailed` wrapping it.
    async fn compensate(
        &self,
        identity_id: Uuid,
        linked_employee: Option<(Uuid, Option<String>)>,
        original: InviteError,
        now: DateTime<Utc>,
    ) -> InviteError {
        let mut failures = Vec::new();

        if let Some((employee_id, filled_email)) = linked_employee
            && let Err(err) = self
                .bounded(
                    "unlink_identity",
                    self.stores.directory.unlink_identity(
                        employee_id,
                        identity_id,
                        filled_email,
                        now,
                    ),
                )
                .await
        {
            failures.push(format!("unlink employee {employee_id}: {err}"));
        }

        if let Err(err) = self
            .bounded("delete_identity", self.identity.delete_identity(identity_id))
            .await
        {
            failures.push(format!("delete identity {identity_id}: {err}"));
        }

        if failures.is_empty() {
            counter!("invite_compensations_total", "outcome" => "succeeded").increment(1);
            warn!(%identity_id, error = %original, "New-account acceptance rolled back");
            return original;
        }

        counter!("invite_compensations_total", "outcome" => "failed").increment(1);
        let detail = failures.join("; ");
        error!(
            %identity_id,
            error = %original,
            compensation = %detail,
            "New-account acceptance left partially applied"
        );
        InviteError::CompensationFailed {
            original: Box::new(original),
            detail,
        }
    }

    /// Post-commit cleanup. Failures are logged and never change the outcome.
    async fn reconcile(
        &self,
        accepted: &InviteModel,
        recipient_id: Uuid,
        notification_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) {
        let marked = match notification_id {
            Some(notification_id) => self
                .bounded(
                    "mark_read",
                    self.stores.notifications.mark_read(notification_id, recipient_id, now),
                )
                .await
                .map(u64::from),
            None => {
                self.bounded(
                    "mark_read_for_invite",
                    self.stores
                        .notifications
                        .mark_read_for_invite(accepted.id, recipient_id, now),
                )
                .await
            }
        };
        if let Err(err) = marked {
            warn!(invite_id = %accepted.id, error = %err, "Failed to mark invite notification read");
        }

        if let Err(err) = self
            .bounded(
                "delete_notifications",
                self.stores
                    .notifications
                    .delete_all_for_invite(accepted.id, Some(recipient_id)),
            )
            .await
        {
            warn!(invite_id = %accepted.id, error = %err, "Failed to delete other notification copies");
        }

        match self
            .bounded(
                "revoke_pending",
                self.stores.invites.revoke_pending(accepted.employee_id, now),
            )
            .await
        {
            Ok(revoked) => {
                for invite_id in revoked {
                    self.drop_notifications(invite_id).await;
                }
            }
            Err(err) => {
                warn!(employee_id = %accepted.employee_id, error = %err, "Failed to revoke sibling invites");
            }
        }
    }
}

fn record_rejection<T>(result: &Result<T, InviteError>) {
    if let Err(err) = result {
        counter!("invite_accept_rejected_total", "reason" => err.reason()).increment(1);
    }
}
