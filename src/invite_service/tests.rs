use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set, Statement,
};
use url::Url;
use uuid::Uuid;

use super::*;
use crate::crypto::LookupHash;
use crate::error::RepositoryError;
use crate::identity::{DatabaseIdentityProvider, IdentityError, IssuedSession};
use crate::models::{company, employee, invite, membership, notification};
use crate::repositories::{IssuedInvite, TransitionError};

const CREDENTIAL: &str = "correct-horse-battery";

struct Harness {
    db: Arc<DatabaseConnection>,
    service: Arc<InviteService>,
    identity: Arc<DatabaseIdentityProvider>,
    company_id: Uuid,
    owner: Identity,
}

fn policy() -> InvitePolicy {
    InvitePolicy {
        ttl: Duration::days(7),
        public_base_url: Url::parse("https://app.example.test").unwrap(),
        min_credential_length: 8,
        store_timeout: StdDuration::from_secs(5),
    }
}

async fn setup_db() -> Arc<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await
    .unwrap();
    Arc::new(db)
}

async fn harness() -> Harness {
    harness_with(|stores, identity| (stores, identity), policy()).await
}

/// Builds a service over a fresh database, letting the test wrap the stores
/// or the identity provider to inject faults.
async fn harness_with<F>(wrap: F, policy: InvitePolicy) -> Harness
where
    F: FnOnce(InviteStores, Arc<dyn IdentityProvider>) -> (InviteStores, Arc<dyn IdentityProvider>),
{
    let db = setup_db().await;
    let identity = Arc::new(DatabaseIdentityProvider::new(
        db.clone(),
        Duration::hours(1),
        8,
    ));

    let company_id = Uuid::new_v4();
    company::ActiveModel {
        id: Set(company_id),
        name: Set("Acme Field Services".to_string()),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(&*db)
    .await
    .unwrap();

    let owner = identity
        .create_identity("owner@acme.test", CREDENTIAL)
        .await
        .unwrap();
    MembershipRepository::new(db.clone())
        .grant(company_id, owner.id, CompanyRole::Owner)
        .await
        .unwrap();

    let provider: Arc<dyn IdentityProvider> = identity.clone();
    let (stores, provider) = wrap(InviteStores::database(db.clone()), provider);
    let service = Arc::new(InviteService::new(stores, provider, policy));

    Harness {
        db,
        service,
        identity,
        company_id,
        owner,
    }
}

impl Harness {
    async fn add_employee(&self, name: &str, email: Option<&str>, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now().fixed_offset();
        employee::ActiveModel {
            id: Set(id),
            company_id: Set(self.company_id),
            display_name: Set(name.to_string()),
            email: Set(email.map(str::to_string)),
            role: Set(role.to_string()),
            identity_id: Set(None),
            invitation_status: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .unwrap();
        id
    }

    async fn sign_up(&self, email: &str) -> Identity {
        self.identity.create_identity(email, CREDENTIAL).await.unwrap()
    }

    async fn employee(&self, id: Uuid) -> employee::Model {
        employee::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .unwrap()
            .unwrap()
    }

    async fn invite(&self, id: Uuid) -> invite::Model {
        invite::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .unwrap()
            .unwrap()
    }

    async fn membership(&self, identity_id: Uuid) -> Option<membership::Model> {
        membership::Entity::find_by_id((self.company_id, identity_id))
            .one(&*self.db)
            .await
            .unwrap()
    }

    async fn expire(&self, invite_id: Uuid) {
        invite::Entity::update_many()
            .set(invite::ActiveModel {
                expires_at: Set((Utc::now() - Duration::hours(1)).fixed_offset()),
                ..Default::default()
            })
            .filter(invite::Column::Id.eq(invite_id))
            .exec(&*self.db)
            .await
            .unwrap();
    }

    async fn issue(&self, employee_id: Uuid) -> IssuedInviteLink {
        self.service
            .issue(self.company_id, employee_id, None, &self.owner)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn issue_validate_and_accept_with_session() {
    let h = harness().await;
    let employee_id = h.add_employee("Ada Lovelace", Some("Ada@Acme.test"), "member").await;

    let issued = h.issue(employee_id).await;
    assert!(
        issued
            .accept_url
            .starts_with("https://app.example.test/invite/accept?token=")
    );
    assert!(issued.accept_url.ends_with(issued.secret()));
    assert_eq!(issued.invite.status, EffectiveInviteStatus::Pending);
    assert_eq!(issued.invite.target_email.as_deref(), Some("ada@acme.test"));
    assert_eq!(
        h.employee(employee_id).await.invitation_status,
        Some(InviteStatus::Pending)
    );

    let preview = h.service.validate(issued.secret()).await.unwrap();
    assert_eq!(preview.company_name, "Acme Field Services");
    assert_eq!(preview.employee_name, "Ada Lovelace");
    assert_eq!(preview.role, CompanyRole::Member);

    let ada = h.sign_up("ada@acme.test").await;
    let outcome = h
        .service
        .accept(issued.secret(), Some(&ada), None, None)
        .await
        .unwrap();
    assert_eq!(outcome.disposition, AcceptDisposition::Accepted);
    assert_eq!(outcome.next_step, NextStep::Continue);
    assert_eq!(outcome.employee_id, employee_id);
    assert_eq!(outcome.company_id, h.company_id);

    let membership = h.membership(ada.id).await.unwrap();
    assert_eq!(membership.role, CompanyRole::Member);
    assert!(membership.is_active());

    let stored = h.invite(issued.invite.id).await;
    assert_eq!(stored.status, InviteStatus::Accepted);
    assert_eq!(stored.accepted_by, Some(ada.id));

    let employee = h.employee(employee_id).await;
    assert_eq!(employee.identity_id, Some(ada.id));
    assert_eq!(employee.invitation_status, Some(InviteStatus::Accepted));
}

#[tokio::test]
async fn expired_invite_is_rejected_but_stays_pending() {
    let h = harness().await;
    let employee_id = h.add_employee("Ben", Some("ben@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;
    h.expire(issued.invite.id).await;

    assert!(matches!(
        h.service.validate(issued.secret()).await,
        Err(InviteError::Expired)
    ));

    let ben = h.sign_up("ben@acme.test").await;
    assert!(matches!(
        h.service.accept(issued.secret(), Some(&ben), None, None).await,
        Err(InviteError::Expired)
    ));
    assert!(matches!(
        h.service
            .accept(issued.secret(), None, Some("ben@acme.test"), Some(CREDENTIAL))
            .await,
        Err(InviteError::Expired)
    ));

    assert_eq!(h.invite(issued.invite.id).await.status, InviteStatus::Pending);
    assert!(h.membership(ben.id).await.is_none());
}

#[tokio::test]
async fn regenerate_supersedes_previous_invite() {
    let h = harness().await;
    let employee_id = h.add_employee("Cleo", Some("cleo@acme.test"), "Administrator").await;

    let first = h.issue(employee_id).await;
    assert_eq!(first.invite.role, CompanyRole::Admin);
    let second = h
        .service
        .regenerate(h.company_id, employee_id, &h.owner)
        .await
        .unwrap();
    assert_eq!(second.invite.role, CompanyRole::Admin);
    assert_ne!(first.secret(), second.secret());

    assert!(matches!(
        h.service.validate(first.secret()).await,
        Err(InviteError::RevokedOrExpired)
    ));
    assert!(h.service.validate(second.secret()).await.is_ok());

    let invites = h
        .service
        .list_employee_invites(h.company_id, employee_id, &h.owner)
        .await
        .unwrap();
    assert_eq!(invites.len(), 2);
    let pending = invites
        .iter()
        .filter(|invite| invite.status == EffectiveInviteStatus::Pending)
        .count();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn concurrent_issues_leave_one_pending_invite() {
    let h = harness().await;
    let employee_id = h.add_employee("Dara", Some("dara@acme.test"), "member").await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let service = h.service.clone();
        let owner = h.owner.clone();
        let company_id = h.company_id;
        handles.push(tokio::spawn(async move {
            service.issue(company_id, employee_id, None, &owner).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let pending = invite::Entity::find()
        .filter(invite::Column::EmployeeId.eq(employee_id))
        .filter(invite::Column::Status.eq(InviteStatus::Pending))
        .count(&*h.db)
        .await
        .unwrap();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn weak_credential_creates_no_identity() {
    let h = harness().await;
    let employee_id = h.add_employee("Eve", Some("eve@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;

    let result = h
        .service
        .accept(issued.secret(), None, Some("eve@acme.test"), Some("abc"))
        .await;
    assert!(matches!(
        result,
        Err(InviteError::WeakCredential { min_length: 8 })
    ));

    assert!(
        h.identity
            .find_identity_by_email("eve@acme.test")
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(h.invite(issued.invite.id).await.status, InviteStatus::Pending);
}

#[tokio::test]
async fn repeated_accept_by_same_identity_succeeds() {
    let h = harness().await;
    let employee_id = h.add_employee("Finn", Some("finn@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;
    let finn = h.sign_up("finn@acme.test").await;

    let first = h
        .service
        .accept(issued.secret(), Some(&finn), None, None)
        .await
        .unwrap();
    let second = h
        .service
        .accept(issued.secret(), Some(&finn), None, None)
        .await
        .unwrap();

    assert_eq!(first.disposition, AcceptDisposition::Accepted);
    assert_eq!(second.disposition, AcceptDisposition::AlreadyAccepted);

    let memberships = membership::Entity::find()
        .filter(membership::Column::IdentityId.eq(finn.id))
        .count(&*h.db)
        .await
        .unwrap();
    assert_eq!(memberships, 1);
}

#[tokio::test]
async fn concurrent_accepts_transition_exactly_once() {
    let h = harness().await;
    let employee_id = h.add_employee("Gus", Some("gus@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;
    let gus = h.sign_up("gus@acme.test").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = h.service.clone();
        let gus = gus.clone();
        let secret = issued.secret().to_string();
        handles.push(tokio::spawn(async move {
            service.accept(&secret, Some(&gus), None, None).await
        }));
    }

    let mut transitioned = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) if outcome.disposition == AcceptDisposition::Accepted => transitioned += 1,
            Ok(_) | Err(InviteError::AlreadyAccepted) => {}
            Err(other) => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(transitioned, 1);
    assert!(h.membership(gus.id).await.is_some());
}

#[tokio::test]
async fn wrong_account_is_a_hard_stop() {
    let h = harness().await;
    let employee_id = h.add_employee("Hana", Some("hana@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;
    let intruder = h.sign_up("someone@else.test").await;

    assert!(matches!(
        h.service.accept(issued.secret(), Some(&intruder), None, None).await,
        Err(InviteError::WrongAccount)
    ));

    assert!(h.employee(employee_id).await.identity_id.is_none());
    assert!(h.membership(intruder.id).await.is_none());
    assert_eq!(h.invite(issued.invite.id).await.status, InviteStatus::Pending);
}

#[tokio::test]
async fn email_comparison_ignores_case() {
    let h = harness().await;
    let employee_id = h.add_employee("Ivo", Some("IVO@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;
    let ivo = Identity {
        email: "Ivo@Acme.Test".to_string(),
        ..h.sign_up("ivo@acme.test").await
    };

    let outcome = h
        .service
        .accept(issued.secret(), Some(&ivo), None, None)
        .await
        .unwrap();
    assert_eq!(outcome.disposition, AcceptDisposition::Accepted);
}

#[tokio::test]
async fn session_email_fills_invite_without_address() {
    let h = harness().await;
    let employee_id = h.add_employee("Jude", None, "member").await;
    let issued = h.issue(employee_id).await;
    assert!(issued.invite.target_email.is_none());
    let jude = h.sign_up("jude@acme.test").await;

    h.service
        .accept(issued.secret(), Some(&jude), None, None)
        .await
        .unwrap();

    assert_eq!(
        h.invite(issued.invite.id).await.target_email.as_deref(),
        Some("jude@acme.test")
    );
    assert_eq!(
        h.employee(employee_id).await.email.as_deref(),
        Some("jude@acme.test")
    );
}

#[tokio::test]
async fn employee_linked_elsewhere_is_already_accepted() {
    let h = harness().await;
    let employee_id = h.add_employee("Kai", Some("kai@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;
    let kai = h.sign_up("kai@acme.test").await;

    employee::Entity::update_many()
        .set(employee::ActiveModel {
            identity_id: Set(Some(Uuid::new_v4())),
            ..Default::default()
        })
        .filter(employee::Column::Id.eq(employee_id))
        .exec(&*h.db)
        .await
        .unwrap();

    assert!(matches!(
        h.service.accept(issued.secret(), Some(&kai), None, None).await,
        Err(InviteError::AlreadyAccepted)
    ));
    assert!(h.membership(kai.id).await.is_none());
}

#[tokio::test]
async fn new_account_flow_creates_identity_and_membership() {
    let h = harness().await;
    let employee_id = h.add_employee("Lena", Some("lena@acme.test"), "owner").await;
    let issued = h.issue(employee_id).await;

    let outcome = h
        .service
        .accept(issued.secret(), None, Some("LENA@acme.test"), Some(CREDENTIAL))
        .await
        .unwrap();
    assert_eq!(outcome.next_step, NextStep::SignIn);
    assert_eq!(outcome.disposition, AcceptDisposition::Accepted);

    let membership = h.membership(outcome.identity_id).await.unwrap();
    assert_eq!(membership.role, CompanyRole::Owner);
    assert_eq!(
        h.employee(employee_id).await.identity_id,
        Some(outcome.identity_id)
    );

    let session = h.identity.sign_in("lena@acme.test", CREDENTIAL).await.unwrap();
    let replay = h
        .service
        .accept(issued.secret(), Some(&session.identity), None, None)
        .await
        .unwrap();
    assert_eq!(replay.disposition, AcceptDisposition::AlreadyAccepted);
}

#[tokio::test]
async fn new_account_flow_rejects_existing_email_and_mismatch() {
    let h = harness().await;
    let employee_id = h.add_employee("Milo", Some("milo@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;

    assert!(matches!(
        h.service
            .accept(issued.secret(), None, Some("other@acme.test"), Some(CREDENTIAL))
            .await,
        Err(InviteError::WrongAccount)
    ));
    assert!(matches!(
        h.service
            .accept(issued.secret(), None, Some("milo@acme.test"), None)
            .await,
        Err(InviteError::Unauthenticated)
    ));

    h.sign_up("milo@acme.test").await;
    assert!(matches!(
        h.service
            .accept(issued.secret(), None, Some("milo@acme.test"), Some(CREDENTIAL))
            .await,
        Err(InviteError::IdentityAlreadyExists)
    ));
    assert!(h.employee(employee_id).await.identity_id.is_none());
    assert_eq!(h.invite(issued.invite.id).await.status, InviteStatus::Pending);
}

#[tokio::test]
async fn new_account_without_any_email_is_invalid() {
    let h = harness().await;
    let employee_id = h.add_employee("Nia", None, "member").await;
    let issued = h.issue(employee_id).await;

    assert!(matches!(
        h.service
            .accept(issued.secret(), None, None, Some(CREDENTIAL))
            .await,
        Err(InviteError::InvalidEmail)
    ));
    assert!(matches!(
        h.service
            .accept(issued.secret(), None, Some("not-an-email"), Some(CREDENTIAL))
            .await,
        Err(InviteError::InvalidEmail)
    ));
}

#[tokio::test]
async fn malformed_and_unknown_tokens_are_not_found() {
    let h = harness().await;

    assert!(matches!(
        h.service.validate("short").await,
        Err(InviteError::NotFound)
    ));
    assert!(matches!(
        h.service.validate(&"x".repeat(43)).await,
        Err(InviteError::NotFound)
    ));
    assert!(matches!(
        h.service.accept("short", None, None, None).await,
        Err(InviteError::NotFound)
    ));
}

#[tokio::test]
async fn only_owners_and_admins_manage_invites() {
    let h = harness().await;
    let employee_id = h.add_employee("Omar", Some("omar@acme.test"), "member").await;

    let outsider = h.sign_up("outsider@acme.test").await;
    assert!(matches!(
        h.service
            .issue(h.company_id, employee_id, None, &outsider)
            .await,
        Err(InviteError::Forbidden)
    ));

    let member = h.sign_up("member@acme.test").await;
    MembershipRepository::new(h.db.clone())
        .grant(h.company_id, member.id, CompanyRole::Member)
        .await
        .unwrap();
    assert!(matches!(
        h.service.revoke(h.company_id, employee_id, &member).await,
        Err(InviteError::Forbidden)
    ));

    let admin = h.sign_up("admin@acme.test").await;
    MembershipRepository::new(h.db.clone())
        .grant(h.company_id, admin.id, CompanyRole::Admin)
        .await
        .unwrap();
    assert!(matches!(
        h.service
            .issue(h.company_id, employee_id, Some(CompanyRole::Owner), &admin)
            .await,
        Err(InviteError::Forbidden)
    ));
    assert!(
        h.service
            .issue(h.company_id, employee_id, Some(CompanyRole::Admin), &admin)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn employee_of_another_company_is_not_found() {
    let h = harness().await;
    let employee_id = h.add_employee("Pia", Some("pia@acme.test"), "member").await;

    assert!(matches!(
        h.service
            .list_employee_invites(h.company_id, Uuid::new_v4(), &h.owner)
            .await,
        Err(InviteError::NotFound)
    ));

    let other_company = Uuid::new_v4();
    MembershipRepository::new(h.db.clone())
        .grant(other_company, h.owner.id, CompanyRole::Owner)
        .await
        .unwrap();
    assert!(matches!(
        h.service
            .issue(other_company, employee_id, None, &h.owner)
            .await,
        Err(InviteError::NotFound)
    ));
}

#[tokio::test]
async fn linked_employee_cannot_be_invited_again() {
    let h = harness().await;
    let employee_id = h.add_employee("Quin", Some("quin@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;
    let quin = h.sign_up("quin@acme.test").await;
    h.service
        .accept(issued.secret(), Some(&quin), None, None)
        .await
        .unwrap();

    assert!(matches!(
        h.service
            .regenerate(h.company_id, employee_id, &h.owner)
            .await,
        Err(InviteError::AlreadyAccepted)
    ));
}

#[tokio::test]
async fn revoke_closes_pending_invites_and_mirror() {
    let h = harness().await;
    let employee_id = h.add_employee("Rosa", Some("rosa@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;

    let outcome = h
        .service
        .revoke(h.company_id, employee_id, &h.owner)
        .await
        .unwrap();
    assert_eq!(outcome.revoked_invite_ids, vec![issued.invite.id]);

    assert!(matches!(
        h.service.validate(issued.secret()).await,
        Err(InviteError::RevokedOrExpired)
    ));
    assert_eq!(
        h.employee(employee_id).await.invitation_status,
        Some(InviteStatus::Revoked)
    );

    let again = h
        .service
        .revoke(h.company_id, employee_id, &h.owner)
        .await
        .unwrap();
    assert!(again.revoked_invite_ids.is_empty());
}

#[tokio::test]
async fn revoked_after_expiry_reads_as_revoked() {
    let h = harness().await;
    let employee_id = h.add_employee("Sam", Some("sam@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;
    h.service
        .revoke(h.company_id, employee_id, &h.owner)
        .await
        .unwrap();
    h.expire(issued.invite.id).await;

    assert!(matches!(
        h.service.validate(issued.secret()).await,
        Err(InviteError::RevokedOrExpired)
    ));
}

#[tokio::test]
async fn existing_identity_gets_inbox_entry_and_accepts_from_it() {
    let h = harness().await;
    let tess = h.sign_up("tess@acme.test").await;
    let employee_id = h.add_employee("Tess", Some("tess@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;

    let inbox = h.service.inbox(&tess).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].invite_id, issued.invite.id);
    assert_eq!(inbox[0].company_name, "Acme Field Services");
    assert!(!inbox[0].read);

    let notification_id = inbox[0].notification_id;
    assert!(matches!(
        h.service.accept_by_notification(notification_id, None).await,
        Err(InviteError::Unauthenticated)
    ));
    assert!(matches!(
        h.service
            .accept_by_notification(notification_id, Some(&h.owner))
            .await,
        Err(InviteError::NotFound)
    ));

    let outcome = h
        .service
        .accept_by_notification(notification_id, Some(&tess))
        .await
        .unwrap();
    assert_eq!(outcome.disposition, AcceptDisposition::Accepted);

    let stored = notification::Entity::find_by_id(notification_id)
        .one(&*h.db)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.read_at.is_some());
    assert!(h.service.inbox(&tess).await.unwrap().is_empty());
}

#[tokio::test]
async fn acceptance_clears_other_recipients_copies() {
    let h = harness().await;
    let shared = h.sign_up("frontdesk@acme.test").await;
    let notifications = NotificationRepository::new(h.db.clone());

    // Accepted from the inbox.
    let ines = h.sign_up("ines@acme.test").await;
    let ines_employee = h.add_employee("Ines", Some("ines@acme.test"), "member").await;
    let from_inbox = h.issue(ines_employee).await;
    let copy = notifications
        .notify_invite(shared.id, &h.invite(from_inbox.invite.id).await)
        .await
        .unwrap();
    assert_ne!(copy.recipient_id, ines.id);
    let notification_id = h.service.inbox(&ines).await.unwrap()[0].notification_id;

    h.service
        .accept_by_notification(notification_id, Some(&ines))
        .await
        .unwrap();

    let own = notifications.find(notification_id).await.unwrap().unwrap();
    assert!(own.read_at.is_some());
    assert!(notifications.find(copy.id).await.unwrap().is_none());

    // Accepted by token with a session.
    let jon = h.sign_up("jon@acme.test").await;
    let jon_employee = h.add_employee("Jon", Some("jon@acme.test"), "member").await;
    let by_token = h.issue(jon_employee).await;
    let copy = notifications
        .notify_invite(shared.id, &h.invite(by_token.invite.id).await)
        .await
        .unwrap();

    h.service
        .accept(by_token.secret(), Some(&jon), None, None)
        .await
        .unwrap();

    let own = notifications.list_for_recipient(jon.id).await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].invite_id, by_token.invite.id);
    assert!(own[0].read_at.is_some());
    assert!(notifications.find(copy.id).await.unwrap().is_none());
    assert!(notifications.list_for_recipient(shared.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn regenerate_replaces_inbox_entry() {
    let h = harness().await;
    let uma = h.sign_up("uma@acme.test").await;
    let employee_id = h.add_employee("Uma", Some("uma@acme.test"), "member").await;
    let first = h.issue(employee_id).await;
    let second = h
        .service
        .regenerate(h.company_id, employee_id, &h.owner)
        .await
        .unwrap();

    let stored = notification::Entity::find()
        .filter(notification::Column::RecipientId.eq(uma.id))
        .all(&*h.db)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].invite_id, second.invite.id);
    assert_ne!(stored[0].invite_id, first.invite.id);
}

#[tokio::test]
async fn decline_revokes_invite_and_clears_inbox() {
    let h = harness().await;
    let vic = h.sign_up("vic@acme.test").await;
    let employee_id = h.add_employee("Vic", Some("vic@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;
    let notification_id = h.service.inbox(&vic).await.unwrap()[0].notification_id;

    h.service
        .decline_by_notification(notification_id, Some(&vic))
        .await
        .unwrap();

    assert_eq!(h.invite(issued.invite.id).await.status, InviteStatus::Revoked);
    assert_eq!(
        h.employee(employee_id).await.invitation_status,
        Some(InviteStatus::Revoked)
    );
    assert!(h.service.inbox(&vic).await.unwrap().is_empty());
    assert!(matches!(
        h.service.accept(issued.secret(), Some(&vic), None, None).await,
        Err(InviteError::RevokedOrExpired)
    ));
}

/// Delegates to a real store but fails the acceptance transition.
struct FailingTransition {
    inner: Arc<dyn InviteStore>,
}

#[async_trait]
impl InviteStore for FailingTransition {
    async fn issue(&self, new_invite: NewInvite) -> Result<IssuedInvite, RepositoryError> {
        self.inner.issue(new_invite).await
    }

    async fn find_by_lookup_hash(
        &self,
        lookup_hash: &LookupHash,
    ) -> Result<Option<invite::Model>, RepositoryError> {
        self.inner.find_by_lookup_hash(lookup_hash).await
    }

    async fn find_by_id(&self, invite_id: Uuid) -> Result<Option<invite::Model>, RepositoryError> {
        self.inner.find_by_id(invite_id).await
    }

    async fn transition_to_accepted(
        &self,
        _invite_id: Uuid,
        _identity_id: Uuid,
        _target_email: Option<String>,
        _occurred_at: DateTime<Utc>,
    ) -> Result<invite::Model, TransitionError> {
        Err(TransitionError::Repository(RepositoryError::Database(
            sea_orm::DbErr::Custom("connection reset".to_string()),
        )))
    }

    async fn revoke_pending(
        &self,
        employee_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        self.inner.revoke_pending(employee_id, occurred_at).await
    }

    async fn revoke_one(
        &self,
        invite_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.inner.revoke_one(invite_id, occurred_at).await
    }

    async fn list_for_employee(
        &self,
        employee_id: Uuid,
    ) -> Result<Vec<invite::Model>, RepositoryError> {
        self.inner.list_for_employee(employee_id).await
    }
}

/// Identity provider whose delete always fails.
struct UndeletableIdentities {
    inner: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl IdentityProvider for UndeletableIdentities {
    async fn current_session(&self, token: &str) -> Result<Option<Identity>, IdentityError> {
        self.inner.current_session(token).await
    }

    async fn create_identity(&self, email: &str, credential: &str) -> Result<Identity, IdentityError> {
        self.inner.create_identity(email, credential).await
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, IdentityError> {
        self.inner.find_identity_by_email(email).await
    }

    async fn delete_identity(&self, _identity_id: Uuid) -> Result<(), IdentityError> {
        Err(IdentityError::Unavailable("provider offline".to_string()))
    }

    async fn sign_in(&self, email: &str, credential: &str) -> Result<IssuedSession, IdentityError> {
        self.inner.sign_in(email, credential).await
    }
}

#[tokio::test]
async fn failed_transition_rolls_back_new_account() {
    let h = harness_with(
        |mut stores, identity| {
            stores.invites = Arc::new(FailingTransition {
                inner: stores.invites.clone(),
            });
            (stores, identity)
        },
        policy(),
    )
    .await;
    let employee_id = h.add_employee("Wren", Some("wren@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;

    let result = h
        .service
        .accept(issued.secret(), None, Some("wren@acme.test"), Some(CREDENTIAL))
        .await;
    assert!(matches!(result, Err(InviteError::Transient(_))));

    assert!(
        h.identity
            .find_identity_by_email("wren@acme.test")
            .await
            .unwrap()
            .is_none()
    );
    let employee = h.employee(employee_id).await;
    assert!(employee.identity_id.is_none());
    assert_eq!(employee.invitation_status, Some(InviteStatus::Pending));
    assert_eq!(h.invite(issued.invite.id).await.status, InviteStatus::Pending);
    assert_eq!(
        membership::Entity::find().count(&*h.db).await.unwrap(),
        1,
        "only the owner's membership exists"
    );

    // An email typed for an employee without one is not kept.
    let blank_id = h.add_employee("Yves", None, "member").await;
    let blank = h.issue(blank_id).await;

    let result = h
        .service
        .accept(blank.secret(), None, Some("typo@acme.test"), Some(CREDENTIAL))
        .await;
    assert!(matches!(result, Err(InviteError::Transient(_))));

    let employee = h.employee(blank_id).await;
    assert!(employee.email.is_none());
    assert!(employee.identity_id.is_none());
    assert!(
        h.identity
            .find_identity_by_email("typo@acme.test")
            .await
            .unwrap()
            .is_none()
    );

    let retry = h
        .service
        .accept(blank.secret(), None, Some("yves@acme.test"), Some(CREDENTIAL))
        .await;
    assert!(matches!(retry, Err(InviteError::Transient(_))));
    assert!(h.employee(blank_id).await.email.is_none());
}

#[tokio::test]
async fn failed_compensation_is_escalated() {
    let h = harness_with(
        |mut stores, identity| {
            stores.invites = Arc::new(FailingTransition {
                inner: stores.invites.clone(),
            });
            let identity: Arc<dyn IdentityProvider> =
                Arc::new(UndeletableIdentities { inner: identity });
            (stores, identity)
        },
        policy(),
    )
    .await;
    let employee_id = h.add_employee("Xan", Some("xan@acme.test"), "member").await;
    let issued = h.issue(employee_id).await;

    let err = h
        .service
        .accept(issued.secret(), None, Some("xan@acme.test"), Some(CREDENTIAL))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    match err {
        InviteError::CompensationFailed { original, detail } => {
            assert!(matches!(*original, InviteError::Transient(_)));
            assert!(detail.contains("delete identity"));
        }
        other => panic!("expected compensation failure, got {other:?}"),
    }
}

/// Directory whose employee lookups never complete in time.
struct StalledDirectory {
    inner: Arc<dyn CompanyDirectory>,
}

#[async_trait]
impl CompanyDirectory for StalledDirectory {
    async fn find_company(
        &self,
        company_id: Uuid,
    ) -> Result<Option<company::Model>, RepositoryError> {
        self.inner.find_company(company_id).await
    }

    async fn find_employee(
        &self,
        _employee_id: Uuid,
    ) -> Result<Option<employee::Model>, RepositoryError> {
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Ok(None)
    }

    async fn link_identity(
        &self,
        employee_id: Uuid,
        identity_id: Uuid,
        email: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.inner
            .link_identity(employee_id, identity_id, email, occurred_at)
            .await
    }

    async fn unlink_identity(
        &self,
        employee_id: Uuid,
        identity_id: Uuid,
        filled_email: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.inner
            .unlink_identity(employee_id, identity_id, filled_email, occurred_at)
            .await
    }

    async fn set_invitation_status(
        &self,
        employee_id: Uuid,
        status: InviteStatus,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.inner
            .set_invitation_status(employee_id, status, occurred_at)
            .await
    }
}

#[tokio::test]
async fn store_timeout_surfaces_as_transient() {
    let h = harness_with(
        |mut stores, identity| {
            stores.directory = Arc::new(StalledDirectory {
                inner: stores.directory.clone(),
            });
            (stores, identity)
        },
        InvitePolicy {
            store_timeout: StdDuration::from_millis(100),
            ..policy()
        },
    )
    .await;
    let employee_id = h.add_employee("Yara", Some("yara@acme.test"), "member").await;

    let result = h
        .service
        .issue(h.company_id, employee_id, None, &h.owner)
        .await;
    match result {
        Err(InviteError::Transient(message)) => assert!(message.contains("find_employee")),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn deep_link_keeps_base_path() {
    let (secret, _) = crypto::issue();

    let link = deep_link(&Url::parse("https://app.example.test/portal/").unwrap(), &secret);
    assert_eq!(
        link,
        format!("https://app.example.test/portal/invite/accept?token={}", secret.expose())
    );

    let link = deep_link(&Url::parse("https://app.example.test").unwrap(), &secret);
    assert!(link.starts_with("https://app.example.test/invite/accept?token="));
}

#[test]
fn email_shape_check() {
    assert!(is_valid_email("a@b.co"));
    assert!(!is_valid_email("a@b"));
    assert!(!is_valid_email("a b@c.de"));
    assert!(!is_valid_email(""));
}
