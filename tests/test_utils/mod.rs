//! Test utilities for database testing.
//!
//! In-memory SQLite with every migration applied, plus fixture helpers for
//! the rows the invite flow reads but does not own.

use anyhow::Result;
use chrono::{Duration, Utc};
use invites::crypto::{self, RawSecret};
use invites::models::{company, employee};
use invites::models::role::CompanyRole;
use invites::repositories::NewInvite;
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Set,
    Statement,
};
use std::sync::Arc;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool holds a single connection: every extra connection to
/// `sqlite::memory:` would open a separate, empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    // Fixtures below skip rows owned by the wider application (identities
    // for `issued_by`, for instance); SQLite would otherwise reject them.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Sets up an in-memory SQLite database and returns it behind an Arc.
#[allow(dead_code)]
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    let db = setup_test_db().await?;
    Ok(Arc::new(db))
}

/// Creates a company and returns its id.
#[allow(dead_code)]
pub async fn insert_company(db: &DatabaseConnection, name: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    company::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await?;
    Ok(id)
}

/// Creates an unlinked employee and returns its id.
#[allow(dead_code)]
pub async fn insert_employee(
    db: &DatabaseConnection,
    company_id: Uuid,
    display_name: &str,
    email: Option<&str>,
    role: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now().fixed_offset();
    employee::ActiveModel {
        id: Set(id),
        company_id: Set(company_id),
        display_name: Set(display_name.to_string()),
        email: Set(email.map(str::to_string)),
        role: Set(role.to_string()),
        identity_id: Set(None),
        invitation_status: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;
    Ok(id)
}

/// Builds a member invite for `employee_id` that expires after `ttl`.
#[allow(dead_code)]
pub fn new_invite(company_id: Uuid, employee_id: Uuid, ttl: Duration) -> (RawSecret, NewInvite) {
    let (secret, lookup_hash) = crypto::issue();
    let issued_at = Utc::now();
    let invite = NewInvite {
        company_id,
        employee_id,
        role: CompanyRole::Member,
        target_email: None,
        lookup_hash,
        issued_by: Uuid::new_v4(),
        issued_at,
        expires_at: issued_at + ttl,
    };
    (secret, invite)
}
