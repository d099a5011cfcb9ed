//! Database migrations for the invites service.

pub use sea_orm_migration::prelude::*;

mod m2026_01_05_000001_create_companies;
mod m2026_01_05_000002_create_identities;
mod m2026_01_05_000003_create_sessions;
mod m2026_01_05_000004_create_employees;
mod m2026_01_05_000005_create_invites;
mod m2026_01_05_000006_create_memberships;
mod m2026_01_05_000007_create_notifications;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_05_000001_create_companies::Migration),
            Box::new(m2026_01_05_000002_create_identities::Migration),
            Box::new(m2026_01_05_000003_create_sessions::Migration),
            Box::new(m2026_01_05_000004_create_employees::Migration),
            Box::new(m2026_01_05_000005_create_invites::Migration),
            Box::new(m2026_01_05_000006_create_memberships::Migration),
            Box::new(m2026_01_05_000007_create_notifications::Migration),
        ]
    }
}
