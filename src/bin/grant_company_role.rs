//! Operator tool: grants an existing account a role in a company.
//!
//! Bootstraps the first owner of a company, who can then issue invites
//! through the API.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use invites::{
    config::ConfigLoader,
    db,
    identity::{DatabaseIdentityProvider, IdentityProvider},
    models::{company, role::CompanyRole},
    repositories::MembershipRepository,
};
use sea_orm::EntityTrait;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "grant-company-role", about = "Grant an account a role in a company")]
struct Args {
    /// Company to grant the role in
    #[arg(long)]
    company: Uuid,

    /// Email of an existing account
    #[arg(long)]
    email: String,

    /// Role to grant
    #[arg(long, default_value = "owner", value_parser = ["owner", "admin", "member"])]
    role: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;

    let db = Arc::new(
        db::init_pool(&config)
            .await
            .context("initializing database connection pool")?,
    );

    let company = company::Entity::find_by_id(args.company)
        .one(&*db)
        .await
        .context("querying company")?;
    let Some(company) = company else {
        bail!("company {} does not exist", args.company);
    };

    let identities = DatabaseIdentityProvider::new(
        db.clone(),
        config.session_ttl(),
        config.invite.min_credential_length,
    );
    let identity = identities
        .find_identity_by_email(&args.email)
        .await
        .context("looking up account")?;
    let Some(identity) = identity else {
        bail!("no account is registered for {}", args.email);
    };

    let role = CompanyRole::normalize(&args.role);
    let membership = MembershipRepository::new(db)
        .grant(company.id, identity.id, role)
        .await
        .context("granting membership")?;

    println!(
        "Granted {} to {} in {} ({})",
        membership.role, identity.email, company.name, company.id
    );

    Ok(())
}
