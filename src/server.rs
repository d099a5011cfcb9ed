//! # Server Configuration
//!
//! Router, shared state and OpenAPI document of the invites service.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth;
use crate::config::AppConfig;
use crate::handlers;
use crate::identity::{BoundedIdentityProvider, DatabaseIdentityProvider, IdentityProvider};
use crate::invite_service::{InvitePolicy, InviteService, InviteStores};
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub identity: Arc<dyn IdentityProvider>,
    pub invites: Arc<InviteService>,
}

impl AppState {
    /// Wires the database-backed stores and identity provider.
    pub fn new(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<Self> {
        let policy = InvitePolicy::from_config(&config).context("Invalid invite policy")?;
        let db = Arc::new(db);

        let provider: Arc<dyn IdentityProvider> = Arc::new(DatabaseIdentityProvider::new(
            db.clone(),
            config.session_ttl(),
            policy.min_credential_length,
        ));
        // The service bounds its own calls; the HTTP layer needs the wrapper.
        let identity: Arc<dyn IdentityProvider> = Arc::new(BoundedIdentityProvider::new(
            provider.clone(),
            policy.store_timeout,
        ));
        let invites = Arc::new(InviteService::new(
            InviteStores::database(db.clone()),
            provider,
            policy,
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            identity,
            invites,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let employee_invites = "/api/v1/companies/{company_id}/employees/{employee_id}/invites";

    let api = Router::new()
        .route("/api/v1/sessions", post(handlers::sessions::create_session))
        .route(
            "/api/v1/invites/validate",
            get(handlers::invites::validate_invite),
        )
        .route(
            "/api/v1/invites/accept",
            post(handlers::invites::accept_invite),
        )
        .route(
            employee_invites,
            post(handlers::invites::issue_invite)
                .get(handlers::invites::list_invites)
                .delete(handlers::invites::revoke_invites),
        )
        .route(
            &format!("{employee_invites}/regenerate"),
            post(handlers::invites::regenerate_invite),
        )
        .route(
            "/api/v1/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/api/v1/notifications/{id}/accept",
            post(handlers::notifications::accept_notification),
        )
        .route(
            "/api/v1/notifications/{id}/decline",
            post(handlers::notifications::decline_notification),
        )
        .layer(middleware::from_fn_with_state(
            state.identity.clone(),
            auth::session_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .merge(api)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(telemetry::trace_context_middleware))
        .layer(CorsLayer::permissive())
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", config.api_bind_addr))?;
    let profile = config.profile.clone();

    let app = create_app(AppState::new(config, db)?);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::sessions::create_session,
        crate::handlers::invites::validate_invite,
        crate::handlers::invites::accept_invite,
        crate::handlers::invites::issue_invite,
        crate::handlers::invites::regenerate_invite,
        crate::handlers::invites::list_invites,
        crate::handlers::invites::revoke_invites,
        crate::handlers::notifications::list_notifications,
        crate::handlers::notifications::accept_notification,
        crate::handlers::notifications::decline_notification,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthStatus,
            crate::error::ApiError,
            crate::identity::Identity,
            crate::models::CompanyRole,
            crate::models::invite::EffectiveInviteStatus,
            crate::handlers::sessions::SignInRequest,
            crate::handlers::sessions::SessionResponse,
            crate::handlers::invites::AcceptInviteRequest,
            crate::handlers::invites::IssueInviteRequest,
            crate::invite_service::InvitePreview,
            crate::invite_service::InviteSummary,
            crate::invite_service::IssuedInviteLink,
            crate::invite_service::RevokeOutcome,
            crate::invite_service::InboxEntry,
            crate::invite_service::AcceptOutcome,
            crate::invite_service::AcceptDisposition,
            crate::invite_service::NextStep,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service metadata and health"),
        (name = "sessions", description = "Password sign-in"),
        (name = "invites", description = "Invite issuance, validation and acceptance"),
        (name = "notifications", description = "In-app invite inbox")
    ),
    info(
        title = "Invites API",
        description = "Company invite and membership activation",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
