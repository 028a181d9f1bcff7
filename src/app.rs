use std::sync::Arc;

use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Extension, Router};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{Gatekeeper, Resource, SqliteRoleTree};
use crate::config::Settings;
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::notify::{run_delivery_worker, LogTransport, Notifier, SmtpSettings, SmtpTransport, Transport};
use crate::rate_limit::{self, create_account_rate_limiter, AccountRateLimiter};
use crate::routes::{accounts, actors, auth, health};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub settings: Arc<Settings>,
    pub notifier: Notifier,
    pub gatekeeper: Arc<Gatekeeper<SqliteRoleTree>>,
    pub account_limiter: AccountRateLimiter,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, settings: Settings, notifier: Notifier) -> Self {
        let gatekeeper = Gatekeeper::new(SqliteRoleTree::new(pool.clone()));
        let account_limiter = create_account_rate_limiter(settings.account_requests_per_minute);
        Self {
            pool,
            jwt: Arc::new(jwt),
            settings: Arc::new(settings),
            notifier,
            gatekeeper: Arc::new(gatekeeper),
            account_limiter,
        }
    }
}

/// Reads configuration from the environment, starts the delivery worker and builds the router.
/// Email goes through SMTP when `SMTP_HOST` is set, otherwise deliveries are only logged.
pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let transport: Arc<dyn Transport> = match SmtpSettings::from_env()? {
        Some(smtp) => Arc::new(SmtpTransport::new(&smtp)?),
        None => Arc::new(LogTransport),
    };
    create_app_with_transport(pool, transport).await
}

pub async fn create_app_with_transport(pool: SqlitePool, transport: Arc<dyn Transport>) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let settings = Settings::from_env()?;

    let (notifier, rx) = Notifier::channel(settings.notify_queue_capacity);
    tokio::spawn(run_delivery_worker(rx, pool.clone(), transport));

    Ok(router(AppState::new(pool, jwt_config, settings, notifier)))
}

fn resource_routes(resource: Resource) -> Router<AppState> {
    let mut routes = Router::new()
        .route("/", get(actors::list_actors).post(actors::create_actor))
        .route(
            "/:id",
            get(actors::get_actor)
                .put(actors::update_actor)
                .patch(actors::partial_update_actor)
                .delete(actors::delete_actor),
        )
        .route("/:id/invite-again", post(actors::invite_again))
        .route("/:id/notifications", get(actors::list_notifications))
        .route("/:id/new-notifications", get(actors::new_notifications));

    if resource == Resource::Budget {
        routes = routes.route("/:id/set-firebase-token", post(actors::set_firebase_token));
    }

    routes.layer(Extension(resource))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/verify", post(auth::verify))
        .route("/refresh", post(auth::refresh));

    let account_routes = Router::new()
        .route("/sign-up", post(accounts::sign_up))
        .route("/reset-pass", post(accounts::reset_password))
        .route("/check-code", post(accounts::check_code))
        .route("/set-password", post(accounts::set_password))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_account_requests,
        ));

    let mut router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/accounts", account_routes);

    for resource in Resource::ALL {
        router = router.nest(&format!("/{}", resource.collection()), resource_routes(resource));
    }

    router
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
