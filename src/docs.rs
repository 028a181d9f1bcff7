use axum::Router;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::server::Server;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::login,
        routes::auth::me,
        routes::auth::verify,
        routes::auth::refresh,
        routes::accounts::sign_up,
        routes::accounts::reset_password,
        routes::accounts::check_code,
        routes::accounts::set_password,
        routes::actors::list_actors,
        routes::actors::create_actor,
        routes::actors::get_actor,
        routes::actors::update_actor,
        routes::actors::partial_update_actor,
        routes::actors::delete_actor,
        routes::actors::invite_again,
        routes::actors::set_firebase_token,
        routes::actors::list_notifications,
        routes::actors::new_notifications
    ),
    components(
        schemas(
            crate::authz::RoleKind,
            models::actor::Actor,
            models::actor::AuthResponse,
            models::actor::LoginRequest,
            models::actor::TokenRequest,
            models::actor::TokenResponse,
            models::actor::ActorCreateRequest,
            models::actor::ActorUpdateRequest,
            models::actor::InviteAgainRequest,
            models::actor::FirebaseTokenRequest,
            models::onboarding::SignUpRequest,
            models::onboarding::ResetPasswordRequest,
            models::onboarding::CheckCodeRequest,
            models::onboarding::CheckCodeResponse,
            models::onboarding::SetPasswordRequest,
            models::onboarding::EmailResponse,
            models::onboarding::StatusResponse,
            models::notification::Notification,
            models::notification::NotificationPage,
            models::notification::NewNotificationsResponse,
            routes::health::HealthResponse
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Auth", description = "Session tokens"),
        (name = "Accounts", description = "Activation and password reset"),
        (name = "Actors", description = "Budget owners, brigadiers, coordinators and candidates"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// The OpenAPI document with a `servers` entry pointing at the local port.
pub fn build_openapi(port: u16) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.servers = Some(vec![Server::new(format!("http://localhost:{}", port))]);
    doc
}

/// Swagger UI at `/docs`, raw document at `/api-docs/openapi.json`.
pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
    Router::new().merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", doc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_collection_route() {
        let doc = build_openapi(8000);
        let paths = &doc.paths.paths;
        for path in [
            "/auth/login",
            "/auth/refresh",
            "/accounts/reset-pass",
            "/{collection}",
            "/{collection}/{id}",
            "/{collection}/{id}/new-notifications",
            "/budgets/{id}/set-firebase-token",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        assert!(doc
            .components
            .as_ref()
            .map(|c| c.security_schemes.contains_key("bearer_auth"))
            .unwrap_or(false));
    }
}
