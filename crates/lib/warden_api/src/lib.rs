//! # warden_api
//!
//! HTTP API library for Warden.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post, put};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use warden_core::AccessControl;

use crate::config::ApiConfig;
use crate::handlers::{access, health, tokens, users};
use crate::middleware::auth::{Guard, authenticate, enforce};

/// Permission required to read users, their access and the catalogue.
pub const USERS_READ: &str = "users:read";
/// Permission required to edit, delete or promote users and to issue
/// activation tokens.
pub const USERS_WRITE: &str = "users:write";
/// Permission required to edit the role/permission catalogue and user overrides.
pub const ACCESS_WRITE: &str = "access:write";

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Access-control core bound to its store.
    pub access: AccessControl,
    /// API configuration.
    pub config: ApiConfig,
}

/// Run embedded database migrations.
///
/// Delegates to `warden_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    warden_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (identity attached, nothing required)
    let public = Router::new()
        .route("/v1/healthcheck", get(health::healthcheck_handler))
        .route("/v1/users", post(users::register_handler))
        .route("/v1/users/activated", put(users::activate_handler))
        .route("/v1/tokens/authentication", post(tokens::login_handler));

    let authenticated = Router::new()
        .route(
            "/v1/users/me",
            get(users::me_handler).patch(users::update_profile_handler),
        )
        .route("/v1/users/me/access", get(users::my_access_handler))
        .route("/v1/users/me/password", put(users::change_password_handler))
        .route_layer(from_fn_with_state(Guard::authenticated(&state), enforce));

    let users_read = Router::new()
        .route("/v1/users", get(users::list_users_handler))
        .route("/v1/users/{id}", get(users::get_user_handler))
        .route("/v1/users/{id}/access", get(access::access_summary_handler))
        .route(
            "/v1/users/{id}/access/{permission}",
            get(access::explain_handler),
        )
        .route("/v1/permissions", get(access::list_permissions_handler))
        .route("/v1/permissions/{id}", get(access::get_permission_handler))
        .route("/v1/roles/{id}", get(access::get_role_handler))
        .route_layer(from_fn_with_state(Guard::permission(&state, USERS_READ), enforce));

    let users_write = Router::new()
        .route(
            "/v1/users/{id}",
            patch(users::update_user_handler).delete(users::delete_user_handler),
        )
        .route("/v1/users/{id}/admin", put(users::set_admin_handler))
        .route(
            "/v1/users/{id}/activation",
            post(users::reissue_activation_handler),
        )
        .route_layer(from_fn_with_state(Guard::permission(&state, USERS_WRITE), enforce));

    let access_write = Router::new()
        .route("/v1/permissions", post(access::create_permission_handler))
        .route(
            "/v1/permissions/{id}",
            patch(access::rename_permission_handler).delete(access::delete_permission_handler),
        )
        .route("/v1/roles", post(access::create_role_handler))
        .route("/v1/roles/{id}", delete(access::delete_role_handler))
        .route("/v1/users/{id}/roles", put(access::assign_roles_handler))
        .route(
            "/v1/users/{id}/roles/{role_id}",
            delete(access::unassign_role_handler),
        )
        .route(
            "/v1/users/{id}/permissions/{permission_id}/grant",
            put(access::grant_permission_handler),
        )
        .route(
            "/v1/users/{id}/permissions/{permission_id}/revoke",
            put(access::revoke_permission_handler),
        )
        .route_layer(from_fn_with_state(Guard::permission(&state, ACCESS_WRITE), enforce));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(users_read)
        .merge(users_write)
        .merge(access_write)
        .layer(from_fn_with_state(state.clone(), authenticate))
        .layer(cors)
        .with_state(state)
}
