use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
};

use crate::account;
use crate::auth::{self, AppState};
use crate::middleware::require_auth;

/// Profile images only; video uploads do not pass through here.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// All `/users` routes plus `/health`. Protected routes sit behind
/// `require_auth`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/users/register", post(auth::register))
        .route("/users/login", post(auth::login))
        .route("/users/refresh-token", post(auth::refresh_token));

    let protected_routes = Router::new()
        .route("/users/logout", post(auth::logout))
        .route("/users/change-password", post(account::change_password))
        .route("/users/me", get(account::current_user))
        .route("/users/update-account", patch(account::update_account))
        .route("/users/avatar", patch(account::update_avatar))
        .route("/users/cover-image", patch(account::update_cover_image))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// GET /health — liveness check (no auth).
pub async fn health() -> &'static str {
    "ok"
}
