use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use vidtube_types::models::User;

use crate::auth::{ACCESS_COOKIE, AppState, db_call, public_user};
use crate::error::ApiError;

/// The caller behind a verified access token, inserted into request
/// extensions for protected handlers.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// Require a valid access token from the `accessToken` cookie or an
/// `Authorization: Bearer` header. Every failure gets the same 401.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = jar
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(req.headers()))
        .ok_or_else(rejected)?;

    let claims = state.tokens.verify_access(&token).map_err(|e| {
        debug!("Access token rejected: {}", e);
        rejected()
    })?;

    let id = claims.sub.to_string();
    let row = db_call(&state, move |db| db.find_by_id(&id))
        .await?
        .ok_or_else(|| {
            debug!("Access token for deleted user {}", claims.sub);
            rejected()
        })?;

    req.extensions_mut().insert(AuthUser(public_user(&row)?));
    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn rejected() -> ApiError {
    ApiError::unauthorized("Invalid access token")
}
