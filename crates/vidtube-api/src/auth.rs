use std::sync::{Arc, LazyLock};

use argon2::Params;
use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use vidtube_db::{Database, NewUser, UserRow, UserUpdate};
use vidtube_media::{MediaHost, StagingArea, UploadedMedia};
use vidtube_types::api::{
    ApiResponse, Empty, LoginPayload, LoginRequest, RefreshRequest, TokenPair, UserPayload,
};
use vidtube_types::models::User;

use crate::error::ApiError;
use crate::forms::{FormFile, MultipartForm};
use crate::middleware::AuthUser;
use crate::password;
use crate::tokens::TokenService;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub tokens: TokenService,
    pub media: Arc<dyn MediaHost>,
    pub staging: Arc<StagingArea>,
    pub password_params: Params,
    pub cookie_secure: bool,
}

/// POST /users/register — multipart: username, email, fullname, password,
/// avatar (file, required), coverImage (file, optional).
pub async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = MultipartForm::read(multipart).await?;

    let fullname = form.text("fullname").to_string();
    let username = form.text("username").to_lowercase();
    let email = form.text("email").to_lowercase();
    let password = form.raw("password").to_string();

    if fullname.is_empty() {
        return Err(ApiError::validation("Full name is required"));
    }
    if username.is_empty() {
        return Err(ApiError::validation("Username is required"));
    }
    if email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }
    if password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::validation("Invalid email"));
    }

    let (u, e) = (username.clone(), email.clone());
    if db_call(&state, move |db| db.user_exists(&u, &e)).await? {
        return Err(ApiError::Conflict(
            "User with this username or email already exists".into(),
        ));
    }

    let avatar_file = form
        .take_file("avatar")
        .ok_or_else(|| ApiError::validation("Avatar is required"))?;

    let avatar = upload(&state, avatar_file)
        .await?
        .ok_or_else(|| ApiError::internal("Failed to upload avatar"))?;

    let cover_image = match form.take_file("coverImage") {
        Some(file) => {
            let uploaded = upload(&state, file).await?;
            if uploaded.is_none() {
                warn!("Cover image upload failed for new user {}; continuing without it", username);
            }
            uploaded.map(|m| m.url)
        }
        None => None,
    };

    let password_hash = password::hash(password, state.password_params.clone()).await?;

    let id = Uuid::new_v4().to_string();
    let (name, mail) = (username.clone(), email);
    let row = db_call(&state, move |db| {
        db.create_user(&NewUser {
            id: &id,
            username: &name,
            email: &mail,
            fullname: &fullname,
            password_hash: &password_hash,
            avatar: &avatar.url,
            cover_image: cover_image.as_deref(),
        })
    })
    .await?;

    info!("Registered user {} ({})", row.username, row.id);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(
            201,
            UserPayload { user: public_user(&row)? },
            "User registered successfully",
        )),
    ))
}

/// POST /users/login — JSON `{username | email, password}`.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<(CookieJar, Json<ApiResponse<LoginPayload>>), ApiError> {
    let username = non_empty(req.username).map(|s| s.to_lowercase());
    let email = non_empty(req.email).map(|s| s.to_lowercase());
    if username.is_none() && email.is_none() {
        return Err(ApiError::validation("Username or email is required"));
    }
    let password = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::validation("Password is required"))?;

    let row = db_call(&state, move |db| {
        db.find_by_identity(username.as_deref(), email.as_deref())
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;

    if !password::verify(row.password.clone(), password).await? {
        warn!("Rejected password for user {}", row.id);
        return Err(ApiError::unauthorized("Invalid user credentials"));
    }

    let user = public_user(&row)?;
    let pair = issue_pair(&state, &user)?;

    let (id, refresh) = (row.id.clone(), pair.refresh_token.clone());
    db_call(&state, move |db| {
        db.update_fields(
            &id,
            &UserUpdate {
                refresh_token: Some(Some(refresh)),
                ..Default::default()
            },
        )
    })
    .await?;

    info!("User {} logged in", user.id);

    let jar = set_auth_cookies(jar, &pair, state.cookie_secure);
    Ok((
        jar,
        Json(ApiResponse::new(
            200,
            LoginPayload {
                user,
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "User logged in successfully",
        )),
    ))
}

/// POST /users/logout — clears the stored refresh token and both cookies.
pub async fn logout(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<Empty>>), ApiError> {
    let id = user.id.to_string();
    db_call(&state, move |db| {
        db.update_fields(
            &id,
            &UserUpdate {
                refresh_token: Some(None),
                ..Default::default()
            },
        )
    })
    .await?;

    info!("User {} logged out", user.id);

    Ok((
        clear_auth_cookies(jar),
        Json(ApiResponse::new(200, Empty::default(), "User logged out successfully")),
    ))
}

/// POST /users/refresh-token — refresh token from the cookie, or from a JSON
/// body `{refreshToken}`. Rotates the stored token.
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<ApiResponse<TokenPair>>), ApiError> {
    let from_body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .ok()
            .and_then(|r| r.refresh_token)
    };

    let incoming = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .or(non_empty(from_body))
        .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

    let claims = state.tokens.verify_refresh(&incoming).map_err(|e| {
        warn!("Refresh token rejected: {}", e);
        ApiError::unauthorized("Invalid refresh token")
    })?;

    let id = claims.sub.to_string();
    let row = db_call(&state, move |db| db.find_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    let pair = rotate_session(&state, &row, incoming).await?;
    info!("Rotated tokens for user {}", row.id);

    let jar = set_auth_cookies(jar, &pair, state.cookie_secure);
    Ok((jar, Json(ApiResponse::new(200, pair, "Access token refreshed"))))
}

/// Swap the stored refresh token for a fresh pair. `row` is the user as read
/// before the swap; the swap only lands if `incoming` is still the stored token.
pub(crate) async fn rotate_session(
    state: &AppState,
    row: &UserRow,
    incoming: String,
) -> Result<TokenPair, ApiError> {
    if row.refresh_token.as_deref() != Some(incoming.as_str()) {
        warn!("Superseded or revoked refresh token presented for user {}", row.id);
        return Err(ApiError::unauthorized("Refresh token is expired or used"));
    }

    let user = public_user(row)?;
    let pair = issue_pair(state, &user)?;

    let (id, new_token) = (row.id.clone(), pair.refresh_token.clone());
    let rotated = db_call(state, move |db| {
        db.rotate_refresh_token(&id, &incoming, &new_token)
    })
    .await?;
    if !rotated {
        warn!("Lost refresh rotation race for user {}", row.id);
        return Err(ApiError::unauthorized("Refresh token is expired or used"));
    }

    Ok(pair)
}

// -- Helpers shared with account handlers and middleware --

/// Run a blocking database call on the blocking pool.
pub(crate) async fn db_call<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::internal("Something went wrong")
        })?
        .map_err(ApiError::from)
}

/// Stage an uploaded file locally, push it to the media host, and drop the
/// local copy either way.
pub(crate) async fn upload(
    state: &AppState,
    file: FormFile,
) -> Result<Option<UploadedMedia>, ApiError> {
    let path = state
        .staging
        .stage(file.file_name.as_deref(), &file.data)
        .await
        .map_err(|e| {
            error!("Failed to stage upload: {}", e);
            ApiError::internal("Something went wrong")
        })?;

    let uploaded = state.media.upload(&path).await;

    if let Err(e) = state.staging.discard(&path).await {
        warn!("Failed to remove staged file {}: {}", path.display(), e);
    }

    Ok(uploaded)
}

/// Strip the secrets off a row. Password hash and refresh token stay behind.
pub(crate) fn public_user(row: &UserRow) -> Result<User, ApiError> {
    let id = row.id.parse::<Uuid>().map_err(|e| {
        error!("Corrupt user id '{}': {}", row.id, e);
        ApiError::internal("Something went wrong")
    })?;

    Ok(User {
        id,
        username: row.username.clone(),
        email: row.email.clone(),
        fullname: row.fullname.clone(),
        avatar: row.avatar.clone(),
        cover_image: row.cover_image.clone().filter(|c| !c.is_empty()),
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
    })
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn issue_pair(state: &AppState, user: &User) -> Result<TokenPair, ApiError> {
    state.tokens.issue_pair(user).map_err(|e| {
        error!("Token issuance failed: {}", e);
        ApiError::internal("Something went wrong while generating tokens")
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores "YYYY-MM-DD HH:MM:SS" without timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

fn auth_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

fn set_auth_cookies(jar: CookieJar, pair: &TokenPair, secure: bool) -> CookieJar {
    jar.add(auth_cookie(ACCESS_COOKIE, pair.access_token.clone(), secure))
        .add(auth_cookie(REFRESH_COOKIE, pair.refresh_token.clone(), secure))
}

fn clear_auth_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(is_valid_email("ana@x.com"));
        assert!(is_valid_email("a.b+c@sub.example.org"));
        assert!(!is_valid_email("ana@x"));
        assert!(!is_valid_email("ana x@x.com"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("ana@@x.com"));
    }

    #[test]
    fn sqlite_timestamps_parse_as_utc() {
        let ts = parse_timestamp("2024-03-01 12:30:00");
        assert_eq!(ts.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    }

    #[test]
    fn public_user_drops_secrets() {
        let row = UserRow {
            id: Uuid::new_v4().to_string(),
            username: "ana".into(),
            email: "ana@x.com".into(),
            fullname: "Ana A".into(),
            password: "$argon2id$secret".into(),
            avatar: "https://cdn.test/a.png".into(),
            cover_image: Some(String::new()),
            refresh_token: Some("refresh".into()),
            created_at: "2024-03-01 12:30:00".into(),
            updated_at: "2024-03-01 12:30:00".into(),
        };

        let user = public_user(&row).unwrap();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("refreshToken").is_none());
        assert_eq!(json["username"], "ana");
        assert!(json["coverImage"].is_null());
    }
}
