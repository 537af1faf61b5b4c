use axum::{
    Extension, Json,
    extract::{Multipart, State},
};
use axum_extra::extract::WithRejection;
use tracing::{info, warn};

use vidtube_db::UserUpdate;
use vidtube_types::api::{
    ApiResponse, ChangePasswordRequest, Empty, UpdateAccountRequest, UserPayload,
};

use crate::auth::{AppState, db_call, is_valid_email, public_user, upload};
use crate::error::ApiError;
use crate::forms::MultipartForm;
use crate::middleware::AuthUser;
use crate::password;

type UserResponse = Result<Json<ApiResponse<UserPayload>>, ApiError>;

/// GET /users/me
pub async fn current_user(Extension(AuthUser(user)): Extension<AuthUser>) -> UserResponse {
    Ok(Json(ApiResponse::new(
        200,
        UserPayload { user },
        "Current user fetched successfully",
    )))
}

/// POST /users/change-password — JSON `{oldPassword, newPassword, confirmPassword}`.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    WithRejection(Json(req), _): WithRejection<Json<ChangePasswordRequest>, ApiError>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    if req.new_password.is_empty() {
        return Err(ApiError::validation("New password is required"));
    }
    if req.new_password != req.confirm_password {
        return Err(ApiError::validation(
            "New password and confirm password do not match",
        ));
    }

    let id = user.id.to_string();
    let row = db_call(&state, move |db| db.find_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid access token"))?;

    if !password::verify(row.password, req.old_password).await? {
        warn!("Wrong old password on change attempt for user {}", user.id);
        return Err(ApiError::validation("Invalid old password"));
    }

    let password_hash = password::hash(req.new_password, state.password_params.clone()).await?;
    let id = user.id.to_string();
    db_call(&state, move |db| {
        db.update_fields(
            &id,
            &UserUpdate {
                password_hash: Some(password_hash),
                ..Default::default()
            },
        )
    })
    .await?;

    info!("User {} changed password", user.id);

    Ok(Json(ApiResponse::new(
        200,
        Empty::default(),
        "Password changed successfully",
    )))
}

/// PATCH /users/update-account — JSON `{fullname, email}`.
pub async fn update_account(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateAccountRequest>, ApiError>,
) -> UserResponse {
    let fullname = req.fullname.trim().to_string();
    let email = req.email.trim().to_lowercase();
    if fullname.is_empty() || email.is_empty() {
        return Err(ApiError::validation("Full name and email are required"));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::validation("Invalid email"));
    }

    let id = user.id.to_string();
    let row = db_call(&state, move |db| {
        db.update_fields(
            &id,
            &UserUpdate {
                fullname: Some(fullname),
                email: Some(email),
                ..Default::default()
            },
        )
    })
    .await?
    .ok_or_else(|| ApiError::unauthorized("Invalid access token"))?;

    Ok(Json(ApiResponse::new(
        200,
        UserPayload { user: public_user(&row)? },
        "Account details updated successfully",
    )))
}

/// PATCH /users/avatar — multipart with an `avatar` file.
pub async fn update_avatar(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    multipart: Multipart,
) -> UserResponse {
    replace_image(&state, &user.id.to_string(), multipart, ProfileImage::Avatar).await
}

/// PATCH /users/cover-image — multipart with a `coverImage` file.
pub async fn update_cover_image(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    multipart: Multipart,
) -> UserResponse {
    replace_image(&state, &user.id.to_string(), multipart, ProfileImage::Cover).await
}

#[derive(Debug, Clone, Copy)]
enum ProfileImage {
    Avatar,
    Cover,
}

impl ProfileImage {
    fn field(self) -> &'static str {
        match self {
            ProfileImage::Avatar => "avatar",
            ProfileImage::Cover => "coverImage",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ProfileImage::Avatar => "Avatar",
            ProfileImage::Cover => "Cover image",
        }
    }
}

async fn replace_image(
    state: &AppState,
    user_id: &str,
    multipart: Multipart,
    kind: ProfileImage,
) -> UserResponse {
    let mut form = MultipartForm::read(multipart).await?;
    let file = form
        .take_file(kind.field())
        .ok_or_else(|| ApiError::validation(format!("{} file is missing", kind.label())))?;

    let media = upload(state, file)
        .await?
        .ok_or_else(|| ApiError::internal(format!("Error while uploading {}", kind.field())))?;

    let mut update = UserUpdate::default();
    match kind {
        ProfileImage::Avatar => update.avatar = Some(media.url),
        ProfileImage::Cover => update.cover_image = Some(media.url),
    }

    let id = user_id.to_string();
    let row = db_call(state, move |db| db.update_fields(&id, &update))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid access token"))?;

    info!("User {} updated {}", row.id, kind.field());

    Ok(Json(ApiResponse::new(
        200,
        UserPayload { user: public_user(&row)? },
        format!("{} updated successfully", kind.label()),
    )))
}
