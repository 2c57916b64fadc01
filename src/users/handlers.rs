use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{PublicUser, UpdateMeRequest, UpdateRoleRequest, UserListResponse, UserResponse, UsersData},
    repo_types::ProfileUpdate,
};
use crate::{
    auth::{
        extractors::CurrentUser,
        services::{is_valid_email, normalize_email},
    },
    error::{ApiResult, AppError},
    state::AppState,
};

type Body<T> = WithRejection<Json<T>, AppError>;
type UserId = WithRejection<Path<Uuid>, AppError>;

/// Needs `protect` in front.
pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/updateMe", patch(update_me))
        .route("/deleteMe", delete(delete_me))
}

/// Needs `protect` and `restrict_to(admin)` in front.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/:id", get(get_user).patch(update_user).delete(delete_user))
}

fn user_not_found() -> AppError {
    AppError::NotFound("No user found with that ID".into())
}

#[instrument(skip_all)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::new(user))
}

/// Turns the allow-listed body into a typed update.
fn profile_update(req: UpdateMeRequest) -> ApiResult<ProfileUpdate> {
    if req.password.is_some() || req.password_confirm.is_some() {
        return Err(AppError::Validation(
            "This route is not for password updates. Please use /updateMyPassword.".into(),
        ));
    }

    let name = match req.name.map(|n| n.trim().to_string()) {
        Some(n) if n.is_empty() => {
            return Err(AppError::Validation("Please tell us your name!".into()))
        }
        other => other,
    };
    let email = match req.email.map(|e| normalize_email(&e)) {
        Some(e) if !is_valid_email(&e) => {
            return Err(AppError::Validation("Please provide a valid email".into()))
        }
        other => other,
    };
    Ok(ProfileUpdate { name, email })
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(payload), _): Body<UpdateMeRequest>,
) -> ApiResult<Json<UserResponse>> {
    let update = profile_update(payload)?;
    let updated = state
        .users
        .update_profile(user.id, update)
        .await?
        .ok_or_else(user_not_found)?;
    info!(user_id = %updated.id, "profile updated");
    Ok(Json(UserResponse::new(updated)))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<StatusCode> {
    state.users.deactivate(user.id).await?;
    info!(user_id = %user.id, "user deactivated");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<UserListResponse>> {
    let users: Vec<PublicUser> = state
        .users
        .list()
        .await?
        .into_iter()
        .map(PublicUser::from)
        .collect();
    Ok(Json(UserListResponse {
        status: "success",
        results: users.len(),
        data: UsersData { users },
    }))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    WithRejection(Path(id), _): UserId,
) -> ApiResult<Json<UserResponse>> {
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(user_not_found)?;
    Ok(Json(UserResponse::new(user)))
}

/// The only way a role changes.
#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    WithRejection(Path(id), _): UserId,
    WithRejection(Json(payload), _): Body<UpdateRoleRequest>,
) -> ApiResult<Json<UserResponse>> {
    let user = state
        .users
        .set_role(id, payload.role)
        .await?
        .ok_or_else(user_not_found)?;
    info!(user_id = %user.id, role = ?user.role, "role changed");
    Ok(Json(UserResponse::new(user)))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    WithRejection(Path(id), _): UserId,
) -> ApiResult<StatusCode> {
    if !state.users.delete(id).await? {
        return Err(user_not_found());
    }
    info!(user_id = %id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
