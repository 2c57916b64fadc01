use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{patch, post},
    Json, Router,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar, WithRejection,
};
use tracing::instrument;

use super::{
    dto::{
        AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, ResetPasswordRequest,
        SignupRequest, UpdatePasswordRequest,
    },
    extractors::{CurrentUser, TOKEN_COOKIE},
    services::{AuthService, Issued},
};
use crate::{
    error::{ApiResult, AppError},
    state::AppState,
};

type Body<T> = WithRejection<Json<T>, AppError>;
type TokenReply = (StatusCode, CookieJar, Json<AuthResponse>);

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/:token", patch(reset_password))
}

/// Needs `protect` in front.
pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/updateMyPassword", patch(update_password))
}

/// Puts the token in both the body and an http-only cookie.
fn send_token(state: &AppState, jar: CookieJar, issued: Issued, status: StatusCode) -> TokenReply {
    let cookie = Cookie::build((TOKEN_COOKIE, issued.token.clone()))
        .http_only(true)
        .secure(state.config.is_production())
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::days(state.config.jwt.cookie_expires_days));
    (
        status,
        jar.add(cookie),
        Json(AuthResponse::new(issued.token, issued.user.into())),
    )
}

#[instrument(skip(state, jar, payload))]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): Body<SignupRequest>,
) -> ApiResult<TokenReply> {
    let issued = AuthService::from_ref(&state).signup(payload).await?;
    Ok(send_token(&state, jar, issued, StatusCode::CREATED))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): Body<LoginRequest>,
) -> ApiResult<TokenReply> {
    let issued = AuthService::from_ref(&state)
        .login(payload.email, payload.password)
        .await?;
    Ok(send_token(&state, jar, issued, StatusCode::OK))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): Body<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    AuthService::from_ref(&state)
        .forgot_password(payload.email)
        .await?;
    Ok(Json(MessageResponse {
        status: "success",
        message: "Token sent to email!".into(),
    }))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(token): Path<String>,
    WithRejection(Json(payload), _): Body<ResetPasswordRequest>,
) -> ApiResult<TokenReply> {
    let issued = AuthService::from_ref(&state)
        .reset_password(&token, payload.password, payload.password_confirm)
        .await?;
    Ok(send_token(&state, jar, issued, StatusCode::OK))
}

#[instrument(skip(state, jar, user, payload), fields(user_id = %user.id))]
pub async fn update_password(
    State(state): State<AppState>,
    jar: CookieJar,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(payload), _): Body<UpdatePasswordRequest>,
) -> ApiResult<TokenReply> {
    let issued = AuthService::from_ref(&state)
        .update_password(user.id, payload)
        .await?;
    Ok(send_token(&state, jar, issued, StatusCode::OK))
}
