use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use tracing::warn;

use super::{claims::Claims, services::AuthService};
use crate::{
    error::AppError,
    state::AppState,
    users::repo_types::{Role, User},
};

pub const TOKEN_COOKIE: &str = "jwt";

/// Identity established by `protect`, threaded to later gates and handlers as
/// a request extension.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub claims: Claims,
}

impl AuthContext {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.user.role) {
            Ok(())
        } else {
            warn!(user_id = %self.user.id, role = ?self.user.role, "role not allowed");
            Err(AppError::Authorization(
                "You do not have permission to perform this action".into(),
            ))
        }
    }
}

fn not_logged_in() -> AppError {
    AppError::Authentication("You are not logged in! Please log in to get access.".into())
}

/// `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Header first, then the `jwt` cookie.
pub fn request_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = bearer_token(headers) {
        return Some(token.to_owned());
    }
    CookieJar::from_headers(headers)
        .get(TOKEN_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|t| !t.is_empty())
}

/// Gate: rejects the request unless it carries a valid token for a live user
/// whose password has not changed since the token was issued.
pub async fn protect(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request_token(req.headers()).ok_or_else(not_logged_in)?;
    let ctx = AuthService::from_ref(&state).authenticate(&token).await?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

#[derive(Debug, Clone, Copy)]
pub struct AllowedRoles(pub &'static [Role]);

pub const ADMIN_ONLY: AllowedRoles = AllowedRoles(&[Role::Admin]);

/// Gate: must sit behind `protect`.
pub async fn restrict_to(
    State(allowed): State<AllowedRoles>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .ok_or_else(not_logged_in)?;
    ctx.require_role(allowed.0)?;
    Ok(next.run(req).await)
}

/// The user attached by `protect`.
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .map(|ctx| CurrentUser(ctx.user.clone()))
            .ok_or_else(not_logged_in)
    }
}
