use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{SignupRequest, UpdatePasswordRequest},
    extractors::AuthContext,
    jwt::{JwtKeys, TokenError},
    password::PasswordHasher,
    reset_token,
};
use crate::{
    error::{ApiResult, AppError},
    mail::{Email, Mailer},
    state::AppState,
    users::{
        repo::UserStore,
        repo_types::{NewUser, User},
    },
};

pub(crate) const MIN_PASSWORD_LEN: usize = 8;
const BAD_CREDENTIALS: &str = "Incorrect email or password";
const BAD_RESET_TOKEN: &str = "Token is invalid or has expired";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn validate_new_password(password: &str, confirm: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password != confirm {
        return Err(AppError::Validation("Passwords do not match!".into()));
    }
    Ok(())
}

/// Backdated by a second so a token signed right after the change is fresh.
fn password_stamp() -> OffsetDateTime {
    OffsetDateTime::now_utc() - Duration::seconds(1)
}

/// A freshly signed token and the user it was issued for.
#[derive(Debug)]
pub struct Issued {
    pub token: String,
    pub user: User,
}

/// Orchestrates signup, login, token checks and the password lifecycle.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    keys: JwtKeys,
    hasher: PasswordHasher,
    reset_ttl: Duration,
    public_url: String,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self {
            users: state.users.clone(),
            mailer: state.mailer.clone(),
            keys: JwtKeys::from_ref(state),
            hasher: state.hasher.clone(),
            reset_ttl: Duration::minutes(state.config.reset.ttl_minutes),
            public_url: state.config.public_url.clone(),
        }
    }
}

impl AuthService {
    fn issue(&self, user: User) -> ApiResult<Issued> {
        let token = self
            .keys
            .sign(user.id)
            .map_err(|e| AppError::Internal(e.into()))?;
        Ok(Issued { token, user })
    }

    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn signup(&self, req: SignupRequest) -> ApiResult<Issued> {
        let name = req.name.trim().to_string();
        let email = normalize_email(&req.email);

        if name.is_empty() {
            return Err(AppError::Validation("Please tell us your name!".into()));
        }
        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(AppError::Validation("Please provide a valid email".into()));
        }
        validate_new_password(&req.password, &req.password_confirm)?;

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AppError::Conflict("Email already registered".into()));
        }

        let password_hash = self.hasher.hash(req.password).await?;
        let user = self
            .users
            .insert(NewUser {
                name,
                email,
                password_hash,
            })
            .await?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        self.issue(user)
    }

    #[instrument(skip(self, email, password))]
    pub async fn login(&self, email: Option<String>, password: Option<String>) -> ApiResult<Issued> {
        let (email, password) = match (email, password) {
            (Some(e), Some(p)) if !e.trim().is_empty() && !p.is_empty() => (normalize_email(&e), p),
            _ => {
                return Err(AppError::Validation(
                    "Please provide email and password!".into(),
                ))
            }
        };

        let Some(user) = self.users.find_by_email(&email).await? else {
            warn!(email = %email, "login unknown email");
            return Err(AppError::Authentication(BAD_CREDENTIALS.into()));
        };

        if !self
            .hasher
            .verify(password, user.password_hash.clone())
            .await?
        {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::Authentication(BAD_CREDENTIALS.into()));
        }

        info!(user_id = %user.id, "user logged in");
        self.issue(user)
    }

    /// The gates behind `protect` once a token has been pulled off the request:
    /// verify, resolve the user, then check the password is older than the token.
    pub async fn authenticate(&self, token: &str) -> ApiResult<AuthContext> {
        let claims = self.keys.verify(token).map_err(|e| {
            warn!(error = %e, "token rejected");
            match e {
                TokenError::Expired => {
                    AppError::Authentication("Your token has expired! Please log in again.".into())
                }
                _ => AppError::Authentication("Invalid token. Please log in again!".into()),
            }
        })?;

        let user = self.users.find_by_id(claims.sub).await?.ok_or_else(|| {
            AppError::Authentication(
                "The user belonging to this token does no longer exist.".into(),
            )
        })?;

        if user.changed_password_after(claims.iat) {
            warn!(user_id = %user.id, "token predates password change");
            return Err(AppError::Authentication(
                "User recently changed password! Please log in again.".into(),
            ));
        }

        Ok(AuthContext { user, claims })
    }

    /// Mints a reset token and mails it. If the mail cannot be sent the
    /// user's reset fields are put back the way they were, unless a newer
    /// request has already replaced this one's token.
    #[instrument(skip(self, email))]
    pub async fn forgot_password(&self, email: Option<String>) -> ApiResult<()> {
        let email = email.map(|e| normalize_email(&e)).unwrap_or_default();
        if email.is_empty() {
            return Err(AppError::Validation(
                "Please provide your email address.".into(),
            ));
        }

        let user = self.users.find_by_email(&email).await?.ok_or_else(|| {
            AppError::NotFound("There is no user with that email address.".into())
        })?;

        let previous = user.pending_reset();
        let reset = reset_token::generate(OffsetDateTime::now_utc(), self.reset_ttl);
        self.users
            .set_reset_token(user.id, Some(reset.pending.clone()))
            .await?;

        let reset_url = format!(
            "{}/api/v1/users/resetPassword/{}",
            self.public_url, reset.plaintext
        );
        let email = Email {
            to: user.email.clone(),
            subject: format!(
                "Your password reset token (valid for {} minutes)",
                self.reset_ttl.whole_minutes()
            ),
            text: format!(
                "Forgot your password? Submit a PATCH request with your new password and \
                 passwordConfirm to: {reset_url}\nIf you didn't forget your password, \
                 please ignore this email!"
            ),
        };

        if let Err(e) = self.mailer.send(email).await {
            error!(error = ?e, user_id = %user.id, "reset email failed; rolling back token");
            let restored = self
                .users
                .restore_reset_token(user.id, &reset.pending.digest, previous)
                .await?;
            if !restored {
                warn!(user_id = %user.id, "reset token replaced meanwhile; left as is");
            }
            return Err(AppError::Service(
                "There was an error sending the email. Try again later!".into(),
            ));
        }

        info!(user_id = %user.id, "password reset token sent");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        token: &str,
        password: String,
        password_confirm: String,
    ) -> ApiResult<Issued> {
        let digest = reset_token::digest(token);

        let user = self
            .users
            .find_by_reset_digest(&digest, OffsetDateTime::now_utc())
            .await?
            .ok_or_else(|| AppError::Authentication(BAD_RESET_TOKEN.into()))?;

        validate_new_password(&password, &password_confirm)?;
        let password_hash = self.hasher.hash(password).await?;

        // a concurrent reset may have used the token while we were hashing
        let user = self
            .users
            .consume_reset_token(
                &digest,
                OffsetDateTime::now_utc(),
                &password_hash,
                password_stamp(),
            )
            .await?
            .ok_or_else(|| {
                warn!(user_id = %user.id, "reset token consumed concurrently");
                AppError::Authentication(BAD_RESET_TOKEN.into())
            })?;

        info!(user_id = %user.id, "password reset");
        self.issue(user)
    }

    #[instrument(skip(self, req))]
    pub async fn update_password(
        &self,
        user_id: Uuid,
        req: UpdatePasswordRequest,
    ) -> ApiResult<Issued> {
        let user = self.users.find_by_id(user_id).await?.ok_or_else(|| {
            AppError::Authentication(
                "The user belonging to this token does no longer exist.".into(),
            )
        })?;

        if !self
            .hasher
            .verify(req.password_current, user.password_hash.clone())
            .await?
        {
            warn!(user_id = %user.id, "wrong current password");
            return Err(AppError::Authentication(
                "Your current password is wrong.".into(),
            ));
        }

        validate_new_password(&req.password, &req.password_confirm)?;
        let password_hash = self.hasher.hash(req.password).await?;

        let user = self
            .users
            .update_password(user.id, &password_hash, password_stamp())
            .await?
            .ok_or_else(|| {
                AppError::Authentication(
                    "The user belonging to this token does no longer exist.".into(),
                )
            })?;

        info!(user_id = %user.id, "password updated");
        self.issue(user)
    }
}
