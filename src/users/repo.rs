use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, PendingReset, ProfileUpdate, Role, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Credential store. Every read skips deactivated users.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, new: NewUser) -> StoreResult<User>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Users holding an unexpired reset token with this digest.
    async fn find_by_reset_digest(&self, digest: &str, now: OffsetDateTime)
        -> StoreResult<Option<User>>;
    /// Writes only the two reset columns; `None` clears them.
    async fn set_reset_token(&self, id: Uuid, reset: Option<PendingReset>) -> StoreResult<()>;
    /// Puts `previous` back, but only while the stored digest is still `ours`.
    /// Returns false when another request has replaced it since.
    async fn restore_reset_token(
        &self,
        id: Uuid,
        ours: &str,
        previous: Option<PendingReset>,
    ) -> StoreResult<bool>;
    /// Swaps the password and clears the reset fields in one step, provided the
    /// digest still matches and has not expired at `now`.
    async fn consume_reset_token(
        &self,
        digest: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>>;
    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<User>>;
    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<User>>;
    async fn deactivate(&self, id: Uuid) -> StoreResult<bool>;
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
    async fn list(&self) -> StoreResult<Vec<User>>;
}

const COLUMNS: &str = "id, name, email, photo, role, password_hash, password_changed_at, \
     password_reset_token, password_reset_expires, active, created_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_db_error(e: sqlx::Error, what: &'static str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return StoreError::DuplicateEmail;
        }
    }
    StoreError::Other(anyhow::Error::new(e).context(what))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, new: NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_db_error(e, "insert user"))?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users WHERE id = $1 AND active"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users WHERE email = $1 AND active"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_reset_digest(
        &self,
        digest: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {COLUMNS} FROM users
            WHERE password_reset_token = $1
              AND password_reset_expires > $2
              AND active
            "#
        ))
        .bind(digest)
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("find user by reset digest")?;
        Ok(user)
    }

    async fn set_reset_token(&self, id: Uuid, reset: Option<PendingReset>) -> StoreResult<()> {
        let (digest, expires_at) = match reset {
            Some(r) => (Some(r.digest), Some(r.expires_at)),
            None => (None, None),
        };
        sqlx::query(
            r#"
            UPDATE users
               SET password_reset_token = $2,
                   password_reset_expires = $3
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(digest)
        .bind(expires_at)
        .execute(&self.db)
        .await
        .context("set reset token")?;
        Ok(())
    }

    async fn restore_reset_token(
        &self,
        id: Uuid,
        ours: &str,
        previous: Option<PendingReset>,
    ) -> StoreResult<bool> {
        let (digest, expires_at) = match previous {
            Some(r) => (Some(r.digest), Some(r.expires_at)),
            None => (None, None),
        };
        let res = sqlx::query(
            r#"
            UPDATE users
               SET password_reset_token = $3,
                   password_reset_expires = $4
             WHERE id = $1
               AND password_reset_token = $2
            "#,
        )
        .bind(id)
        .bind(ours)
        .bind(digest)
        .bind(expires_at)
        .execute(&self.db)
        .await
        .context("restore reset token")?;
        Ok(res.rows_affected() == 1)
    }

    async fn consume_reset_token(
        &self,
        digest: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET password_hash = $3,
                   password_changed_at = $4,
                   password_reset_token = NULL,
                   password_reset_expires = NULL
             WHERE password_reset_token = $1
               AND password_reset_expires > $2
               AND active
            RETURNING {COLUMNS}
            "#
        ))
        .bind(digest)
        .bind(now)
        .bind(password_hash)
        .bind(changed_at)
        .fetch_optional(&self.db)
        .await
        .context("consume reset token")?;
        Ok(user)
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET password_hash = $2,
                   password_changed_at = $3
             WHERE id = $1 AND active
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .fetch_optional(&self.db)
        .await
        .context("update password")?;
        Ok(user)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   email = COALESCE($3, email)
             WHERE id = $1 AND active
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.name)
        .bind(update.email)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_db_error(e, "update profile"))?;
        Ok(user)
    }

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 AND active RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(&self.db)
        .await
        .context("set role")?;
        Ok(user)
    }

    async fn deactivate(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE users SET active = FALSE WHERE id = $1 AND active")
            .bind(id)
            .execute(&self.db)
            .await
            .context("deactivate user")?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() == 1)
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {COLUMNS} FROM users WHERE active ORDER BY created_at"
        ))
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        Ok(users)
    }
}
