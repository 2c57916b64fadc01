//! In-process collaborators for tests.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    mail::{Email, Mailer},
    users::{
        repo::{StoreError, StoreResult, UserStore},
        repo_types::{NewUser, PendingReset, ProfileUpdate, Role, User},
    },
};

#[derive(Default)]
pub struct MemoryUserStore {
    rows: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    /// Raw row access, including deactivated users.
    pub fn get_raw(&self, id: Uuid) -> Option<User> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn force_role(&self, id: Uuid, role: Role) {
        if let Some(u) = self.rows.lock().unwrap().get_mut(&id) {
            u.role = role;
        }
    }

    pub fn force_reset_expiry(&self, id: Uuid, at: OffsetDateTime) {
        if let Some(u) = self.rows.lock().unwrap().get_mut(&id) {
            u.password_reset_expires = Some(at);
        }
    }

    pub fn force_password_changed_at(&self, id: Uuid, at: OffsetDateTime) {
        if let Some(u) = self.rows.lock().unwrap().get_mut(&id) {
            u.password_changed_at = Some(at);
        }
    }
}

fn reset_matches(u: &User, digest: &str, now: OffsetDateTime) -> bool {
    u.active
        && u.password_reset_token.as_deref() == Some(digest)
        && u.password_reset_expires.map_or(false, |exp| exp > now)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, new: NewUser) -> StoreResult<User> {
        let mut rows = self.rows.lock().unwrap();
        if rows.values().any(|u| u.email == new.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            photo: None,
            role: Role::default(),
            password_hash: new.password_hash,
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&id).filter(|u| u.active).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.values().find(|u| u.active && u.email == email).cloned())
    }

    async fn find_by_reset_digest(
        &self,
        digest: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.values().find(|u| reset_matches(u, digest, now)).cloned())
    }

    async fn set_reset_token(&self, id: Uuid, reset: Option<PendingReset>) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(u) = rows.get_mut(&id) {
            u.password_reset_token = reset.as_ref().map(|r| r.digest.clone());
            u.password_reset_expires = reset.map(|r| r.expires_at);
        }
        Ok(())
    }

    async fn restore_reset_token(
        &self,
        id: Uuid,
        ours: &str,
        previous: Option<PendingReset>,
    ) -> StoreResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows
            .get_mut(&id)
            .filter(|u| u.password_reset_token.as_deref() == Some(ours))
        {
            Some(u) => {
                u.password_reset_token = previous.as_ref().map(|r| r.digest.clone());
                u.password_reset_expires = previous.map(|r| r.expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume_reset_token(
        &self,
        digest: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(u) = rows.values_mut().find(|u| reset_matches(u, digest, now)) else {
            return Ok(None);
        };
        u.password_hash = password_hash.to_string();
        u.password_changed_at = Some(changed_at);
        u.password_reset_token = None;
        u.password_reset_expires = None;
        Ok(Some(u.clone()))
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.get_mut(&id).filter(|u| u.active).map(|u| {
            u.password_hash = password_hash.to_string();
            u.password_changed_at = Some(changed_at);
            u.clone()
        }))
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<User>> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(email) = &update.email {
            if rows.values().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::DuplicateEmail);
            }
        }
        Ok(rows.get_mut(&id).filter(|u| u.active).map(|u| {
            if let Some(name) = update.name {
                u.name = name;
            }
            if let Some(email) = update.email {
                u.email = email;
            }
            u.clone()
        }))
    }

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<User>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.get_mut(&id).filter(|u| u.active).map(|u| {
            u.role = role;
            u.clone()
        }))
    }

    async fn deactivate(&self, id: Uuid) -> StoreResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        Ok(match rows.get_mut(&id).filter(|u| u.active) {
            Some(u) => {
                u.active = false;
                true
            }
            None => false,
        })
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        let rows = self.rows.lock().unwrap();
        let mut users: Vec<User> = rows.values().filter(|u| u.active).cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }
}

/// Every call fails as if the database were down.
pub struct UnavailableUserStore;

fn unavailable<T>() -> StoreResult<T> {
    Err(StoreError::Other(anyhow::anyhow!(
        "pool timed out while waiting for an open connection"
    )))
}

#[async_trait]
impl UserStore for UnavailableUserStore {
    async fn insert(&self, _new: NewUser) -> StoreResult<User> {
        unavailable()
    }

    async fn find_by_id(&self, _id: Uuid) -> StoreResult<Option<User>> {
        unavailable()
    }

    async fn find_by_email(&self, _email: &str) -> StoreResult<Option<User>> {
        unavailable()
    }

    async fn find_by_reset_digest(
        &self,
        _digest: &str,
        _now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        unavailable()
    }

    async fn set_reset_token(&self, _id: Uuid, _reset: Option<PendingReset>) -> StoreResult<()> {
        unavailable()
    }

    async fn restore_reset_token(
        &self,
        _id: Uuid,
        _ours: &str,
        _previous: Option<PendingReset>,
    ) -> StoreResult<bool> {
        unavailable()
    }

    async fn consume_reset_token(
        &self,
        _digest: &str,
        _now: OffsetDateTime,
        _password_hash: &str,
        _changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        unavailable()
    }

    async fn update_password(
        &self,
        _id: Uuid,
        _password_hash: &str,
        _changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        unavailable()
    }

    async fn update_profile(&self, _id: Uuid, _update: ProfileUpdate) -> StoreResult<Option<User>> {
        unavailable()
    }

    async fn set_role(&self, _id: Uuid, _role: Role) -> StoreResult<Option<User>> {
        unavailable()
    }

    async fn deactivate(&self, _id: Uuid) -> StoreResult<bool> {
        unavailable()
    }

    async fn delete(&self, _id: Uuid) -> StoreResult<bool> {
        unavailable()
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        unavailable()
    }
}

/// Keeps every message; can be told to fail.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        let m = Self::default();
        m.fail.store(true, Ordering::SeqCst);
        m
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    /// Pulls the plaintext reset token out of the last reset link.
    pub fn last_reset_token(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let text = &sent.last()?.text;
        let start = text.find("/resetPassword/")? + "/resetPassword/".len();
        Some(
            text[start..]
                .chars()
                .take_while(|c| c.is_ascii_hexdigit())
                .collect(),
        )
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("smtp connection refused");
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}
