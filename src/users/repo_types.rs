use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "user_role", rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: Option<String>,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, never exposed
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub password_reset_token: Option<String>, // sha256 hex of the mailed secret
    #[serde(skip_serializing)]
    pub password_reset_expires: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub active: bool,
    pub created_at: OffsetDateTime,
}

impl User {
    /// True when the password was replaced after a token issued at `iat`
    /// (unix seconds) was signed.
    pub fn changed_password_after(&self, iat: i64) -> bool {
        match self.password_changed_at {
            Some(changed) => iat < changed.unix_timestamp(),
            None => false,
        }
    }

    pub fn pending_reset(&self) -> Option<PendingReset> {
        match (&self.password_reset_token, self.password_reset_expires) {
            (Some(digest), Some(expires_at)) => Some(PendingReset {
                digest: digest.clone(),
                expires_at,
            }),
            _ => None,
        }
    }
}

/// Fields written at signup. Role is never client-controlled.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// The only profile fields a user may change on themselves.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Reset digest and expiry always travel together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReset {
    pub digest: String,
    pub expires_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn user_changed_at(changed: Option<OffsetDateTime>) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Ann".into(),
            email: "ann@x.com".into(),
            photo: None,
            role: Role::User,
            password_hash: "$argon2id$...".into(),
            password_changed_at: changed,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn never_changed_means_every_token_is_fresh() {
        let user = user_changed_at(None);
        assert!(!user.changed_password_after(0));
    }

    #[test]
    fn tokens_before_the_change_are_stale() {
        let changed = OffsetDateTime::now_utc();
        let user = user_changed_at(Some(changed));
        let ts = changed.unix_timestamp();
        assert!(user.changed_password_after(ts - 10));
        assert!(!user.changed_password_after(ts));
        assert!(!user.changed_password_after(ts + 10));
    }

    #[test]
    fn token_issued_right_after_stamp_survives() {
        // stamps are backdated a second, so a token signed "now" is fresh
        let now = OffsetDateTime::now_utc();
        let user = user_changed_at(Some(now - Duration::seconds(1)));
        assert!(!user.changed_password_after(now.unix_timestamp()));
    }

    #[test]
    fn role_uses_kebab_case_on_the_wire() {
        assert_eq!(serde_json::to_string(&Role::LeadGuide).unwrap(), "\"lead-guide\"");
        let r: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(r, Role::Admin);
        assert_eq!(Role::default(), Role::User);
    }

    #[test]
    fn serialized_user_hides_secrets() {
        let mut user = user_changed_at(None);
        user.password_reset_token = Some("abc".into());
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("password_reset_token").is_none());
        assert!(json.get("active").is_none());
    }
}
