use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Role, User};

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: Option<String>,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            photo: u.photo,
            role: u.role,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserData {
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub status: &'static str,
    pub data: UserData,
}

impl UserResponse {
    pub fn new(user: User) -> Self {
        Self {
            status: "success",
            data: UserData { user: user.into() },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UsersData {
    pub users: Vec<PublicUser>,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub status: &'static str,
    pub results: usize,
    pub data: UsersData,
}

/// Body of PATCH /updateMe. Only `name` and `email` are honoured; password
/// fields are recognised so they can be rejected, everything else is dropped.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<serde::de::IgnoredAny>,
    pub password_confirm: Option<serde::de::IgnoredAny>,
}

/// Body of the admin-only PATCH /users/:id.
#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}
