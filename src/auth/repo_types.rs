use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string or an unusable marker
    pub created_at: OffsetDateTime,
}

/// Row to insert; the id and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub username: String,
    pub password_hash: String,
}

/// Bearer token, one per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthToken {
    pub key: String,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailAddress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

/// Descriptive user fields a nested profile update may overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.first_name.is_none() && self.last_name.is_none()
    }

    pub fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(first_name) = &self.first_name {
            user.first_name = first_name.clone();
        }
        if let Some(last_name) = &self.last_name {
            user.last_name = last_name.clone();
        }
    }
}
