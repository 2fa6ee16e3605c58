use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::profiles::dto::ProfileView;

/// Request body for account creation. Missing fields are reported as
/// validation errors rather than rejected by the JSON extractor.
#[derive(Debug, Default, Deserialize)]
pub struct SignupRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
}

/// Request body for login. `username` also matches the account email.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "email")]
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Response returned after login. `profile` is `null` for users without one.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: PublicUser,
    pub profile: Option<ProfileView>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
        }
    }
}
