use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::dto::PublicUser;
use crate::profiles::repo_types::{ProfileChanges, ProfileFields, ProfileRecord};

/// Profile as returned to clients, with its owner nested under `user`.
#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: Uuid,
    pub user: PublicUser,
    #[serde(flatten)]
    pub fields: ProfileFields,
}

impl From<ProfileRecord> for ProfileView {
    fn from(r: ProfileRecord) -> Self {
        Self {
            id: r.profile.id,
            user: PublicUser {
                id: r.profile.user_id,
                email: r.owner_email,
                name: r.owner_name,
            },
            fields: r.profile.fields,
        }
    }
}

/// Owner fields accepted when a profile is created together with its user.
#[derive(Debug, Default, Deserialize)]
pub struct NestedUserCreate {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileCreateRequest {
    pub user: Option<NestedUserCreate>,
    #[serde(flatten)]
    pub changes: ProfileChanges,
}

/// Owner fields a profile update may carry. Anything else is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct NestedUserUpdate {
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdateRequest {
    pub user: Option<NestedUserUpdate>,
    #[serde(flatten)]
    pub changes: ProfileChanges,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileFilter {
    #[serde(alias = "user__id")]
    pub user_id: Option<Uuid>,
}
