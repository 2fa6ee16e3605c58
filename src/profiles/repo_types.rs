use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use time::Date;
use uuid::Uuid;

use crate::auth::repo_types::User;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Profile record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid, // owning user, fixed for the lifetime of the row
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub fields: ProfileFields,
}

/// Descriptive columns of a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProfileFields {
    pub profile_image: Option<String>, // object storage key
    pub weblink: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub street_name: Option<String>,
    pub house_number: Option<String>,
    #[serde(default, with = "iso_date::option")]
    pub birthdate: Option<Date>,
    pub gender: Option<String>,
    pub social_security_number: Option<String>,
    pub citizenship: Option<String>,
    pub bio: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

/// A present key, possibly `null`.
fn nullable<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

fn nullable_date<'de, D>(d: D) -> Result<Option<Option<Date>>, D::Error>
where
    D: Deserializer<'de>,
{
    iso_date::option::deserialize(d).map(Some)
}

/// Per-field update: `None` keeps the stored value, `Some(None)` clears it.
/// The image key is only written through the upload endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileChanges {
    #[serde(default, deserialize_with = "nullable")]
    pub weblink: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub phone_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub city: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub state: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub street_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub house_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable_date")]
    pub birthdate: Option<Option<Date>>,
    #[serde(default, deserialize_with = "nullable")]
    pub gender: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub social_security_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub citizenship: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub bio: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub zip_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub country: Option<Option<String>>,
}

fn assign<T: Clone>(slot: &mut Option<T>, change: &Option<Option<T>>) {
    if let Some(value) = change {
        *slot = value.clone();
    }
}

impl ProfileChanges {
    pub fn apply(&self, fields: &mut ProfileFields) {
        assign(&mut fields.weblink, &self.weblink);
        assign(&mut fields.phone_number, &self.phone_number);
        assign(&mut fields.address, &self.address);
        assign(&mut fields.city, &self.city);
        assign(&mut fields.state, &self.state);
        assign(&mut fields.street_name, &self.street_name);
        assign(&mut fields.house_number, &self.house_number);
        assign(&mut fields.birthdate, &self.birthdate);
        assign(&mut fields.gender, &self.gender);
        assign(&mut fields.social_security_number, &self.social_security_number);
        assign(&mut fields.citizenship, &self.citizenship);
        assign(&mut fields.bio, &self.bio);
        assign(&mut fields.zip_code, &self.zip_code);
        assign(&mut fields.country, &self.country);
    }
}

/// A profile joined with the public columns of its owner.
#[derive(Debug, Clone, FromRow)]
pub struct ProfileRecord {
    #[sqlx(flatten)]
    pub profile: Profile,
    pub owner_email: String,
    pub owner_name: String,
}

impl ProfileRecord {
    pub fn new(profile: Profile, owner: &User) -> Self {
        Self {
            profile,
            owner_email: owner.email.clone(),
            owner_name: owner.name.clone(),
        }
    }
}

/// Result of a profile update that may also touch the owning user.
#[derive(Debug)]
pub enum UpdateOutcome {
    Updated(ProfileRecord),
    ProfileMissing,
    /// The profile exists but its user row is gone; nothing was written.
    UserMissing,
}
