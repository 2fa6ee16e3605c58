use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgArguments, query::QueryAs, Postgres};
use uuid::Uuid;

use crate::auth::repo::USER_COLUMNS;
use crate::auth::repo_types::{NewUser, User, UserChanges};
use crate::db::PgStore;
use crate::profiles::repo_types::{
    Profile, ProfileChanges, ProfileFields, ProfileRecord, UpdateOutcome,
};

/// Persistence for profiles. Multi-row writes are atomic.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn list_profiles(&self, owner: Option<Uuid>) -> anyhow::Result<Vec<ProfileRecord>>;
    async fn find_profile(&self, user_id: Uuid) -> anyhow::Result<Option<ProfileRecord>>;
    /// Creates an empty profile for `user_id` unless one exists.
    async fn ensure_profile(&self, user_id: Uuid) -> anyhow::Result<()>;
    async fn create_profile_with_user(
        &self,
        user: &NewUser,
        fields: &ProfileFields,
    ) -> anyhow::Result<ProfileRecord>;
    async fn update_profile(
        &self,
        user_id: Uuid,
        changes: &ProfileChanges,
        user_changes: Option<&UserChanges>,
    ) -> anyhow::Result<UpdateOutcome>;
    async fn set_profile_image(
        &self,
        user_id: Uuid,
        key: Option<&str>,
    ) -> anyhow::Result<Option<ProfileRecord>>;
    /// Returns whether a profile was removed. The owning user is kept.
    async fn delete_profile(&self, user_id: Uuid) -> anyhow::Result<bool>;
}

const PROFILE_COLUMNS: &str = "id, user_id, profile_image, weblink, phone_number, address, \
     city, state, street_name, house_number, birthdate, gender, social_security_number, \
     citizenship, bio, zip_code, country";

const JOINED_COLUMNS: &str = "p.id, p.user_id, p.profile_image, p.weblink, p.phone_number, \
     p.address, p.city, p.state, p.street_name, p.house_number, p.birthdate, p.gender, \
     p.social_security_number, p.citizenship, p.bio, p.zip_code, p.country, \
     u.email AS owner_email, u.name AS owner_name";

type ProfileQuery<'q> = QueryAs<'q, Postgres, Profile, PgArguments>;

/// Binds the descriptive columns in `PROFILE_COLUMNS` order, after `id, user_id`.
fn bind_fields<'q>(query: ProfileQuery<'q>, f: &ProfileFields) -> ProfileQuery<'q> {
    query
        .bind(f.profile_image.clone())
        .bind(f.weblink.clone())
        .bind(f.phone_number.clone())
        .bind(f.address.clone())
        .bind(f.city.clone())
        .bind(f.state.clone())
        .bind(f.street_name.clone())
        .bind(f.house_number.clone())
        .bind(f.birthdate)
        .bind(f.gender.clone())
        .bind(f.social_security_number.clone())
        .bind(f.citizenship.clone())
        .bind(f.bio.clone())
        .bind(f.zip_code.clone())
        .bind(f.country.clone())
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn list_profiles(&self, owner: Option<Uuid>) -> anyhow::Result<Vec<ProfileRecord>> {
        let sql = format!(
            "SELECT {JOINED_COLUMNS} FROM profiles p JOIN users u ON u.id = p.user_id \
             WHERE ($1::uuid IS NULL OR p.user_id = $1) ORDER BY u.created_at ASC"
        );
        let rows = sqlx::query_as::<_, ProfileRecord>(&sql)
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .context("list profiles")?;
        Ok(rows)
    }

    async fn find_profile(&self, user_id: Uuid) -> anyhow::Result<Option<ProfileRecord>> {
        let sql = format!(
            "SELECT {JOINED_COLUMNS} FROM profiles p JOIN users u ON u.id = p.user_id \
             WHERE p.user_id = $1"
        );
        let row = sqlx::query_as::<_, ProfileRecord>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("find profile by user")?;
        Ok(row)
    }

    async fn ensure_profile(&self, user_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("ensure profile")?;
        Ok(())
    }

    async fn create_profile_with_user(
        &self,
        user: &NewUser,
        fields: &ProfileFields,
    ) -> anyhow::Result<ProfileRecord> {
        let mut tx = self.pool.begin().await.context("begin tx")?;

        let owner = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, name, username, password_hash) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.username)
        .bind(&user.password_hash)
        .fetch_one(&mut *tx)
        .await
        .context("insert nested user")?;

        let sql = format!(
            "INSERT INTO profiles ({PROFILE_COLUMNS}) VALUES \
             (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {PROFILE_COLUMNS}"
        );
        let profile = bind_fields(sqlx::query_as::<_, Profile>(&sql).bind(owner.id), fields)
            .fetch_one(&mut *tx)
            .await
            .context("insert profile")?;

        tx.commit().await.context("commit tx")?;
        Ok(ProfileRecord::new(profile, &owner))
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        changes: &ProfileChanges,
        user_changes: Option<&UserChanges>,
    ) -> anyhow::Result<UpdateOutcome> {
        let mut tx = self.pool.begin().await.context("begin tx")?;

        let current = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("lock profile")?;
        // returning early drops `tx`, which rolls it back
        let Some(mut profile) = current else {
            return Ok(UpdateOutcome::ProfileMissing);
        };

        let owner = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(profile.user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("lock owner")?;
        let Some(mut owner) = owner else {
            return Ok(UpdateOutcome::UserMissing);
        };

        if let Some(user_changes) = user_changes {
            user_changes.apply(&mut owner);
            sqlx::query("UPDATE users SET name = $2, first_name = $3, last_name = $4 WHERE id = $1")
                .bind(owner.id)
                .bind(&owner.name)
                .bind(&owner.first_name)
                .bind(&owner.last_name)
                .execute(&mut *tx)
                .await
                .context("update owner")?;
        }

        changes.apply(&mut profile.fields);
        let sql = format!(
            "UPDATE profiles SET profile_image = $2, weblink = $3, phone_number = $4, \
             address = $5, city = $6, state = $7, street_name = $8, house_number = $9, \
             birthdate = $10, gender = $11, social_security_number = $12, citizenship = $13, \
             bio = $14, zip_code = $15, country = $16 \
             WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        );
        let profile = bind_fields(
            sqlx::query_as::<_, Profile>(&sql).bind(profile.id),
            &profile.fields,
        )
        .fetch_one(&mut *tx)
        .await
        .context("update profile")?;

        tx.commit().await.context("commit tx")?;
        Ok(UpdateOutcome::Updated(ProfileRecord::new(profile, &owner)))
    }

    async fn set_profile_image(
        &self,
        user_id: Uuid,
        key: Option<&str>,
    ) -> anyhow::Result<Option<ProfileRecord>> {
        let updated = sqlx::query("UPDATE profiles SET profile_image = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .context("set profile image")?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_profile(user_id).await
    }

    async fn delete_profile(&self, user_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM profiles WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("delete profile")?;
        Ok(res.rows_affected() > 0)
    }
}
