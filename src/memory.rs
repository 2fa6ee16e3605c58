use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::repo::UserStore;
use crate::auth::repo_types::{AuthToken, EmailAddress, NewUser, User, UserChanges};
use crate::profiles::repo::ProfileStore;
use crate::profiles::repo_types::{
    Profile, ProfileChanges, ProfileFields, ProfileRecord, UpdateOutcome,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    emails: Vec<EmailAddress>,
    tokens: HashMap<Uuid, AuthToken>, // by user id
    profiles: HashMap<Uuid, Profile>, // by user id
}

impl Tables {
    fn record(&self, profile: &Profile) -> Option<ProfileRecord> {
        let owner = self.users.get(&profile.user_id)?;
        Some(ProfileRecord::new(profile.clone(), owner))
    }

    fn insert_user(&mut self, new: &NewUser) -> anyhow::Result<User> {
        if self
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(&new.username))
        {
            anyhow::bail!("username {} already taken", new.username);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email.clone(),
            name: new.name.clone(),
            first_name: String::new(),
            last_name: String::new(),
            username: new.username.clone(),
            password_hash: new.password_hash.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }
}

/// In-process store. Every operation holds one lock, so multi-row writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops a user row while leaving its profile behind.
    #[cfg(test)]
    pub async fn forget_user(&self, id: Uuid) {
        self.tables.lock().await.users.remove(&id);
    }

    #[cfg(test)]
    pub async fn user(&self, id: Uuid) -> Option<User> {
        self.tables.lock().await.users.get(&id).cloned()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let tables = self.tables.lock().await;
        let mut matches: Vec<&User> = tables
            .users
            .values()
            .filter(|u| u.email.eq_ignore_ascii_case(email))
            .collect();
        matches.sort_by_key(|u| u.created_at);
        Ok(matches.first().map(|u| (*u).clone()))
    }

    async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn email_exists(&self, email: &str) -> anyhow::Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(email))
            || tables
                .emails
                .iter()
                .any(|e| e.email.eq_ignore_ascii_case(email)))
    }

    async fn username_exists(&self, username: &str) -> anyhow::Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(username)))
    }

    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User> {
        self.tables.lock().await.insert_user(user)
    }

    async fn add_email_address(
        &self,
        user_id: Uuid,
        email: &str,
        primary: bool,
        verified: bool,
    ) -> anyhow::Result<EmailAddress> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&user_id) {
            anyhow::bail!("user {user_id} does not exist");
        }
        if let Some(existing) = tables
            .emails
            .iter_mut()
            .find(|e| e.user_id == user_id && e.email == email)
        {
            existing.primary = primary;
            return Ok(existing.clone());
        }
        let row = EmailAddress {
            id: Uuid::new_v4(),
            user_id,
            email: email.to_string(),
            primary,
            verified,
        };
        tables.emails.push(row.clone());
        Ok(row)
    }

    async fn get_or_create_token(
        &self,
        user_id: Uuid,
        candidate: &str,
    ) -> anyhow::Result<AuthToken> {
        let mut tables = self.tables.lock().await;
        let token = tables.tokens.entry(user_id).or_insert_with(|| AuthToken {
            key: candidate.to_string(),
            user_id,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(token.clone())
    }

    async fn find_token(&self, key: &str) -> anyhow::Result<Option<AuthToken>> {
        let tables = self.tables.lock().await;
        Ok(tables.tokens.values().find(|t| t.key == key).cloned())
    }

    async fn delete_token(&self, user_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.tables.lock().await.tokens.remove(&user_id).is_some())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn list_profiles(&self, owner: Option<Uuid>) -> anyhow::Result<Vec<ProfileRecord>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<(OffsetDateTime, ProfileRecord)> = tables
            .profiles
            .values()
            .filter(|p| owner.map_or(true, |id| p.user_id == id))
            .filter_map(|p| {
                let owner = tables.users.get(&p.user_id)?;
                Some((owner.created_at, ProfileRecord::new(p.clone(), owner)))
            })
            .collect();
        rows.sort_by_key(|(created_at, _)| *created_at);
        Ok(rows.into_iter().map(|(_, r)| r).collect())
    }

    async fn find_profile(&self, user_id: Uuid) -> anyhow::Result<Option<ProfileRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.profiles.get(&user_id).and_then(|p| tables.record(p)))
    }

    async fn ensure_profile(&self, user_id: Uuid) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&user_id) {
            anyhow::bail!("user {user_id} does not exist");
        }
        tables.profiles.entry(user_id).or_insert_with(|| Profile {
            id: Uuid::new_v4(),
            user_id,
            fields: ProfileFields::default(),
        });
        Ok(())
    }

    async fn create_profile_with_user(
        &self,
        user: &NewUser,
        fields: &ProfileFields,
    ) -> anyhow::Result<ProfileRecord> {
        let mut tables = self.tables.lock().await;
        let owner = tables.insert_user(user)?;
        let profile = Profile {
            id: Uuid::new_v4(),
            user_id: owner.id,
            fields: fields.clone(),
        };
        tables.profiles.insert(owner.id, profile.clone());
        Ok(ProfileRecord::new(profile, &owner))
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        changes: &ProfileChanges,
        user_changes: Option<&UserChanges>,
    ) -> anyhow::Result<UpdateOutcome> {
        let mut tables = self.tables.lock().await;
        let Some(mut profile) = tables.profiles.get(&user_id).cloned() else {
            return Ok(UpdateOutcome::ProfileMissing);
        };
        let Some(mut owner) = tables.users.get(&profile.user_id).cloned() else {
            return Ok(UpdateOutcome::UserMissing);
        };

        if let Some(user_changes) = user_changes {
            user_changes.apply(&mut owner);
            tables.users.insert(owner.id, owner.clone());
        }
        changes.apply(&mut profile.fields);
        tables.profiles.insert(user_id, profile.clone());

        Ok(UpdateOutcome::Updated(ProfileRecord::new(profile, &owner)))
    }

    async fn set_profile_image(
        &self,
        user_id: Uuid,
        key: Option<&str>,
    ) -> anyhow::Result<Option<ProfileRecord>> {
        let mut tables = self.tables.lock().await;
        let Some(profile) = tables.profiles.get_mut(&user_id) else {
            return Ok(None);
        };
        profile.fields.profile_image = key.map(str::to_string);
        let profile = profile.clone();
        Ok(tables.record(&profile))
    }

    async fn delete_profile(&self, user_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.tables.lock().await.profiles.remove(&user_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, username: &str) -> NewUser {
        NewUser {
            email: email.into(),
            name: "Test".into(),
            username: username.into(),
            password_hash: "!unusable".into(),
        }
    }

    #[tokio::test]
    async fn token_is_created_once_per_user() {
        let store = MemoryStore::new();
        let user = store.insert_user(&new_user("a@example.com", "a")).await.unwrap();
        let first = store.get_or_create_token(user.id, "k1").await.unwrap();
        let second = store.get_or_create_token(user.id, "k2").await.unwrap();
        assert_eq!(first.key, "k1");
        assert_eq!(second.key, "k1");
        assert_eq!(store.find_token("k1").await.unwrap().unwrap().user_id, user.id);
        assert!(store.find_token("k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn email_lookup_ignores_case() {
        let store = MemoryStore::new();
        store.insert_user(&new_user("Mixed@Example.com", "m")).await.unwrap();
        assert!(store.email_exists("mixed@example.com").await.unwrap());
        assert!(store
            .find_user_by_email("MIXED@example.COM")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = MemoryStore::new();
        store.insert_user(&new_user("a@example.com", "same")).await.unwrap();
        assert!(store.insert_user(&new_user("b@example.com", "Same")).await.is_err());
    }

    #[tokio::test]
    async fn update_with_missing_owner_writes_nothing() {
        let store = MemoryStore::new();
        let record = store
            .create_profile_with_user(&new_user("a@example.com", "a"), &ProfileFields::default())
            .await
            .unwrap();
        let user_id = record.profile.user_id;
        store.forget_user(user_id).await;

        let changes = ProfileChanges {
            bio: Some(Some("changed".into())),
            ..Default::default()
        };
        let outcome = store.update_profile(user_id, &changes, None).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::UserMissing));

        let tables = store.tables.lock().await;
        assert_eq!(tables.profiles[&user_id].fields.bio, None);
    }
}
