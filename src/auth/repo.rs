use anyhow::Context;
use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::repo_types::{AuthToken, EmailAddress, NewUser, User};
use crate::db::PgStore;

/// Persistence for accounts, their email addresses and login tokens.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Case-insensitive match.
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;
    /// True when an account or a registered address already uses `email`.
    async fn email_exists(&self, email: &str) -> anyhow::Result<bool>;
    async fn username_exists(&self, username: &str) -> anyhow::Result<bool>;
    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User>;
    async fn add_email_address(
        &self,
        user_id: Uuid,
        email: &str,
        primary: bool,
        verified: bool,
    ) -> anyhow::Result<EmailAddress>;
    /// Stores `candidate` unless the user already has a token; returns the stored one.
    async fn get_or_create_token(&self, user_id: Uuid, candidate: &str)
        -> anyhow::Result<AuthToken>;
    async fn find_token(&self, key: &str) -> anyhow::Result<Option<AuthToken>>;
    /// Returns whether a token was removed.
    async fn delete_token(&self, user_id: Uuid) -> anyhow::Result<bool>;
}

pub(crate) const USER_COLUMNS: &str =
    "id, email, name, first_name, last_name, username, password_hash, created_at";

#[async_trait]
impl UserStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1) \
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("find user by username")?;
        Ok(user)
    }

    async fn email_exists(&self, email: &str) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (SELECT 1 FROM users WHERE lower(email) = lower($1))
                OR EXISTS (SELECT 1 FROM email_addresses WHERE lower(email) = lower($1))
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .context("check email exists")?;
        Ok(exists)
    }

    async fn username_exists(&self, username: &str) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE lower(username) = lower($1))",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .context("check username exists")?;
        Ok(exists)
    }

    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User> {
        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, name, username, password_hash) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.username)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .context("insert user")?;
        Ok(created)
    }

    async fn add_email_address(
        &self,
        user_id: Uuid,
        email: &str,
        primary: bool,
        verified: bool,
    ) -> anyhow::Result<EmailAddress> {
        let row = sqlx::query_as::<_, EmailAddress>(
            r#"
            INSERT INTO email_addresses (user_id, email, "primary", verified)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, email) DO UPDATE SET "primary" = EXCLUDED."primary"
            RETURNING id, user_id, email, "primary", verified
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(primary)
        .bind(verified)
        .fetch_one(&self.pool)
        .await
        .context("insert email address")?;
        Ok(row)
    }

    async fn get_or_create_token(
        &self,
        user_id: Uuid,
        candidate: &str,
    ) -> anyhow::Result<AuthToken> {
        // concurrent logins race on the unique user_id; the loser keeps the winner's key
        sqlx::query(
            r#"
            INSERT INTO auth_tokens (key, user_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(candidate)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("insert token")?;

        let token = sqlx::query_as::<_, AuthToken>(
            "SELECT key, user_id, created_at FROM auth_tokens WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("load token")?;
        Ok(token)
    }

    async fn find_token(&self, key: &str) -> anyhow::Result<Option<AuthToken>> {
        let token = sqlx::query_as::<_, AuthToken>(
            "SELECT key, user_id, created_at FROM auth_tokens WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("find token")?;
        Ok(token)
    }

    async fn delete_token(&self, user_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("delete token")?;
        Ok(res.rows_affected() > 0)
    }
}
