use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::auth::repo::UserStore;
use crate::auth::repo_types::User;

/// Hook run after signup to register the account's email address.
#[async_trait]
pub trait EmailSetup: Send + Sync {
    async fn setup_user_email(&self, user: &User) -> anyhow::Result<()>;
}

/// Records the signup address as the primary, unverified address.
/// Sending the confirmation mail is left to the verification workflow.
pub struct StoreEmailSetup {
    users: Arc<dyn UserStore>,
}

impl StoreEmailSetup {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl EmailSetup for StoreEmailSetup {
    async fn setup_user_email(&self, user: &User) -> anyhow::Result<()> {
        let address = self
            .users
            .add_email_address(user.id, &user.email, true, false)
            .await?;
        info!(user_id = %user.id, email = %address.email, "email address registered, verification pending");
        Ok(())
    }
}
