use std::sync::Arc;

use crate::auth::email::{EmailSetup, StoreEmailSetup};
use crate::auth::repo::UserStore;
use crate::config::AppConfig;
use crate::db::PgStore;
use crate::memory::MemoryStore;
use crate::profiles::repo::ProfileStore;
use crate::storage::{MemoryStorage, S3Storage, StorageClient};

/// Everything a handler needs, passed explicitly through axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub storage: Arc<dyn StorageClient>,
    pub email_setup: Arc<dyn EmailSetup>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let (users, profiles): (Arc<dyn UserStore>, Arc<dyn ProfileStore>) =
            match &config.database_url {
                Some(url) => {
                    let store = Arc::new(PgStore::connect(url).await?);
                    if let Err(e) = store.migrate().await {
                        tracing::warn!(error = %e, "migration failed; continuing");
                    }
                    (
                        store.clone() as Arc<dyn UserStore>,
                        store as Arc<dyn ProfileStore>,
                    )
                }
                None => {
                    tracing::warn!("DATABASE_URL not set; using the in-process store");
                    let store = Arc::new(MemoryStore::new());
                    (
                        store.clone() as Arc<dyn UserStore>,
                        store as Arc<dyn ProfileStore>,
                    )
                }
            };

        let storage: Arc<dyn StorageClient> = match &config.storage {
            Some(cfg) => Arc::new(S3Storage::new(cfg).await?) as Arc<dyn StorageClient>,
            None => {
                tracing::warn!("MINIO_ENDPOINT not set; profile images kept in memory");
                Arc::new(MemoryStorage::new())
            }
        };

        Ok(Self::from_parts(config, users, profiles, storage))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        profiles: Arc<dyn ProfileStore>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        let email_setup = Arc::new(StoreEmailSetup::new(users.clone())) as Arc<dyn EmailSetup>;
        Self {
            config,
            users,
            profiles,
            storage,
            email_setup,
        }
    }

    /// In-process state for tests; returns the concrete store for inspection.
    #[cfg(test)]
    pub fn fake() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(AppConfig {
            database_url: None,
            unique_email: true,
            storage: None,
        });
        let state = Self::from_parts(
            config,
            store.clone(),
            store.clone(),
            Arc::new(MemoryStorage::new()),
        );
        (state, store)
    }
}
