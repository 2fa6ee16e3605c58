use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` runs the service on the in-process store.
    pub database_url: Option<String>,
    /// Reject signups whose email is already registered.
    pub unique_email: bool,
    /// `None` keeps uploaded profile images in process memory.
    pub storage: Option<StorageConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let unique_email = std::env::var("UNIQUE_EMAIL")
            .ok()
            .map(|v| parse_flag(&v))
            .transpose()?
            .unwrap_or(true);

        let storage = match std::env::var("MINIO_ENDPOINT") {
            Ok(endpoint) if !endpoint.is_empty() => Some(StorageConfig {
                endpoint,
                bucket: std::env::var("MINIO_BUCKET")?,
                access_key: std::env::var("MINIO_ACCESS_KEY")?,
                secret_key: std::env::var("MINIO_SECRET_KEY")?,
                region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".into()),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            unique_email,
            storage,
        })
    }
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("invalid boolean flag: {other}"),
    }
}
