use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use parley_gateway::BrokerKind;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub broker: BrokerKind,
    pub nats_url: String,
    pub staging_dir: PathBuf,
    pub storage_dir: PathBuf,
    /// When set, attachments go to this HTTP object store instead of disk.
    pub storage_url: Option<String>,
    pub public_base_url: String,
    pub max_file_bytes: usize,
    pub staging_max_age: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder");
        }

        let port: u16 = get("PARLEY_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("PARLEY_PORT")?;
        let broker: BrokerKind = get("PARLEY_BROKER")
            .unwrap_or_else(|| "local".into())
            .parse()
            .context("PARLEY_BROKER")?;
        let max_file_bytes: usize = get("PARLEY_MAX_FILE_BYTES")
            .map(|v| v.parse().context("PARLEY_MAX_FILE_BYTES"))
            .transpose()?
            .unwrap_or(50 * 1024 * 1024);
        let staging_max_age_secs: u64 = get("PARLEY_STAGING_MAX_AGE_SECS")
            .map(|v| v.parse().context("PARLEY_STAGING_MAX_AGE_SECS"))
            .transpose()?
            .unwrap_or(3600);

        Ok(Self {
            host: get("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("PARLEY_DB_PATH")
                .unwrap_or_else(|| "parley.db".into())
                .into(),
            jwt_secret,
            broker,
            nats_url: get("PARLEY_NATS_URL").unwrap_or_else(|| "nats://127.0.0.1:4222".into()),
            staging_dir: get("PARLEY_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("parley-staging")),
            storage_dir: get("PARLEY_STORAGE_DIR")
                .unwrap_or_else(|| "./object-storage".into())
                .into(),
            storage_url: get("PARLEY_STORAGE_URL").filter(|s| !s.is_empty()),
            public_base_url: get("PARLEY_PUBLIC_BASE_URL").unwrap_or_else(|| "/files".into()),
            max_file_bytes,
            staging_max_age: Duration::from_secs(staging_max_age_secs),
        })
    }
}
