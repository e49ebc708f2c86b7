use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_FILE: &str = "db.json";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;
const DEFAULT_SEED_ADMIN_PASSWORD: &str = "admin123";

/// Runtime settings, read from the environment (and `.env`) at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_file: PathBuf,
    pub database_url: Option<String>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub status_url: String,
    pub status_mirror: PathBuf,
    pub status_interval: Duration,
    pub seed_admin_password: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let port = parse_or(var("PORT"), "PORT", DEFAULT_PORT)?;
        let data_file = var("DATA_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE));
        let upload_dir = var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR));
        let max_upload_bytes = parse_or(
            var("MAX_UPLOAD_BYTES"),
            "MAX_UPLOAD_BYTES",
            DEFAULT_MAX_UPLOAD_BYTES,
        )?;
        if max_upload_bytes == 0 {
            return Err(anyhow!("MAX_UPLOAD_BYTES must be greater than 0"));
        }

        let status_url = var("STATUS_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}/api/summary"));
        let status_mirror = var("STATUS_MIRROR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_file.clone());
        let interval_secs: u64 = parse_or(
            var("STATUS_INTERVAL_SECS"),
            "STATUS_INTERVAL_SECS",
            DEFAULT_STATUS_INTERVAL_SECS,
        )?;
        if interval_secs == 0 {
            return Err(anyhow!("STATUS_INTERVAL_SECS must be greater than 0"));
        }

        let config = Self {
            port,
            data_file,
            database_url: var("DATABASE_URL"),
            upload_dir,
            max_upload_bytes,
            status_url,
            status_mirror,
            status_interval: Duration::from_secs(interval_secs),
            seed_admin_password: var("SEED_ADMIN_PASSWORD")
                .unwrap_or_else(|| DEFAULT_SEED_ADMIN_PASSWORD.to_string()),
        };
        debug!(
            port = config.port,
            data_file = %config.data_file.display(),
            upload_dir = %config.upload_dir.display(),
            postgres = config.database_url.is_some(),
            "configuration loaded"
        );

        Ok(config)
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display + Send + Sync + std::error::Error + 'static,
{
    match value {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: `{raw}`")),
        None => Ok(default),
    }
}
