use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Base URL of the external extraction service.
    pub python_api_url: String,
    pub python_api_token: String,
    /// HMAC key for the internal service-to-service routes.
    pub internal_api_secret: String,
    /// `production` forces the persistent-volume storage backend.
    pub cv_storage_mode: Option<String>,
    /// Presence implies a production deployment.
    pub railway_environment: Option<String>,
    /// Sync mode waits for extraction inline; async hands off to the service.
    pub sync_mode: bool,
    pub poll_interval_secs: u64,
    pub sync_timeout_secs: u64,
    pub async_timeout_secs: u64,
    pub max_retries: i32,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            python_api_url: require_env("PYTHON_API_URL")?,
            python_api_token: require_env("PYTHON_API_TOKEN")?,
            internal_api_secret: require_env("INTERNAL_API_SECRET")?,
            cv_storage_mode: std::env::var("CV_STORAGE_MODE").ok(),
            railway_environment: std::env::var("RAILWAY_ENVIRONMENT").ok(),
            sync_mode: parse_env("CV_SYNC_MODE", true)?,
            poll_interval_secs: parse_env("CV_POLL_INTERVAL_SECS", 10)?,
            sync_timeout_secs: parse_env("CV_SYNC_TIMEOUT_SECS", 480)?,
            async_timeout_secs: parse_env("CV_ASYNC_TIMEOUT_SECS", 30)?,
            max_retries: parse_env("CV_MAX_RETRIES", 3)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn async_timeout(&self) -> Duration {
        Duration::from_secs(self.async_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Stuck-record deadline: twice the sync extraction timeout.
    pub fn stuck_deadline(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs * 2)
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value")),
        Err(_) => Ok(default),
    }
}
