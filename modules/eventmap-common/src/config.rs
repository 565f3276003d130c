use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Web server
    pub api_host: String,
    pub api_port: u16,

    // Event store: Postgres when set, otherwise the in-memory repository
    pub database_url: Option<String>,
    pub seed_path: Option<PathBuf>,

    // Local calendar used for date-only filters and the weekend window
    pub utc_offset_hours: i32,

    // Client query behaviour
    pub debounce: Duration,
    pub dedupe_window: Duration,
}

impl Config {
    /// Load configuration from the environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parse_env("API_PORT", 3000)?,
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            seed_path: env::var("EVENTMAP_SEED_PATH").ok().map(PathBuf::from),
            utc_offset_hours: parse_env("EVENTMAP_UTC_OFFSET_HOURS", 9)?,
            debounce: Duration::from_millis(parse_env("EVENTMAP_DEBOUNCE_MS", 200)?),
            dedupe_window: Duration::from_secs(parse_env("EVENTMAP_DEDUPE_SECS", 60)?),
        };

        if !(-12..=14).contains(&config.utc_offset_hours) {
            anyhow::bail!(
                "EVENTMAP_UTC_OFFSET_HOURS must be between -12 and 14, got {}",
                config.utc_offset_hours
            );
        }

        config.log_summary();
        Ok(config)
    }

    fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  API: {}:{}", self.api_host, self.api_port);
        tracing::info!(
            "  DATABASE_URL: {}",
            if self.database_url.is_some() { "<set>" } else { "<not set>" }
        );
        tracing::info!("  EVENTMAP_SEED_PATH: {:?}", self.seed_path);
        tracing::info!("  UTC offset: {:+}h", self.utc_offset_hours);
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
