//! Application configuration management

pub mod settings;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub use settings::LocalSettings;

/// Console log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn from_arg(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Supabase API URL
    pub supabase_url: String,

    /// Supabase service role key
    pub supabase_service_key: String,

    /// Storage bucket for uploaded materials
    pub storage_bucket: String,

    /// Watch root override; takes precedence over the settings file
    pub watch_root: Option<PathBuf>,

    /// Location of the persisted local settings
    pub settings_path: Option<PathBuf>,

    pub drain_interval: Duration,

    /// Delay before reading a file the watcher reported
    pub settle_delay: Duration,

    /// How long a processed path is remembered
    pub dedup_ttl: Duration,

    /// Record store request rate
    pub requests_per_second: u32,

    pub log_format: LogFormat,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .ok()
            .with_context(|| format!("Invalid {name}: {value}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            supabase_url: env::var("SUPABASE_URL").context("SUPABASE_URL is required")?,

            supabase_service_key: env::var("SUPABASE_SERVICE_KEY")
                .context("SUPABASE_SERVICE_KEY is required")?,

            storage_bucket: env::var("STORAGE_BUCKET").unwrap_or_else(|_| "materials".to_string()),

            watch_root: env::var("WATCH_ROOT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),

            settings_path: env::var("INGEST_SETTINGS_PATH").ok().map(PathBuf::from),

            drain_interval: Duration::from_millis(parse_or("INGEST_DRAIN_INTERVAL_MS", 1000)?),

            settle_delay: Duration::from_millis(parse_or("INGEST_SETTLE_DELAY_MS", 1500)?),

            dedup_ttl: Duration::from_secs(parse_or("INGEST_DEDUP_TTL_SECS", 60)?),

            requests_per_second: parse_or("INGEST_REQUESTS_PER_SECOND", 10)?,

            log_format: env::var("LOG_FORMAT")
                .map(|v| LogFormat::from_arg(&v))
                .unwrap_or(LogFormat::Json),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_arg() {
        assert_eq!(LogFormat::from_arg("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_arg("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_arg("whatever"), LogFormat::Json);
    }
}
