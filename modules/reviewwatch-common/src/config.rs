use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::{ReviewWatchError, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Web server
    pub web_host: String,
    pub web_port: u16,

    // Storage
    pub data_dir: PathBuf,
    pub locations_path: PathBuf,

    // Page rendering
    pub browserless_url: String,
    pub browserless_token: Option<String>,

    // Scheduling
    pub schedule_enabled: bool,
    pub scrape_interval_hours: u64,

    // Run policy
    pub fetch_timeout_secs: u64,
    pub fetch_max_retries: u32,
    pub fetch_retry_base_secs: u64,
    pub location_pause_secs: u64,
    pub run_timeout_minutes: u64,
}

impl Config {
    /// Load configuration from environment variables. Every value has a default;
    /// a value that is set but does not parse is an error.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: parsed_env("WEB_PORT", 5000)?,
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
            locations_path: PathBuf::from(
                env::var("LOCATIONS_FILE").unwrap_or_else(|_| "businesses.json".to_string()),
            ),
            browserless_url: env::var("BROWSERLESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            browserless_token: env::var("BROWSERLESS_TOKEN").ok().filter(|t| !t.is_empty()),
            schedule_enabled: flag_env("SCRAPE_SCHEDULE_ENABLED", true)?,
            scrape_interval_hours: parsed_env("SCRAPE_INTERVAL_HOURS", 2)?,
            fetch_timeout_secs: parsed_env("FETCH_TIMEOUT_SECS", 90)?,
            fetch_max_retries: parsed_env("FETCH_MAX_RETRIES", 2)?,
            fetch_retry_base_secs: parsed_env("FETCH_RETRY_BASE_SECS", 3)?,
            location_pause_secs: parsed_env("LOCATION_PAUSE_SECS", 3)?,
            run_timeout_minutes: parsed_env("RUN_TIMEOUT_MINUTES", 60)?,
        }
        .validated()?)
    }

    fn validated(self) -> Result<Self> {
        if self.scrape_interval_hours == 0 {
            return Err(ReviewWatchError::Config(
                "SCRAPE_INTERVAL_HOURS must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 || self.run_timeout_minutes == 0 {
            return Err(ReviewWatchError::Config(
                "FETCH_TIMEOUT_SECS and RUN_TIMEOUT_MINUTES must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn snapshots_path(&self) -> PathBuf {
        self.data_dir.join("snapshots.json")
    }

    pub fn run_log_dir(&self) -> PathBuf {
        self.data_dir.join("scrape-runs")
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_hours * 3600)
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            web_host = self.web_host.as_str(),
            web_port = self.web_port,
            data_dir = %self.data_dir.display(),
            locations_path = %self.locations_path.display(),
            browserless_url = self.browserless_url.as_str(),
            browserless_token = if self.browserless_token.is_some() { "[set]" } else { "[unset]" },
            schedule_enabled = self.schedule_enabled,
            scrape_interval_hours = self.scrape_interval_hours,
            fetch_timeout_secs = self.fetch_timeout_secs,
            fetch_max_retries = self.fetch_max_retries,
            run_timeout_minutes = self.run_timeout_minutes,
            "Configuration loaded"
        );
    }
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    parse_value(key, env::var(key).ok(), default)
}

fn flag_env(key: &str, default: bool) -> Result<bool> {
    parse_flag(key, env::var(key).ok(), default)
}

fn parse_value<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ReviewWatchError::Config(format!("{key} has an invalid value: {v:?}"))),
    }
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> Result<bool> {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ReviewWatchError::Config(format!("{key} must be a boolean, got {v:?}"))),
        },
    }
}
