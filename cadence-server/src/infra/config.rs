use anyhow::Context;
use cadence_core::{SyncSettings, TrackerConfig};
use cadence_model::{QuotaRule, TransportMethod};
use std::{env, time::Duration};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Database settings
    pub database_url: String,

    // Tracker connection
    pub tracker: TrackerConfig,
    pub transport: TransportMethod,
    pub webdriver_url: String,

    // Quota and engine tuning
    pub quota: QuotaRule,
    pub sync: SyncSettings,

    /// Interval of the background pass that drains the queue and purges
    /// old call records.
    pub drain_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let tracker = TrackerConfig {
            base_url: env::var("CADENCE_TRACKER_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            user: env::var("CADENCE_TRACKER_USER").unwrap_or_default(),
            token: env::var("CADENCE_TRACKER_TOKEN").unwrap_or_default(),
            page_size: parsed_env("CADENCE_TRACKER_PAGE_SIZE", 50)?,
            ..TrackerConfig::default()
        };

        let transport = match env::var("CADENCE_TRANSPORT") {
            Ok(raw) => TransportMethod::parse(&raw)
                .with_context(|| format!("CADENCE_TRANSPORT={raw}"))?,
            Err(_) => TransportMethod::Rest,
        };

        let quota = QuotaRule {
            limit: parsed_env("CADENCE_QUOTA_LIMIT", 200)?,
            window: Duration::from_secs(parsed_env("CADENCE_QUOTA_WINDOW_SECS", 7200)?),
            ..QuotaRule::default()
        };

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parsed_env("SERVER_PORT", 3000)?,
            database_url: env::var("CADENCE_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://cadence.db?mode=rwc".to_string()),
            tracker,
            transport,
            webdriver_url: env::var("CADENCE_WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:4444".to_string()),
            quota,
            sync: SyncSettings::default(),
            drain_interval: Duration::from_secs(parsed_env(
                "CADENCE_DRAIN_INTERVAL_SECS",
                60,
            )?),
        })
    }
}

fn parsed_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("{key}={raw}")),
        Err(_) => Ok(default),
    }
}
