use std::time::Duration;

use anyhow::{bail, Result};
use tallyboard_connect::{SyncConfig, DEFAULT_API_URL};

/// Default interval between scheduled cycles: 4 hours
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 4 * 60 * 60;

pub struct Config {
    pub api_url: String,
    pub api_token: String,
    pub sync_interval: Duration,
    pub sync: SyncConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = lookup("TALLY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_token = match lookup("TALLY_API_TOKEN") {
            Some(token) if !token.trim().is_empty() => token.trim().to_string(),
            _ => bail!("TALLY_API_TOKEN must be set"),
        };

        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let defaults = SyncConfig::default();
        let poll_ms = number("TALLY_POLL_INTERVAL_MS", defaults.poll_interval.as_millis() as u64);
        let max_cycle_secs = number("TALLY_MAX_CYCLE_SECS", defaults.max_cycle_duration.as_secs());
        let recent_days = number(
            "TALLY_RECENT_DAYS",
            u64::from(defaults.recent_transactions_days),
        );
        let interval_secs = number("TALLY_SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS);

        Ok(Self {
            api_url,
            api_token,
            sync_interval: Duration::from_secs(interval_secs.max(1)),
            sync: SyncConfig {
                poll_interval: Duration::from_millis(poll_ms.max(1)),
                max_cycle_duration: Duration::from_secs(max_cycle_secs.max(1)),
                recent_transactions_days: u32::try_from(recent_days)
                    .unwrap_or(defaults.recent_transactions_days),
            },
        })
    }
}
