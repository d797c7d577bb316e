//! Controller configuration (env-driven).

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use rotor_reconcile::{
    DEFAULT_HANDOVER, DEFAULT_MAX_LIFETIME, DEFAULT_MAX_RETRIES, DEFAULT_RESYNC_PERIOD,
};

use crate::worker::{WorkerConfig, MAX_RESYNC_PERIOD};

#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum lifetime of a generated instance.
    pub max_lifetime: Duration,

    /// A replacement is created this long before an instance expires.
    pub handover: Duration,

    /// Every parent is reconciled at least this often.
    pub resync_period: Duration,

    /// Scheduler tick.
    pub poll_interval: Duration,

    /// Consecutive failures after which the retry delay stops growing.
    pub retry_max: u32,

    /// Optional JSON file with parents to load at startup.
    pub seed_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let max_lifetime = parse_var(&lookup, "ROTOR_MAX_LIFETIME_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MAX_LIFETIME);

        let handover = parse_var(&lookup, "ROTOR_HANDOVER_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HANDOVER);

        let resync_period = parse_var(&lookup, "ROTOR_RESYNC_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RESYNC_PERIOD)
            .clamp(Duration::from_secs(1), MAX_RESYNC_PERIOD);

        let poll_interval_ms: u64 = parse_var(&lookup, "ROTOR_POLL_INTERVAL_MS")?.unwrap_or(1000);
        let poll_interval = Duration::from_millis(poll_interval_ms.clamp(50, 60_000));

        let retry_max = parse_var::<u32>(&lookup, "ROTOR_RETRY_MAX")?
            .unwrap_or(DEFAULT_MAX_RETRIES)
            .max(1);

        let seed_file = lookup("ROTOR_SEED_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let log_level = lookup("ROTOR_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            max_lifetime,
            handover,
            resync_period,
            poll_interval,
            retry_max,
            seed_file,
            log_level,
        })
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.poll_interval,
            resync_period: self.resync_period,
            retry_max: self.retry_max,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("{name} must be a non-negative integer."))
}
