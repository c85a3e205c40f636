//! # Sync Configuration
//!
//! Typed settings for the order sync pipeline, assembled either through
//! [`SyncSettings::builder`] or from process environment variables with
//! [`SyncSettings::from_env`].
//!
//! ## Environment
//!
//! | Variable | Default |
//! |---|---|
//! | `SYNC_ENABLED` | `false` |
//! | `SYNC_INTERVAL_SECONDS` | `30` |
//! | `SYNC_CRON` | unset (overrides the interval) |
//! | `SYNC_ENDPOINT_URL` | required when enabled |
//! | `SYNC_RETRY_ATTEMPTS` | `3` |
//! | `SYNC_RETRY_DELAY_MS` | `1000` |
//! | `SYNC_TIMEOUT_MS` | `10000` |
//! | `SYNC_INITIAL_DELAY_SECONDS` | `5` |
//! | `SYNC_LOOKBACK_MINUTES` | `60` |
//! | `SYNC_WATERMARK_PATH` | `data/sync-watermark.json` |
//! | `SYNC_WATERMARK_DATABASE_URL` | unset (selects the SQLite store) |
//! | `SYNC_USER_AGENT` | `erp-order-sync/<version>` |
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SyncSettings;
//!
//! let settings = SyncSettings::builder()
//!     .enabled(true)
//!     .endpoint_url("https://logistics.example.com/api/orders")
//!     .interval_secs(60)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::logging::redact_endpoint;
use bridge_traits::{RetryPolicy, Schedule};
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 5;
pub const DEFAULT_LOOKBACK_MINUTES: u64 = 60;
pub const DEFAULT_WATERMARK_PATH: &str = "data/sync-watermark.json";
pub const DEFAULT_USER_AGENT: &str = concat!("erp-order-sync/", env!("CARGO_PKG_VERSION"));

/// Where the watermark is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatermarkBackend {
    /// Single JSON document on the local filesystem.
    File(PathBuf),
    /// Row in a SQLite database, addressed by a sqlx connection URL.
    Sqlite(String),
}

impl Default for WatermarkBackend {
    fn default() -> Self {
        WatermarkBackend::File(PathBuf::from(DEFAULT_WATERMARK_PATH))
    }
}

/// Settings for one sync pipeline.
#[derive(Clone)]
pub struct SyncSettings {
    /// Master switch. A disabled pipeline never schedules cycles.
    pub enabled: bool,
    /// When recurring cycles fire.
    pub schedule: Schedule,
    /// Destination endpoint for delivered orders.
    pub endpoint_url: Option<String>,
    /// Retry behaviour of the delivery client.
    pub retry: RetryPolicy,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Delay before the one-shot catch-up cycle after start.
    pub initial_delay: Duration,
    /// How far back a freshly bootstrapped watermark starts.
    pub lookback: Duration,
    /// Watermark persistence backend.
    pub watermark: WatermarkBackend,
    /// `User-Agent` header sent with deliveries.
    pub user_agent: String,
}

impl SyncSettings {
    /// Creates a new settings builder.
    pub fn builder() -> SyncSettingsBuilder {
        SyncSettingsBuilder::default()
    }

    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable is present but malformed, or when
    /// the resulting settings fail [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary key lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut builder = Self::builder();

        if let Some(value) = get("SYNC_ENABLED") {
            builder = builder.enabled(parse_bool("SYNC_ENABLED", &value)?);
        }
        if let Some(value) = get("SYNC_INTERVAL_SECONDS") {
            builder = builder.interval_secs(parse_number("SYNC_INTERVAL_SECONDS", &value)?);
        }
        if let Some(value) = get("SYNC_CRON") {
            builder = builder.cron(value);
        }
        if let Some(value) = get("SYNC_ENDPOINT_URL") {
            builder = builder.endpoint_url(value);
        }
        if let Some(value) = get("SYNC_RETRY_ATTEMPTS") {
            builder = builder.retry_attempts(parse_number("SYNC_RETRY_ATTEMPTS", &value)?);
        }
        if let Some(value) = get("SYNC_RETRY_DELAY_MS") {
            let ms = parse_number("SYNC_RETRY_DELAY_MS", &value)?;
            builder = builder.retry_delay(Duration::from_millis(ms));
        }
        if let Some(value) = get("SYNC_TIMEOUT_MS") {
            let ms = parse_number("SYNC_TIMEOUT_MS", &value)?;
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(value) = get("SYNC_INITIAL_DELAY_SECONDS") {
            let secs = parse_number("SYNC_INITIAL_DELAY_SECONDS", &value)?;
            builder = builder.initial_delay(Duration::from_secs(secs));
        }
        if let Some(value) = get("SYNC_LOOKBACK_MINUTES") {
            let minutes: u64 = parse_number("SYNC_LOOKBACK_MINUTES", &value)?;
            let secs = minutes
                .checked_mul(60)
                .ok_or_else(|| Error::InvalidSetting {
                    key: "SYNC_LOOKBACK_MINUTES".to_string(),
                    message: format!("{} minutes is out of range", minutes),
                })?;
            builder = builder.lookback(Duration::from_secs(secs));
        }
        if let Some(value) = get("SYNC_WATERMARK_PATH") {
            builder = builder.watermark(WatermarkBackend::File(PathBuf::from(value)));
        }
        // The database URL wins over a file path when both are set.
        if let Some(value) = get("SYNC_WATERMARK_DATABASE_URL") {
            builder = builder.watermark(WatermarkBackend::Sqlite(value));
        }
        if let Some(value) = get("SYNC_USER_AGENT") {
            builder = builder.user_agent(value);
        }

        builder.build()
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if:
    /// - The pipeline is enabled without an endpoint
    /// - The endpoint is not an http(s) URL
    /// - Retry attempts is zero
    /// - The request timeout or the interval is zero
    /// - The lookback reaches before the earliest representable timestamp
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.endpoint_url {
            let lower = url.to_ascii_lowercase();
            let scheme_ok = lower.starts_with("http://") || lower.starts_with("https://");
            let host_ok = url
                .split_once("://")
                .map(|(_, rest)| !rest.is_empty() && !rest.starts_with('/'))
                .unwrap_or(false);
            if !scheme_ok || !host_ok {
                return Err(Error::Config(format!(
                    "Endpoint URL must be an http(s) URL with a host, got '{}'",
                    redact_endpoint(url)
                )));
            }
        } else if self.enabled {
            return Err(Error::Config(
                "SYNC_ENDPOINT_URL is required when sync is enabled".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "Retry attempts must be at least 1".to_string(),
            ));
        }

        if self.timeout.is_zero() {
            return Err(Error::Config("Request timeout must be non-zero".to_string()));
        }

        if let Schedule::Interval(period) = &self.schedule {
            if period.is_zero() {
                return Err(Error::Config("Sync interval must be non-zero".to_string()));
            }
        }

        let lookback_ok = chrono::Duration::from_std(self.lookback)
            .ok()
            .and_then(|lookback| Utc::now().checked_sub_signed(lookback))
            .is_some();
        if !lookback_ok {
            return Err(Error::Config(format!(
                "Lookback of {} minutes is out of range",
                self.lookback.as_secs() / 60
            )));
        }

        if let WatermarkBackend::File(path) = &self.watermark {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Watermark path must not be empty".to_string()));
            }
        }

        Ok(())
    }

    /// Endpoint with credentials and query stripped, suitable for logs.
    pub fn redacted_endpoint(&self) -> String {
        self.endpoint_url
            .as_deref()
            .map(redact_endpoint)
            .unwrap_or_default()
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: Schedule::from_interval_secs(DEFAULT_INTERVAL_SECS),
            endpoint_url: None,
            retry: RetryPolicy {
                max_attempts: DEFAULT_RETRY_ATTEMPTS,
                base_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
                max_delay: None,
                use_exponential_backoff: true,
            },
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            initial_delay: Duration::from_secs(DEFAULT_INITIAL_DELAY_SECS),
            lookback: Duration::from_secs(DEFAULT_LOOKBACK_MINUTES * 60),
            watermark: WatermarkBackend::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl fmt::Debug for SyncSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSettings")
            .field("enabled", &self.enabled)
            .field("schedule", &self.schedule)
            .field("endpoint_url", &self.redacted_endpoint())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("initial_delay", &self.initial_delay)
            .field("lookback", &self.lookback)
            .field("watermark", &self.watermark)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Builder for constructing [`SyncSettings`] instances.
///
/// Unset fields keep their defaults. A cron expression, when given, takes
/// precedence over the interval and is parsed in [`build`](Self::build).
#[derive(Default)]
pub struct SyncSettingsBuilder {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    cron: Option<String>,
    endpoint_url: Option<String>,
    retry_attempts: Option<u32>,
    retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
    timeout: Option<Duration>,
    initial_delay: Option<Duration>,
    lookback: Option<Duration>,
    watermark: Option<WatermarkBackend>,
    user_agent: Option<String>,
}

impl SyncSettingsBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sets the recurring interval in seconds.
    ///
    /// See [`Schedule::from_interval_secs`] for how values map to a schedule.
    pub fn interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = Some(secs);
        self
    }

    /// Sets a cron expression (with seconds field) overriding the interval.
    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.cron = Some(expression.into());
        self
    }

    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Base delay for exponential backoff.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Optional cap for a single backoff delay.
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    pub fn lookback(mut self, lookback: Duration) -> Self {
        self.lookback = Some(lookback);
        self
    }

    pub fn watermark(mut self, backend: WatermarkBackend) -> Self {
        self.watermark = Some(backend);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Builds and validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSetting`] for an unparseable cron expression
    /// and [`Error::Config`] when validation fails.
    pub fn build(self) -> Result<SyncSettings> {
        let defaults = SyncSettings::default();

        let schedule = match (self.cron, self.interval_secs) {
            (Some(expression), _) => {
                Schedule::cron(&expression).map_err(|e| Error::InvalidSetting {
                    key: "SYNC_CRON".to_string(),
                    message: e.to_string(),
                })?
            }
            (None, Some(secs)) => {
                if secs == 0 {
                    return Err(Error::InvalidSetting {
                        key: "SYNC_INTERVAL_SECONDS".to_string(),
                        message: "must be greater than zero".to_string(),
                    });
                }
                Schedule::from_interval_secs(secs)
            }
            (None, None) => defaults.schedule,
        };

        let retry = RetryPolicy {
            max_attempts: self.retry_attempts.unwrap_or(defaults.retry.max_attempts),
            base_delay: self.retry_delay.unwrap_or(defaults.retry.base_delay),
            max_delay: self.max_retry_delay,
            use_exponential_backoff: true,
        };

        let settings = SyncSettings {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            schedule,
            endpoint_url: self.endpoint_url,
            retry,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            lookback: self.lookback.unwrap_or(defaults.lookback),
            watermark: self.watermark.unwrap_or(defaults.watermark),
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
        };

        settings.validate()?;
        Ok(settings)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::InvalidSetting {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse::<T>().map_err(|e| Error::InvalidSetting {
        key: key.to_string(),
        message: format!("'{}': {}", value, e),
    })
}
