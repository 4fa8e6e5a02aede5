//! Monitor configuration loaded from environment variables.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use adwatch_core::channels::{CHANNEL_WEBHOOK, VALID_CHANNELS};
use adwatch_core::circuit_breaker::CircuitBreakerConfig;
use adwatch_core::variants::VariantPolicy;
use adwatch_generation::RetryPolicy;

use crate::alerts::AlertConfig;
use crate::coordinator::CoordinatorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}={value:?} is not a known channel (expected one of: {expected})")]
    UnknownChannel {
        var: &'static str,
        value: String,
        expected: String,
    },
}

/// Full monitor configuration.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Bind address for the status API.
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    /// How long to wait for background tasks to drain at shutdown.
    pub shutdown_timeout_secs: u64,

    /// Directory polled for brief files.
    pub brief_dir: PathBuf,
    /// Directory holding snapshots and the event journal.
    pub state_dir: PathBuf,
    pub poll_interval: Duration,

    pub generation_api_url: String,
    pub coordinator: CoordinatorConfig,
    pub breaker: CircuitBreakerConfig,
    pub threshold_window: usize,
    pub variant_policy: VariantPolicy,
    pub alerts: AlertConfig,

    /// Terminal campaigns older than this are evicted.
    pub campaign_retention: Duration,
    pub snapshot_interval: Duration,

    pub notify_primary_channel: String,
    pub notify_alternate_channel: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_escalation_url: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            request_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            brief_dir: PathBuf::from("./briefs"),
            state_dir: PathBuf::from("./state"),
            poll_interval: Duration::from_secs(15),
            generation_api_url: "http://127.0.0.1:8080".into(),
            coordinator: CoordinatorConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            threshold_window: adwatch_core::thresholds::DEFAULT_WINDOW_CAPACITY,
            variant_policy: VariantPolicy::default(),
            alerts: AlertConfig::default(),
            campaign_retention: Duration::from_secs(7 * 24 * 3600),
            snapshot_interval: Duration::from_secs(30),
            notify_primary_channel: adwatch_core::channels::CHANNEL_LOG.into(),
            notify_alternate_channel: None,
            webhook_url: None,
            webhook_escalation_url: None,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `HOST`                          | `0.0.0.0`               |
    /// | `PORT`                          | `3000`                  |
    /// | `REQUEST_TIMEOUT_SECS`          | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`         | `30`                    |
    /// | `BRIEF_DIR`                     | `./briefs`              |
    /// | `STATE_DIR`                     | `./state`               |
    /// | `POLL_INTERVAL_SECS`            | `15`                    |
    /// | `GENERATION_API_URL`            | `http://127.0.0.1:8080` |
    /// | `GENERATION_TIMEOUT_SECS`       | `120`                   |
    /// | `MAX_CONCURRENT_GENERATIONS`    | `4`                     |
    /// | `GENERATION_MAX_ATTEMPTS`       | `3`                     |
    /// | `RETRY_INITIAL_DELAY_MS`        | `1000`                  |
    /// | `RETRY_MAX_DELAY_SECS`          | `30`                    |
    /// | `BREAKER_FAILURE_THRESHOLD`     | `5`                     |
    /// | `BREAKER_RECOVERY_TIMEOUT_SECS` | `300`                   |
    /// | `THRESHOLD_WINDOW`              | `50`                    |
    /// | `MIN_VARIANTS`                  | `3`                     |
    /// | `COVERAGE_RATIO`                | `0.5`                   |
    /// | `DEDUP_WINDOW_SECS`             | `3600`                  |
    /// | `DEADLINE_PROXIMITY_HOURS`      | `24`                    |
    /// | `ESCALATION_INTERVAL_SECS`      | `60`                    |
    /// | `MAX_ALERT_COUNT`               | `100`                   |
    /// | `ALERT_RETENTION_DAYS`          | `7`                     |
    /// | `NOTIFY_TIMEOUT_SECS`           | `30`                    |
    /// | `CAMPAIGN_RETENTION_DAYS`       | `7`                     |
    /// | `SNAPSHOT_INTERVAL_SECS`        | `30`                    |
    /// | `NOTIFY_PRIMARY_CHANNEL`        | `log`                   |
    /// | `NOTIFY_ALTERNATE_CHANNEL`      | unset                   |
    /// | `WEBHOOK_URL`                   | unset                   |
    /// | `WEBHOOK_ESCALATION_URL`        | unset                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let coordinator = CoordinatorConfig {
            max_concurrent: env.parse("MAX_CONCURRENT_GENERATIONS", defaults.coordinator.max_concurrent)?,
            call_timeout: env.secs("GENERATION_TIMEOUT_SECS", defaults.coordinator.call_timeout)?,
            retry: RetryPolicy {
                max_attempts: env.parse("GENERATION_MAX_ATTEMPTS", defaults.coordinator.retry.max_attempts)?,
                initial_delay: env.millis(
                    "RETRY_INITIAL_DELAY_MS",
                    defaults.coordinator.retry.initial_delay,
                )?,
                max_delay: env.secs("RETRY_MAX_DELAY_SECS", defaults.coordinator.retry.max_delay)?,
                ..defaults.coordinator.retry.clone()
            },
        };
        env.at_least_one("MAX_CONCURRENT_GENERATIONS", coordinator.max_concurrent as u64)?;
        env.at_least_one("GENERATION_MAX_ATTEMPTS", u64::from(coordinator.retry.max_attempts))?;

        let breaker = CircuitBreakerConfig {
            failure_threshold: env.parse("BREAKER_FAILURE_THRESHOLD", defaults.breaker.failure_threshold)?,
            recovery_timeout: env.secs(
                "BREAKER_RECOVERY_TIMEOUT_SECS",
                defaults.breaker.recovery_timeout,
            )?,
        };
        env.at_least_one("BREAKER_FAILURE_THRESHOLD", u64::from(breaker.failure_threshold))?;

        let threshold_window = env.parse("THRESHOLD_WINDOW", defaults.threshold_window)?;
        env.at_least_one("THRESHOLD_WINDOW", threshold_window as u64)?;

        let variant_policy = VariantPolicy {
            min_variants: env.parse("MIN_VARIANTS", defaults.variant_policy.min_variants)?,
            coverage_ratio: env.parse("COVERAGE_RATIO", defaults.variant_policy.coverage_ratio)?,
        };
        variant_policy
            .validate()
            .map_err(|e| ConfigError::Invalid {
                var: "COVERAGE_RATIO",
                value: variant_policy.coverage_ratio.to_string(),
                reason: e.to_string(),
            })?;

        let alerts = AlertConfig {
            dedup_window: env.secs("DEDUP_WINDOW_SECS", defaults.alerts.dedup_window)?,
            deadline_proximity: env.hours(
                "DEADLINE_PROXIMITY_HOURS",
                defaults.alerts.deadline_proximity,
            )?,
            escalation_interval: env.secs(
                "ESCALATION_INTERVAL_SECS",
                defaults.alerts.escalation_interval,
            )?,
            max_alert_count: env.parse("MAX_ALERT_COUNT", defaults.alerts.max_alert_count)?,
            retention_period: env.days("ALERT_RETENTION_DAYS", defaults.alerts.retention_period)?,
            delivery_timeout: env.secs("NOTIFY_TIMEOUT_SECS", defaults.alerts.delivery_timeout)?,
        };

        let poll_interval = env.secs("POLL_INTERVAL_SECS", defaults.poll_interval)?;
        let snapshot_interval = env.secs("SNAPSHOT_INTERVAL_SECS", defaults.snapshot_interval)?;
        for (var, interval) in [
            ("POLL_INTERVAL_SECS", poll_interval),
            ("SNAPSHOT_INTERVAL_SECS", snapshot_interval),
            ("ESCALATION_INTERVAL_SECS", alerts.escalation_interval),
        ] {
            env.at_least_one(var, interval.as_secs())?;
        }

        let notify_primary_channel =
            env.channel("NOTIFY_PRIMARY_CHANNEL")?.unwrap_or(defaults.notify_primary_channel);
        let notify_alternate_channel = env.channel("NOTIFY_ALTERNATE_CHANNEL")?;
        let webhook_url = env.string("WEBHOOK_URL");
        let uses_webhook = notify_primary_channel == CHANNEL_WEBHOOK
            || notify_alternate_channel.as_deref() == Some(CHANNEL_WEBHOOK);
        if uses_webhook && webhook_url.is_none() {
            return Err(ConfigError::Missing("WEBHOOK_URL"));
        }

        Ok(Self {
            host: env.string("HOST").unwrap_or(defaults.host),
            port: env.parse("PORT", defaults.port)?,
            request_timeout_secs: env.parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            shutdown_timeout_secs: env.parse("SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout_secs)?,
            brief_dir: env.string("BRIEF_DIR").map(PathBuf::from).unwrap_or(defaults.brief_dir),
            state_dir: env.string("STATE_DIR").map(PathBuf::from).unwrap_or(defaults.state_dir),
            poll_interval,
            generation_api_url: env
                .string("GENERATION_API_URL")
                .unwrap_or(defaults.generation_api_url),
            coordinator,
            breaker,
            threshold_window,
            variant_policy,
            alerts,
            campaign_retention: env.days("CAMPAIGN_RETENTION_DAYS", defaults.campaign_retention)?,
            snapshot_interval,
            notify_primary_channel,
            notify_alternate_channel,
            webhook_url,
            webhook_escalation_url: env.string("WEBHOOK_ESCALATION_URL"),
        })
    }
}

/// Typed accessors over a variable lookup.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    /// A non-blank value, trimmed.
    fn string(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.string(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn scaled(&self, var: &'static str, default: Duration, unit_secs: u64) -> Result<Duration, ConfigError> {
        match self.string(var) {
            None => Ok(default),
            Some(_) => {
                let n: u64 = self.parse(var, 0)?;
                Ok(Duration::from_secs(n.saturating_mul(unit_secs)))
            }
        }
    }

    fn secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.scaled(var, default, 1)
    }

    fn hours(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.scaled(var, default, 3600)
    }

    fn days(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.scaled(var, default, 24 * 3600)
    }

    fn millis(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        match self.string(var) {
            None => Ok(default),
            Some(_) => Ok(Duration::from_millis(self.parse(var, 0)?)),
        }
    }

    fn at_least_one(&self, var: &'static str, value: u64) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    fn channel(&self, var: &'static str) -> Result<Option<String>, ConfigError> {
        let Some(value) = self.string(var).map(|v| v.to_ascii_lowercase()) else {
            return Ok(None);
        };
        if !VALID_CHANNELS.contains(&value.as_str()) {
            return Err(ConfigError::UnknownChannel {
                var,
                value,
                expected: VALID_CHANNELS.join(", "),
            });
        }
        Ok(Some(value))
    }
}
