//! Demo configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use orchestration::EngineConfig;
use resilience::Criticality;
use thiserror::Error;

/// A malformed configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Longest duration any setting accepts.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Demo configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `PRODUCT_TIMEOUT_MS`, `SALE_TIMEOUT_MS`, `RATE_TIMEOUT_MS`, `BONUS_TIMEOUT_MS`
/// - `DEGRADE_WINDOW_SECS` (default: `30`), `DEGRADED_DELAY_MS` (default: `2000`)
/// - `DRAIN_INTERVAL_SECS` (default: `5`)
/// - `PRODUCT_CRITICALITY`, `SALE_CRITICALITY`: `critical` or `best-effort`
/// - `SALE_FALLBACK_ON_REJECTION`: `true` to fabricate an order even when the
///   ledger rejects the sale (default: `true`)
/// - `PURCHASE_INTERVAL_MS`: pause between purchase batches (default: `1000`)
/// - `FAULT_RATE_SCALE`: multiplier on every injected fault probability (default: `1.0`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
///
/// Durations above [`MAX_DURATION`] are rejected, and so is zero for
/// everything except `DEGRADED_DELAY_MS`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub engine: EngineConfig,
    pub purchase_interval: Duration,
    pub fault_rate_scale: f64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            purchase_interval: Duration::from_secs(1),
            fault_rate_scale: 1.0,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key/value source, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let engine = defaults.engine;

        let fault_rate_scale: f64 =
            parse(&lookup, "FAULT_RATE_SCALE")?.unwrap_or(defaults.fault_rate_scale);
        if !fault_rate_scale.is_finite() || fault_rate_scale < 0.0 {
            return Err(ConfigError::Invalid {
                key: "FAULT_RATE_SCALE",
                value: fault_rate_scale.to_string(),
                reason: "must be a non-negative number".to_string(),
            });
        }

        Ok(Self {
            engine: EngineConfig {
                product_timeout: period_millis(&lookup, "PRODUCT_TIMEOUT_MS", engine.product_timeout)?,
                sale_timeout: period_millis(&lookup, "SALE_TIMEOUT_MS", engine.sale_timeout)?,
                rate_timeout: period_millis(&lookup, "RATE_TIMEOUT_MS", engine.rate_timeout)?,
                bonus_timeout: period_millis(&lookup, "BONUS_TIMEOUT_MS", engine.bonus_timeout)?,
                degrade_window: period_secs(&lookup, "DEGRADE_WINDOW_SECS", engine.degrade_window)?,
                degraded_delay: millis(&lookup, "DEGRADED_DELAY_MS", engine.degraded_delay)?,
                drain_interval: period_secs(&lookup, "DRAIN_INTERVAL_SECS", engine.drain_interval)?,
                product_criticality: parse::<Criticality>(&lookup, "PRODUCT_CRITICALITY")?
                    .unwrap_or(engine.product_criticality),
                sale_criticality: parse::<Criticality>(&lookup, "SALE_CRITICALITY")?
                    .unwrap_or(engine.sale_criticality),
                sale_fallback_on_rejection: parse::<bool>(&lookup, "SALE_FALLBACK_ON_REJECTION")?
                    .unwrap_or(engine.sale_fallback_on_rejection),
                ..engine
            },
            purchase_interval: period_millis(
                &lookup,
                "PURCHASE_INTERVAL_MS",
                defaults.purchase_interval,
            )?,
            fault_rate_scale,
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        })
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => Err(ConfigError::Invalid {
            key,
            value,
            reason: err.to_string(),
        }),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    bounded(lookup, key, default, Duration::from_millis)
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    bounded(lookup, key, default, Duration::from_secs)
}

fn bounded(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
    unit: fn(u64) -> Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = parse::<u64>(lookup, key)? else {
        return Ok(default);
    };
    let duration = unit(raw);
    if duration > MAX_DURATION {
        return Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: format!("must not exceed {}s", MAX_DURATION.as_secs()),
        });
    }
    Ok(duration)
}

/// Like [`millis`], but zero is rejected.
fn period_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    positive(key, millis(lookup, key, default)?)
}

/// Like [`secs`], but zero is rejected.
fn period_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    positive(key, secs(lookup, key, default)?)
}

fn positive(key: &'static str, duration: Duration) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}
