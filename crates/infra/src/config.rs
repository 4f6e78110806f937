//! Environment-driven configuration for the event-sourcing core.
//!
//! Every setting has a default; values that fail to parse fall back to it with a
//! warning so a typo never prevents startup.

use std::str::FromStr;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::warn;

pub const USE_ASYNC_PROJECTIONS_VAR: &str = "EVENT_SOURCING_USE_ASYNC_PROJECTIONS";
pub const PROJECTION_WORKERS_VAR: &str = "EVENT_SOURCING_PROJECTION_WORKERS";
pub const RETRY_MAX_ATTEMPTS_VAR: &str = "PROJECTION_RETRY_MAX_ATTEMPTS";
pub const RETRY_INITIAL_DELAY_VAR: &str = "PROJECTION_RETRY_INITIAL_DELAY_MS";
pub const RETRY_MAX_DELAY_VAR: &str = "PROJECTION_RETRY_MAX_DELAY_MS";
pub const RETRY_BACKOFF_MULTIPLIER_VAR: &str = "PROJECTION_RETRY_BACKOFF_MULTIPLIER";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const DATABASE_MAX_CONNECTIONS_VAR: &str = "DATABASE_MAX_CONNECTIONS";

/// Retry policy for deferred projections (exponential backoff, capped).
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionRetryOptions {
    /// Retries after the first attempt.
    pub max_retry_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for ProjectionRetryOptions {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl ProjectionRetryOptions {
    /// Delay before retry number `retry` (1-based): `initial * multiplier^(retry-1)`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Dispatch mode and deferred-queue tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSourcingConfig {
    /// Deferred (queued) projections instead of inline ones.
    pub use_async_projections: bool,
    /// Number of deferred worker lanes; each aggregate always maps to the same lane.
    pub projection_workers: usize,
    pub retry: ProjectionRetryOptions,
}

impl Default for EventSourcingConfig {
    fn default() -> Self {
        Self {
            use_async_projections: false,
            projection_workers: 4,
            retry: ProjectionRetryOptions::default(),
        }
    }
}

impl EventSourcingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment, a map in tests, ...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let projection_workers = match parse_or(&lookup, PROJECTION_WORKERS_VAR, defaults.projection_workers) {
            0 => {
                warn!(var = PROJECTION_WORKERS_VAR, "projection workers must be positive; using default");
                defaults.projection_workers
            }
            n => n,
        };

        let backoff_multiplier = parse_or(
            &lookup,
            RETRY_BACKOFF_MULTIPLIER_VAR,
            defaults.retry.backoff_multiplier,
        );
        let backoff_multiplier = if backoff_multiplier.is_finite() && backoff_multiplier >= 1.0 {
            backoff_multiplier
        } else {
            warn!(var = RETRY_BACKOFF_MULTIPLIER_VAR, "backoff multiplier must be >= 1; using default");
            defaults.retry.backoff_multiplier
        };

        Self {
            use_async_projections: parse_or(&lookup, USE_ASYNC_PROJECTIONS_VAR, defaults.use_async_projections),
            projection_workers,
            retry: ProjectionRetryOptions {
                max_retry_attempts: parse_or(&lookup, RETRY_MAX_ATTEMPTS_VAR, defaults.retry.max_retry_attempts),
                initial_delay: Duration::from_millis(parse_or(
                    &lookup,
                    RETRY_INITIAL_DELAY_VAR,
                    defaults.retry.initial_delay.as_millis() as u64,
                )),
                max_delay: Duration::from_millis(parse_or(
                    &lookup,
                    RETRY_MAX_DELAY_VAR,
                    defaults.retry.max_delay.as_millis() as u64,
                )),
                backoff_multiplier,
            },
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = key, value = %raw, default = ?default, "invalid configuration value; using default");
                default
            }
        },
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("failed to connect to Postgres: {0}")]
    Connect(#[from] sqlx::Error),
}

/// Postgres connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup(DATABASE_URL_VAR)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing(DATABASE_URL_VAR))?;

        Ok(Self {
            url,
            max_connections: parse_or(&lookup, DATABASE_MAX_CONNECTIONS_VAR, 10),
        })
    }

    pub async fn connect(&self) -> Result<PgPool, ConfigError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await?;
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_select_inline_dispatch() {
        let config = EventSourcingConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EventSourcingConfig::default());
        assert!(!config.use_async_projections);
        assert_eq!(config.projection_workers, 4);
        assert_eq!(config.retry.max_retry_attempts, 3);
    }

    #[test]
    fn reads_every_variable() {
        let config = EventSourcingConfig::from_lookup(lookup(&[
            (USE_ASYNC_PROJECTIONS_VAR, "true"),
            (PROJECTION_WORKERS_VAR, "2"),
            (RETRY_MAX_ATTEMPTS_VAR, "5"),
            (RETRY_INITIAL_DELAY_VAR, "10"),
            (RETRY_MAX_DELAY_VAR, "100"),
            (RETRY_BACKOFF_MULTIPLIER_VAR, "3"),
        ]));

        assert!(config.use_async_projections);
        assert_eq!(config.projection_workers, 2);
        assert_eq!(config.retry.max_retry_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(10));
        assert_eq!(config.retry.max_delay, Duration::from_millis(100));
        assert_eq!(config.retry.backoff_multiplier, 3.0);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = EventSourcingConfig::from_lookup(lookup(&[
            (USE_ASYNC_PROJECTIONS_VAR, "yes please"),
            (PROJECTION_WORKERS_VAR, "0"),
            (RETRY_BACKOFF_MULTIPLIER_VAR, "0.5"),
            (RETRY_MAX_ATTEMPTS_VAR, "-1"),
        ]));
        assert_eq!(config, EventSourcingConfig::default());
    }

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let retry = ProjectionRetryOptions::default();
        assert_eq!(retry.delay_for(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(2), Duration::from_millis(2000));
        assert_eq!(retry.delay_for(3), Duration::from_millis(4000));
        assert_eq!(retry.delay_for(10), Duration::from_millis(30_000));
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(
            DatabaseConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing(DATABASE_URL_VAR))
        ));

        let config = DatabaseConfig::from_lookup(lookup(&[(DATABASE_URL_VAR, "postgres://localhost/bunkhouse")])).unwrap();
        assert_eq!(config.max_connections, 10);
    }
}
