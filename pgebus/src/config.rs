use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for '{key}': '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

fn optional_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = optional_env(key, default);
    raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw,
        reason: e.to_string(),
    })
}

/// Connection parameters for the database. Connection-string assembly beyond
/// this struct's `connect_options()` is left to the caller.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub application_name: String,
    pub schema_name: String,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: optional_env("PGEBUS_DATABASE__HOST", "localhost"),
            port: parse_env("PGEBUS_DATABASE__PORT", "5432")?,
            database: optional_env("PGEBUS_DATABASE__DATABASE", "postgres"),
            user: optional_env("PGEBUS_DATABASE__USER", "postgres"),
            password: optional_env("PGEBUS_DATABASE__PASSWORD", "postgres"),
            application_name: optional_env("PGEBUS_DATABASE__APPLICATION_NAME", "pgebus"),
            schema_name: optional_env("PGEBUS_DATABASE__SCHEMA_NAME", "pgebus"),
        })
    }

    /// A libpq-style connection URL, handed to `sqlx::postgres::PgPoolOptions::connect`
    /// and to `PgListener::connect` for the dedicated listener connection.
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?application_name={}",
            self.user, self.password, self.host, self.port, self.database, self.application_name
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            application_name: "pgebus".to_string(),
            schema_name: "pgebus".to_string(),
        }
    }
}

/// Recognized options for the consumer runtime.
#[derive(Debug, Clone)]
pub struct EventSystemConfig {
    pub channel: String,
    pub n_workers: usize,
    pub queue_maxsize: usize,
    pub max_retries: u32,
    pub poll_interval: Duration,
    pub shutdown_wait_timeout: Duration,
    pub shutdown_wait_for_completion: bool,
    /// Rows left `Running` by a crashed worker are reset to `Pending` once they've
    /// been stale for longer than this.
    pub running_grace_period: Duration,
    pub stuck_reap_interval: Duration,
}

impl EventSystemConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let n_workers: usize = parse_env("PGEBUS_EVENT_SYSTEM__N_WORKERS", "5")?;
        if !(1..=100).contains(&n_workers) {
            return Err(ConfigError::InvalidValue {
                key: "PGEBUS_EVENT_SYSTEM__N_WORKERS".to_string(),
                value: n_workers.to_string(),
                reason: "must be between 1 and 100".to_string(),
            });
        }

        let max_retries: u32 = parse_env("PGEBUS_EVENT_SYSTEM__MAX_RETRIES", "3")?;
        if max_retries > 10 {
            return Err(ConfigError::InvalidValue {
                key: "PGEBUS_EVENT_SYSTEM__MAX_RETRIES".to_string(),
                value: max_retries.to_string(),
                reason: "must be between 0 and 10".to_string(),
            });
        }

        let poll_interval_secs: f64 = parse_env("PGEBUS_EVENT_SYSTEM__POLL_INTERVAL", "1.0")?;
        if !(0.1..=60.0).contains(&poll_interval_secs) {
            return Err(ConfigError::InvalidValue {
                key: "PGEBUS_EVENT_SYSTEM__POLL_INTERVAL".to_string(),
                value: poll_interval_secs.to_string(),
                reason: "must be between 0.1 and 60 seconds".to_string(),
            });
        }

        Ok(Self {
            channel: optional_env("PGEBUS_EVENT_SYSTEM__CHANNEL", "events"),
            n_workers,
            queue_maxsize: parse_env("PGEBUS_EVENT_SYSTEM__QUEUE_MAXSIZE", "1000")?,
            max_retries,
            poll_interval: Duration::from_secs_f64(poll_interval_secs),
            shutdown_wait_timeout: Duration::from_secs_f64(parse_env(
                "PGEBUS_EVENT_SYSTEM__SHUTDOWN_WAIT_TIMEOUT",
                "30.0",
            )?),
            shutdown_wait_for_completion: parse_env(
                "PGEBUS_EVENT_SYSTEM__SHUTDOWN_WAIT_FOR_COMPLETION",
                "true",
            )?,
            running_grace_period: Duration::from_secs_f64(parse_env(
                "PGEBUS_EVENT_SYSTEM__RUNNING_GRACE_PERIOD",
                "300.0",
            )?),
            stuck_reap_interval: Duration::from_secs_f64(parse_env(
                "PGEBUS_EVENT_SYSTEM__STUCK_REAP_INTERVAL",
                "60.0",
            )?),
        })
    }
}

impl Default for EventSystemConfig {
    fn default() -> Self {
        Self {
            channel: "events".to_string(),
            n_workers: 5,
            queue_maxsize: 1000,
            max_retries: 3,
            poll_interval: Duration::from_secs(1),
            shutdown_wait_timeout: Duration::from_secs(30),
            shutdown_wait_for_completion: true,
            running_grace_period: Duration::from_secs(300),
            stuck_reap_interval: Duration::from_secs(60),
        }
    }
}

/// Top-level configuration for `EventSystem::new`.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub event_system: EventSystemConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            event_system: EventSystemConfig::from_env()?,
        })
    }
}
