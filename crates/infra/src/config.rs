//! Runtime configuration from environment variables.
//!
//! | Variable                       | Default       |
//! |--------------------------------|---------------|
//! | `DATABASE_URL`                 | unset (in-memory stores) |
//! | `CARELOG_RESUBSCRIBE_DELAY_MS` | `1000`        |
//! | `CARELOG_POLL_INTERVAL_MS`     | `500`         |
//! | `CARELOG_SUBSCRIPTION_BATCH`   | `256`         |
//! | `CARELOG_CHECKPOINT_POLICY`    | `every_event` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::event_store::PostgresEventStoreConfig;
use crate::workers::{CheckpointPolicy, ProjectionManagerConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {message}")]
    Invalid {
        key: &'static str,
        value: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarelogConfig {
    pub database_url: Option<String>,
    pub resubscribe_delay: Duration,
    pub poll_interval: Duration,
    pub subscription_batch: u32,
    pub checkpoint_policy: CheckpointPolicy,
}

impl Default for CarelogConfig {
    fn default() -> Self {
        let manager = ProjectionManagerConfig::default();
        let store = PostgresEventStoreConfig::default();
        Self {
            database_url: None,
            resubscribe_delay: manager.resubscribe_delay,
            poll_interval: store.poll_interval,
            subscription_batch: store.batch_size,
            checkpoint_policy: manager.checkpoint_policy,
        }
    }
}

impl CarelogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url: get("DATABASE_URL"),
            resubscribe_delay: match get("CARELOG_RESUBSCRIBE_DELAY_MS") {
                Some(v) => Duration::from_millis(parse("CARELOG_RESUBSCRIBE_DELAY_MS", &v)?),
                None => defaults.resubscribe_delay,
            },
            poll_interval: match get("CARELOG_POLL_INTERVAL_MS") {
                Some(v) => Duration::from_millis(parse("CARELOG_POLL_INTERVAL_MS", &v)?),
                None => defaults.poll_interval,
            },
            subscription_batch: match get("CARELOG_SUBSCRIPTION_BATCH") {
                Some(v) => match parse::<u32>("CARELOG_SUBSCRIPTION_BATCH", &v)? {
                    0 => {
                        return Err(ConfigError::Invalid {
                            key: "CARELOG_SUBSCRIPTION_BATCH",
                            value: v,
                            message: "must be at least 1".to_string(),
                        });
                    }
                    n => n,
                },
                None => defaults.subscription_batch,
            },
            checkpoint_policy: match get("CARELOG_CHECKPOINT_POLICY") {
                Some(v) => parse("CARELOG_CHECKPOINT_POLICY", &v)?,
                None => defaults.checkpoint_policy,
            },
        })
    }

    pub fn projection_manager(&self) -> ProjectionManagerConfig {
        ProjectionManagerConfig {
            resubscribe_delay: self.resubscribe_delay,
            checkpoint_policy: self.checkpoint_policy,
        }
    }

    pub fn event_store(&self) -> PostgresEventStoreConfig {
        PostgresEventStoreConfig {
            poll_interval: self.poll_interval,
            batch_size: self.subscription_batch,
        }
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        message: e.to_string(),
    })
}
