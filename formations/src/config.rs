use serde::Deserialize;
use shared::logging::LoggingConfig;
use shared::metrics::MetricsConfig;
use std::fs::File;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Dispatch timeout cannot be 0")]
    InvalidTimeout,

    #[error("Max concurrent dispatches cannot be 0")]
    InvalidConcurrency,

    #[error("Incomplete status code {0} is not a valid HTTP status")]
    InvalidStatusCode(u16),
}

/// Webhook dispatch settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Applied to webhooks that do not carry their own timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on webhooks in flight during one resynchronization pass
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
    /// Status code with which a receiver signals that it still owes configuration
    #[serde(default = "default_incomplete_status_code")]
    pub incomplete_status_code: u16,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_dispatches() -> usize {
    10
}

fn default_incomplete_status_code() -> u16 {
    204
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            timeout_secs: default_timeout_secs(),
            max_concurrent_dispatches: default_max_concurrent_dispatches(),
            incomplete_status_code: default_incomplete_status_code(),
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.max_concurrent_dispatches == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }
        if !(100..=599).contains(&self.incomplete_status_code) {
            return Err(ValidationError::InvalidStatusCode(
                self.incomplete_status_code,
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.dispatch.validate()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}
