//! Formation notifications engine.
//!
//! Computes which webhooks must hear about an object joining or leaving a
//! formation, delivers those notifications and tracks every directed
//! relation between members until its receiver has acknowledged it.
//! Storage, tenant resolution and constraint evaluation stay behind the
//! traits in [`repository`], [`context`] and [`status`].

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod formation;
pub mod formation_assignment;
pub mod lifecycle;
pub mod metrics_defs;
pub mod model;
pub mod notification;
pub mod reconciler;
pub mod repository;
pub mod scenario;
pub mod status;

#[cfg(test)]
mod testutils;

use config::Config;
use shared::logging::LoggingError;
use shared::metrics::MetricsError;

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Installs logging and, when configured, the metrics recorder.
/// Call once at process start, before building the services.
pub fn init_observability(config: &Config) -> Result<(), InitError> {
    shared::logging::init(&config.logging)?;
    shared::metrics::init(config.metrics.as_ref(), metrics_defs::ALL_METRICS)?;
    Ok(())
}
