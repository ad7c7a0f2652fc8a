use crate::metrics_defs::{MetricDef, describe_all};
use metrics_exporter_statsd::StatsdBuilder;
use serde::Deserialize;

const DEFAULT_QUEUE_SIZE: usize = 5000;
const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "formations".into()
}

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Installs the global statsd recorder and registers metric descriptions.
///
/// When no config is given metrics stay disabled: the `metrics` facade
/// discards everything until a recorder is installed.
pub fn init(config: Option<&MetricsConfig>, defs: &[MetricDef]) -> Result<(), MetricsError> {
    let Some(config) = config else {
        tracing::info!("No metrics config, metrics are disabled");
        return Ok(());
    };

    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .with_queue_size(DEFAULT_QUEUE_SIZE)
        .with_buffer_size(DEFAULT_BUFFER_SIZE)
        .build(Some(&config.prefix))?;

    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;
    describe_all(defs);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}
