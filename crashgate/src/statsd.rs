use crate::config::MetricsConfig;
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};

const METRICS_PREFIX: &str = "crashgate";

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] StatsdError),
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Routes every `metrics` macro call to statsd. Without this nothing is emitted.
pub fn init(config: &MetricsConfig) -> Result<(), MetricsError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;

    shared::metrics_defs::describe_all(crash_proxy::metrics_defs::ALL_METRICS);
    tracing::info!(
        "Sending metrics to statsd at {}:{}",
        config.statsd_host,
        config.statsd_port
    );
    Ok(())
}
