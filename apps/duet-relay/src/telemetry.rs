use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::env_truthy;

pub struct Telemetry {
    metrics_handle: Option<PrometheusHandle>,
}

impl Telemetry {
    /// Install the tracing subscriber and, unless `DUET_RELAY_DISABLE_METRICS`
    /// is set, the Prometheus recorder.
    pub fn init() -> Result<Self> {
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .context("failed to initialise tracing subscriber")?;

        let metrics_handle = if env_truthy("DUET_RELAY_DISABLE_METRICS") {
            None
        } else {
            Some(
                PrometheusBuilder::new()
                    .install_recorder()
                    .context("failed to install Prometheus metrics recorder")?,
            )
        };

        Ok(Self { metrics_handle })
    }

    pub fn metrics_handle(&self) -> Option<PrometheusHandle> {
        self.metrics_handle.clone()
    }
}
