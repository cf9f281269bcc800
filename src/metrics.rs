use metrics::gauge;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish the configured check
    /// interval as a static gauge. Fails if a recorder is already installed.
    pub fn init(check_interval_secs: u64) -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        gauge!("ingest_check_interval_secs").set(check_interval_secs as f64);

        Ok(Self { handle })
    }
}
