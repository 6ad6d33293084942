use super::GLOBAL_LABELS;
use metrics_bat::prelude::*;

/// Histogram buckets to measure the distribution of durations in seconds
pub(crate) const DEFAULT_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Installs the global metrics recorder that serves Prometheus metrics over
/// HTTP on the given port.
pub fn init_metrics(port: u16) {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .set_default_buckets();

    GLOBAL_LABELS
        .iter()
        .fold(builder, |builder, (key, value)| {
            builder.add_global_label(*key, *value)
        })
        .install()
        .expect("BUG: failed to initialize the metrics listener");
}
