use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

pub trait PrometheusBuilderExt {
    /// Configures the buckets declared via [`histograms!`](crate::histograms)
    fn set_default_buckets(self) -> Self;
}

impl PrometheusBuilderExt for PrometheusBuilder {
    fn set_default_buckets(self) -> Self {
        crate::default_histogram_buckets().fold(self, |builder, (metric, buckets)| {
            builder
                .set_buckets_for_metric(Matcher::Full(metric.to_owned()), buckets)
                .unwrap_or_else(|err| {
                    panic!("BUG: histogram `{metric}` declared an empty list of buckets: {err:?}")
                })
        })
    }
}
