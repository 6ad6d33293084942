use crate::metric_event::MetricEvent;
use crate::queue::{Consumer, Delivery};
use crate::Result;
use async_trait::async_trait;

/// Destination of the metric payloads delivered from the queue
pub(crate) trait MetricsSink: Send + Sync + 'static {
    fn record(&self, payload: &str) -> Result;
}

/// Decodes [`MetricEvent`]s and applies them to the global metrics recorder
pub(crate) struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn record(&self, payload: &str) -> Result {
        MetricEvent::from_json(payload)?.record();
        Ok(())
    }
}

/// Forwards every delivery to the sink. Payloads the sink can't handle are
/// rejected by the queue.
pub(crate) struct MetricsConsumer<S> {
    sink: S,
}

impl<S> MetricsConsumer<S> {
    pub(crate) fn new(sink: S) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S: MetricsSink> Consumer for MetricsConsumer<S> {
    async fn consume(&self, delivery: &Delivery) -> Result {
        self.sink.record(delivery.payload())
    }
}
