//! Consumer of the metrics queue that feeds the delivered metric events into
//! the Prometheus recorder.

mod sink;

use crate::prelude::*;
use crate::queue::{watch_errors, QueueConnection};
use crate::{signal, LoggerConfig, Result};
use serde::Deserialize;
use serde_with::serde_as;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) use sink::*;

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct Config {
    /// Max number of unacknowledged deliveries, zero would never fetch
    /// anything
    #[serde(default = "default_prefetch")]
    pub(crate) prefetch: NonZeroUsize,

    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms", default = "default_poll_interval")]
    pub(crate) poll_interval: Duration,
}

fn default_prefetch() -> NonZeroUsize {
    NonZeroUsize::new(10).expect("BUG: default prefetch must not be zero")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

pub(crate) async fn run(config: LoggerConfig) -> Result {
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();

    let conn = QueueConnection::open("logger", &config.queue, errors_tx).await?;
    let queue = conn.open_queue(&config.queue.log_metric_queue).await?;

    queue.start_consuming(config.logger.prefetch, config.logger.poll_interval)?;

    let consumer = queue.add_consumer("logging-consumer", MetricsConsumer::new(PrometheusSink))?;

    info!(
        connection = conn.name(),
        queue = queue.name(),
        %consumer,
        address = %config.queue.wait_hosts,
        "Started metrics consumer"
    );

    tokio::select! {
        result = watch_errors(errors_rx) => result,
        () = signal::shutdown() => {
            info!("Received a termination signal, stopping the consumer");
            queue.stop_consuming();
            Ok(())
        }
    }
}
