use super::{Broker, Config, Queue, RedisBroker};
use crate::error::{ErrorKind, QueueError};
use crate::prelude::*;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Number of heartbeat failures in a row after which the connection stops
/// fetching new deliveries
pub(crate) const HEARTBEAT_ERROR_LIMIT: u32 = 45;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const HEARTBEAT_TTL: Duration = Duration::from_secs(60);

pub(super) const CONNECTIONS_KEY: &str = "rmq::connections";
pub(super) const QUEUES_KEY: &str = "rmq::queues";

metrics_bat::counters! {
    /// Number of errors reported by the queue connection
    queue_connection_errors_total;
}

/// Builds the broker URL for the given transport
pub(crate) fn broker_url(transport: &str, address: &str, db: i64) -> Result<String> {
    match transport {
        "tcp" => Ok(format!("redis://{address}/{db}")),
        "unix" => Ok(format!("redis+unix://{address}?db={db}")),
        _ => Err(err!(QueueError::UnsupportedTransport { transport })),
    }
}

/// Live connection to the queue broker. It refreshes its heartbeat key in the
/// background and reports all background errors to the channel passed to
/// [`QueueConnection::open`].
pub(crate) struct QueueConnection {
    name: String,
    broker: Arc<dyn Broker>,
    stopped: watch::Receiver<bool>,
    heartbeat: tokio::task::JoinHandle<()>,
}

impl QueueConnection {
    pub(crate) async fn open(
        tag: &str,
        config: &Config,
        errors: mpsc::UnboundedSender<Error>,
    ) -> Result<Self> {
        let url = broker_url(
            &config.queue_transport,
            &config.wait_hosts,
            config.queue_db_index,
        )?;

        let broker = RedisBroker::connect(&url)
            .with_duration_log("Connecting to the queue broker")
            .await?;

        broker.ping().await?;

        Self::with_broker(tag, Arc::new(broker), errors).await
    }

    pub(crate) async fn with_broker(
        tag: &str,
        broker: Arc<dyn Broker>,
        errors: mpsc::UnboundedSender<Error>,
    ) -> Result<Self> {
        let name = format!("{tag}-{}", nanoid::nanoid!(6));

        broker.heartbeat(&heartbeat_key(&name), HEARTBEAT_TTL).await?;
        broker.add_to_set(CONNECTIONS_KEY, &name).await?;

        let (stopped_tx, stopped) = watch::channel(false);

        let heartbeat = Heartbeat {
            connection: name.clone(),
            broker: broker.clone(),
            errors,
            stopped: stopped_tx,
        };

        let heartbeat = tokio::spawn(heartbeat.run());

        info!(connection = %name, "Opened queue connection");

        Ok(Self {
            name,
            broker,
            stopped,
            heartbeat,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn open_queue(&self, name: &str) -> Result<Queue> {
        self.broker.add_to_set(QUEUES_KEY, name).await?;

        Ok(Queue::new(
            name.to_owned(),
            self.name.clone(),
            self.broker.clone(),
            self.stopped.clone(),
        ))
    }
}

impl Drop for QueueConnection {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

struct Heartbeat {
    connection: String,
    broker: Arc<dyn Broker>,
    errors: mpsc::UnboundedSender<Error>,
    stopped: watch::Sender<bool>,
}

impl Heartbeat {
    async fn run(self) {
        let key = heartbeat_key(&self.connection);
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);

        // A slow heartbeat must not be followed by a burst of catch-up ticks
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut consecutive: u32 = 0;

        loop {
            interval.tick().await;

            let Err(err) = self.broker.heartbeat(&key, HEARTBEAT_TTL).await else {
                consecutive = 0;
                continue;
            };

            consecutive += 1;

            self.report(err!(QueueError::Heartbeat {
                connection: self.connection.clone(),
                consecutive,
                source: Box::new(err),
            }));

            if consecutive >= HEARTBEAT_ERROR_LIMIT {
                // Deliveries fetched after the heartbeat expired may be
                // reclaimed by the broker cleaner, so we stop fetching
                self.stopped.send_replace(true);
                self.report(err!(QueueError::ConsumingStopped {
                    connection: self.connection.clone(),
                }));
                return;
            }
        }
    }

    fn report(&self, err: Error) {
        if self.errors.send(err).is_err() {
            warn!(
                connection = %self.connection,
                "Queue connection errors receiver was dropped"
            );
        }
    }
}

fn heartbeat_key(connection: &str) -> String {
    format!("rmq::connection::{connection}::heartbeat")
}

/// Drains the errors reported by the queue connection of a consumer. Returns
/// only when the connection can't be used for consuming anymore.
pub(crate) async fn watch_errors(mut errors: mpsc::UnboundedReceiver<Error>) -> Result {
    while let Some(err) = errors.recv().await {
        queue_connection_errors_total(vec![]).increment(1);

        if is_consuming_stopped(&err) {
            error!(err = tracing_err(&err), "Queue connection stopped consuming");
            return Err(err);
        }

        warn!(err = tracing_err(&err), "Queue connection error");
    }

    Err(fatal!("Queue connection errors channel was closed"))
}

/// Drains the errors reported by the queue connection of a publisher. The
/// publisher has nothing to consume, so none of the errors are fatal for it.
pub(crate) async fn log_errors(mut errors: mpsc::UnboundedReceiver<Error>) {
    while let Some(err) = errors.recv().await {
        queue_connection_errors_total(vec![]).increment(1);
        warn!(err = tracing_err(&err), "Queue connection error");
    }

    debug!("Queue connection errors channel was closed");
}

fn is_consuming_stopped(err: &Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Queue {
            source: QueueError::ConsumingStopped { .. }
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryBroker;
    use assert_matches::assert_matches;

    #[test]
    fn broker_urls() {
        assert_eq!(broker_url("tcp", "redis:6379", 1).unwrap(), "redis://redis:6379/1");
        assert_eq!(
            broker_url("unix", "/tmp/redis.sock", 3).unwrap(),
            "redis+unix:///tmp/redis.sock?db=3"
        );

        let err = broker_url("udp", "redis:6379", 1).unwrap_err();
        assert_matches!(
            err.kind(),
            ErrorKind::Queue {
                source: QueueError::UnsupportedTransport { .. }
            }
        );
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn stops_consuming_after_heartbeat_error_limit() {
        let broker = Arc::new(MemoryBroker::default());
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let conn = QueueConnection::with_broker("test", broker.clone(), errors_tx)
            .await
            .unwrap();

        assert!(!*conn.stopped.borrow());

        broker.set_failing(true);

        let err = watch_errors(errors_rx).await.unwrap_err();

        assert!(is_consuming_stopped(&err));
        assert!(*conn.stopped.borrow());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn publisher_errors_are_never_fatal() {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        for _ in 0..2 {
            errors_tx
                .send(err!(QueueError::ConsumingStopped {
                    connection: "bot-abcdef"
                }))
                .unwrap();
        }

        let logging = tokio::spawn(log_errors(errors_rx));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!logging.is_finished());

        drop(errors_tx);
        logging.await.unwrap();
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn slow_heartbeat_is_not_followed_by_a_burst() {
        let broker = Arc::new(MemoryBroker::default());
        let (errors_tx, _errors_rx) = mpsc::unbounded_channel();

        let _conn = QueueConnection::with_broker("test", broker.clone(), errors_tx)
            .await
            .unwrap();

        let initial = broker.heartbeats();
        broker.delay_next_heartbeat(HEARTBEAT_INTERVAL * 10);

        tokio::time::sleep(HEARTBEAT_INTERVAL * 10 + HEARTBEAT_INTERVAL / 2).await;

        // The slow heartbeat and the single delayed tick right after it
        assert_eq!(broker.heartbeats() - initial, 2);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn heartbeat_recovers_from_transient_errors() {
        let broker = Arc::new(MemoryBroker::default());
        let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();

        let conn = QueueConnection::with_broker("test", broker.clone(), errors_tx)
            .await
            .unwrap();

        broker.set_failing(true);
        for _ in 0..HEARTBEAT_ERROR_LIMIT - 1 {
            let err = errors_rx.recv().await.unwrap();
            assert_matches!(
                err.kind(),
                ErrorKind::Queue {
                    source: QueueError::Heartbeat { .. }
                }
            );
        }
        broker.set_failing(false);

        tokio::time::sleep(HEARTBEAT_INTERVAL * 10).await;

        assert!(!*conn.stopped.borrow());
        assert_matches!(errors_rx.try_recv(), Err(mpsc::error::TryRecvError::Empty));
    }
}
