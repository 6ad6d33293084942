use super::Broker;
use crate::error::QueueError;
use crate::prelude::*;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

metrics_bat::labels! {
    DeliveryLabels { queue, result }
}

metrics_bat::counters! {
    /// Number of deliveries handled by the queue consumers
    queue_deliveries_total;
}

/// Handles the deliveries of a [`Queue`]. The delivery is acknowledged when
/// the handler returns `Ok`, and it is rejected otherwise.
#[async_trait]
pub(crate) trait Consumer: Send + Sync + 'static {
    async fn consume(&self, delivery: &Delivery) -> Result;
}

/// Named queue of a [`super::QueueConnection`]
pub(crate) struct Queue {
    shared: Arc<Shared>,
    consuming: SyncMutex<Option<Consuming>>,
}

struct Shared {
    name: String,
    ready_key: String,
    rejected_key: String,
    unacked_key: String,
    broker: Arc<dyn Broker>,
    stopped: watch::Receiver<bool>,
}

struct Consuming {
    deliveries: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Queue {
    pub(super) fn new(
        name: String,
        connection: String,
        broker: Arc<dyn Broker>,
        stopped: watch::Receiver<bool>,
    ) -> Self {
        let shared = Shared {
            ready_key: format!("rmq::queue::[{name}]::ready"),
            rejected_key: format!("rmq::queue::[{name}]::rejected"),
            unacked_key: format!("rmq::connection::{connection}::queue::[{name}]::unacked"),
            name,
            broker,
            stopped,
        };

        Self {
            shared: Arc::new(shared),
            consuming: SyncMutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.shared.name
    }

    /// Pushes the payload to the queue so that it's delivered to consumers
    pub(crate) async fn publish(&self, payload: &str) -> Result {
        self.shared
            .broker
            .push(&self.shared.ready_key, payload)
            .await
    }

    /// Starts fetching deliveries in the background. At most `prefetch`
    /// deliveries are unacknowledged at any moment. When there is nothing to
    /// fetch the queue waits for `poll_interval` before fetching again.
    pub(crate) fn start_consuming(
        &self,
        prefetch: NonZeroUsize,
        poll_interval: Duration,
    ) -> Result {
        let mut consuming = self.consuming.lock();

        if consuming.is_some() {
            return Err(err!(QueueError::AlreadyConsuming {
                queue: self.shared.name.clone()
            }));
        }

        let (deliveries_tx, deliveries_rx) = mpsc::channel(prefetch.get());

        let fetcher = Fetcher {
            shared: self.shared.clone(),
            prefetch: Arc::new(Semaphore::new(prefetch.get())),
            deliveries: deliveries_tx,
            poll_interval,
        };

        info!(
            queue = %self.shared.name,
            prefetch = prefetch.get(),
            ?poll_interval,
            "Started consuming"
        );

        *consuming = Some(Consuming {
            deliveries: Arc::new(Mutex::new(deliveries_rx)),
            tasks: vec![tokio::spawn(fetcher.run())],
        });

        Ok(())
    }

    /// Returns the unique name of the registered consumer
    pub(crate) fn add_consumer(&self, tag: &str, consumer: impl Consumer) -> Result<String> {
        let mut consuming = self.consuming.lock();

        let Some(consuming) = consuming.as_mut() else {
            return Err(err!(QueueError::NotConsuming {
                queue: self.shared.name.clone()
            }));
        };

        let name = format!("{tag}-{}", nanoid::nanoid!(6));

        let task = consume(
            name.clone(),
            self.shared.name.clone(),
            consuming.deliveries.clone(),
            consumer,
        )
        .instrument(info_span!("consumer", consumer = %name, queue = %self.shared.name));

        consuming.tasks.push(tokio::spawn(task));

        info!(consumer = %name, queue = %self.shared.name, "Added consumer");

        Ok(name)
    }

    /// Stops the fetch and consumer tasks. Unacknowledged deliveries stay in
    /// the unacked list of the connection.
    pub(crate) fn stop_consuming(&self) {
        let Some(consuming) = self.consuming.lock().take() else {
            return;
        };
        for task in consuming.tasks {
            task.abort();
        }
        info!(queue = %self.shared.name, "Stopped consuming");
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.stop_consuming();
    }
}

struct Fetcher {
    shared: Arc<Shared>,
    prefetch: Arc<Semaphore>,
    deliveries: mpsc::Sender<Delivery>,
    poll_interval: Duration,
}

impl Fetcher {
    async fn run(self) {
        let shared = &self.shared;

        loop {
            let Ok(permit) = self.prefetch.clone().acquire_owned().await else {
                return;
            };

            if *shared.stopped.borrow() {
                warn!(queue = %shared.name, "Queue connection stopped, not fetching anymore");
                return;
            }

            let payload = match shared
                .broker
                .move_oldest(&shared.ready_key, &shared.unacked_key)
                .await
            {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
                Err(err) => {
                    warn!(
                        err = tracing_err(&err),
                        queue = %shared.name,
                        "Failed to fetch deliveries"
                    );
                    drop(permit);
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            let delivery = Delivery {
                payload,
                shared: shared.clone(),
                _permit: permit,
            };

            if self.deliveries.send(delivery).await.is_err() {
                debug!(queue = %shared.name, "Deliveries receiver was dropped");
                return;
            }
        }
    }
}

async fn consume(
    name: String,
    queue: String,
    deliveries: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    consumer: impl Consumer,
) {
    loop {
        // The lock is released right after receiving, so that consumers of
        // the same queue handle deliveries concurrently
        let delivery = deliveries.lock().await.recv().await;

        let Some(delivery) = delivery else {
            debug!(consumer = %name, "Deliveries channel closed, stopping consumer");
            return;
        };

        let (result, outcome) = match consumer.consume(&delivery).await {
            Ok(()) => ("ack", delivery.ack().await),
            Err(err) => {
                warn!(err = tracing_err(&err), "Rejecting delivery");
                ("reject", delivery.reject().await)
            }
        };

        queue_deliveries_total(DeliveryLabels {
            queue: queue.clone(),
            result,
        })
        .increment(1);

        if let Err(err) = outcome {
            error!(err = tracing_err(&err), result, "Failed to settle delivery");
        }
    }
}

/// Payload fetched from the queue. It holds one of the prefetch permits
/// until it's acknowledged or rejected.
pub(crate) struct Delivery {
    payload: String,
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl Delivery {
    pub(crate) fn payload(&self) -> &str {
        &self.payload
    }

    async fn ack(self) -> Result {
        self.shared
            .broker
            .remove(&self.shared.unacked_key, &self.payload)
            .await
    }

    async fn reject(self) -> Result {
        let broker = &self.shared.broker;
        broker.remove(&self.shared.unacked_key, &self.payload).await?;
        broker.push(&self.shared.rejected_key, &self.payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryBroker, QueueConnection};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    async fn connect(broker: &Arc<MemoryBroker>) -> QueueConnection {
        let (errors, _) = mpsc::unbounded_channel();
        QueueConnection::with_broker("test", broker.clone(), errors)
            .await
            .unwrap()
    }

    /// Sleeps on every delivery and remembers how many deliveries were
    /// unacknowledged at the same time
    struct SlowConsumer {
        broker: Arc<MemoryBroker>,
        unacked_key: String,
        max_unacked: Arc<AtomicUsize>,
        consumed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Consumer for SlowConsumer {
        async fn consume(&self, _delivery: &Delivery) -> Result {
            let unacked = self.broker.len(&self.unacked_key);
            self.max_unacked.fetch_max(unacked, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.consumed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn prefetch_bounds_unacked_deliveries() {
        const PREFETCH: usize = 3;
        let prefetch = NonZeroUsize::new(PREFETCH).unwrap();
        const TOTAL: usize = 20;

        let broker = Arc::new(MemoryBroker::default());
        let conn = connect(&broker).await;
        let queue = conn.open_queue("metrics").await.unwrap();

        for i in 0..TOTAL {
            queue.publish(&format!("event-{i}")).await.unwrap();
        }

        let max_unacked = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(AtomicUsize::new(0));

        queue.start_consuming(prefetch, POLL_INTERVAL).unwrap();

        for tag in ["a", "b", "c", "d", "e"] {
            let consumer = SlowConsumer {
                broker: broker.clone(),
                unacked_key: queue.shared.unacked_key.clone(),
                max_unacked: max_unacked.clone(),
                consumed: consumed.clone(),
            };
            queue.add_consumer(tag, consumer).unwrap();
        }

        while consumed.load(Ordering::SeqCst) < TOTAL {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        assert!(max_unacked.load(Ordering::SeqCst) <= PREFETCH);
        assert_eq!(broker.len(&queue.shared.ready_key), 0);
        assert_eq!(broker.len(&queue.shared.unacked_key), 0);
    }

    struct PickyConsumer;

    #[async_trait]
    impl Consumer for PickyConsumer {
        async fn consume(&self, delivery: &Delivery) -> Result {
            if delivery.payload() == "bad" {
                return Err(fatal!("Can't handle the payload"));
            }
            Ok(())
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn failed_deliveries_are_rejected() {
        let broker = Arc::new(MemoryBroker::default());
        let conn = connect(&broker).await;
        let queue = conn.open_queue("metrics").await.unwrap();

        queue.publish("good").await.unwrap();
        queue.publish("bad").await.unwrap();
        queue.publish("good").await.unwrap();

        queue
            .start_consuming(NonZeroUsize::new(10).unwrap(), POLL_INTERVAL)
            .unwrap();
        queue.add_consumer("picky", PickyConsumer).unwrap();

        tokio::time::sleep(POLL_INTERVAL * 5).await;

        assert_eq!(broker.len(&queue.shared.ready_key), 0);
        assert_eq!(broker.len(&queue.shared.unacked_key), 0);
        assert_eq!(broker.list(&queue.shared.rejected_key), ["bad"]);
    }

    #[test_log::test(tokio::test)]
    async fn consumers_require_consuming_queue() {
        let broker = Arc::new(MemoryBroker::default());
        let conn = connect(&broker).await;
        let queue = conn.open_queue("metrics").await.unwrap();

        queue.add_consumer("early", PickyConsumer).unwrap_err();

        let prefetch = NonZeroUsize::new(1).unwrap();
        queue.start_consuming(prefetch, POLL_INTERVAL).unwrap();
        queue.start_consuming(prefetch, POLL_INTERVAL).unwrap_err();

        let name = queue.add_consumer("picky", PickyConsumer).unwrap();
        assert!(name.starts_with("picky-"));
    }
}
