use super::{ConversionWorker, DispatchRequest, Target};
use crate::prelude::*;
use crate::session::SessionHandle;
use metrics_bat::prelude::*;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

metrics_bat::labels! {
    DispatchLabels { origin }
}

metrics_bat::counters! {
    /// Number of requests handed over to the conversion worker
    dispatches_total;
}

metrics_bat::gauges! {
    /// Number of conversion worker runs happening right now
    worker_runs_in_flight;
}

metrics_bat::histograms! {
    /// Duration of a single conversion worker run
    worker_run_duration_seconds = crate::observability::metrics::DEFAULT_DURATION_BUCKETS;
}

/// Runs the conversion worker in the background for every resolved request
pub(crate) struct Dispatcher {
    worker: Arc<dyn ConversionWorker>,
    session: SessionHandle,
    reply_to: bool,

    /// Bounds the number of concurrent worker runs if set
    permits: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    pub(crate) fn new(
        worker: Arc<dyn ConversionWorker>,
        session: SessionHandle,
        reply_to: bool,
        max_in_flight: Option<NonZeroUsize>,
    ) -> Self {
        Self {
            worker,
            session,
            reply_to,
            permits: max_in_flight.map(|max| Arc::new(Semaphore::new(max.get()))),
        }
    }

    /// Spawns the worker run and returns immediately. The spawned task logs
    /// the failure of the worker, nobody is required to await the handle.
    pub(crate) fn dispatch(&self, target: Target) -> JoinHandle<()> {
        let origin: &'static str = target.origin.into();
        let message_id = target.event.info.id.clone();

        dispatches_total(DispatchLabels { origin }).increment(1);

        let request = DispatchRequest {
            session: self.session.clone(),
            target,
            reply_to: self.reply_to,
        };

        let worker = self.worker.clone();
        let permits = self.permits.clone();

        let task = async move {
            // Acquired inside of the task, so that the event loop never
            // waits for the worker
            let _permit = match permits {
                Some(permits) => match permits.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            let in_flight = worker_runs_in_flight(vec![]);
            in_flight.increment(1.0);

            let result = worker
                .run(request)
                .record_duration(worker_run_duration_seconds, DispatchLabels { origin })
                .await;

            in_flight.decrement(1.0);

            if let Err(err) = result {
                warn!(err = tracing_err(&err), "Conversion worker failed");
            }
        };

        tokio::spawn(task.instrument(info_span!("dispatch", %message_id, origin)))
    }
}
