use super::{Origin, Target};
use crate::error::{DeserializeError, WorkerError};
use crate::metric_event::MetricEvent;
use crate::prelude::*;
use crate::queue::Queue;
use crate::session::{MessageEvent, SessionHandle};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Name of the counter the logger exposes for accepted sticker requests
const STICKERIZE_REQUESTS_METRIC: &str = "whatsticker_stickerize_requests_total";

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct WorkerConfig {
    /// Name of the queue that carries the conversion jobs
    pub(crate) queue: String,
}

/// Everything the conversion worker needs to process one request
pub(crate) struct DispatchRequest {
    pub(crate) session: SessionHandle,
    pub(crate) target: Target,
    pub(crate) reply_to: bool,
}

#[async_trait]
pub(crate) trait ConversionWorker: Send + Sync + 'static {
    async fn run(&self, request: DispatchRequest) -> Result;
}

/// Job published for the converter that produces and sends the sticker
#[derive(Serialize, Debug)]
struct ConvertJob<'a> {
    message: &'a MessageEvent,
    origin: Origin,
    reply_to: bool,
    device_id: Option<String>,
}

/// Hands the requests over to the converter through the convert queue and
/// reports them to the metrics queue
pub(crate) struct QueueWorker {
    convert: Queue,
    metrics: Queue,
}

impl QueueWorker {
    pub(crate) fn new(convert: Queue, metrics: Queue) -> Self {
        Self { convert, metrics }
    }
}

#[async_trait]
impl ConversionWorker for QueueWorker {
    async fn run(&self, request: DispatchRequest) -> Result {
        let DispatchRequest {
            session,
            target,
            reply_to,
        } = request;

        let message = &target.event;
        let content = &message.message;

        if content.image_message.is_none() && content.video_message.is_none() {
            return Err(err!(WorkerError::MissingMedia {
                message_id: message.info.id.clone()
            }));
        }

        let job = ConvertJob {
            message,
            origin: target.origin,
            reply_to,
            device_id: session.device_id(),
        };

        let job = serde_json::to_string(&job).map_err(err_ctx!(
            DeserializeError::SerializeJson {
                source_ty: "ConvertJob"
            }
        ))?;

        self.convert.publish(&job).await?;

        let origin: &'static str = target.origin.into();
        let event = MetricEvent::counter(
            STICKERIZE_REQUESTS_METRIC,
            1,
            [
                ("media_type", message.info.media_type.as_str()),
                ("origin", origin),
            ],
        );

        self.metrics.publish(&event.to_json()?).await?;

        debug!(
            queue = self.convert.name(),
            message_id = %message.info.id,
            "Published conversion job"
        );

        Ok(())
    }
}
