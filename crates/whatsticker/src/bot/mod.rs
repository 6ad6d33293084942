//! The event loop of the bot: classifies the session events, picks the
//! sticker requests out of the messages and dispatches them to the
//! conversion worker.

mod classifier;
mod command;
mod dispatcher;
mod resolver;
mod worker;

use crate::error::SessionError;
use crate::prelude::*;
use crate::queue::{self, QueueConnection};
use crate::session::{InboundEvent, Session, SessionHandle, SidecarSession};
use crate::{signal, BotConfig, Result};
use futures::prelude::*;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(crate) use classifier::*;
pub(crate) use command::*;
pub(crate) use dispatcher::*;
pub(crate) use resolver::*;
pub(crate) use worker::*;

metrics_bat::labels! {
    EventLabels { kind }
}

metrics_bat::counters! {
    /// Number of events received from the session
    session_events_total;

    /// Number of messages that turned out not to be sticker requests
    session_messages_skipped_total;
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct Config {
    /// Upper limit of concurrent conversion worker runs, unlimited if unset
    #[serde(default)]
    pub(crate) max_in_flight: Option<NonZeroUsize>,
}

pub(crate) struct Bot {
    commands: CommandSet,
    dispatcher: Dispatcher,
}

impl Bot {
    pub(crate) fn new(commands: CommandSet, dispatcher: Dispatcher) -> Self {
        Self {
            commands,
            dispatcher,
        }
    }

    /// Handles a single event without waiting for the dispatched work.
    /// Returns the handle of the dispatched task if the event was a sticker
    /// request, and an error only if the session can't be used anymore.
    pub(crate) fn handle_event(&self, event: InboundEvent) -> Result<Option<JoinHandle<()>>> {
        let kind: &'static str = (&event).into();
        session_events_total(EventLabels { kind }).increment(1);

        let message = match classify(event) {
            Classification::Fatal { event } => {
                error!(event, "Killing due to client related issues");
                return Err(err!(SessionError::Fatal { event }));
            }
            Classification::Notice(Notice::StreamReplaced) => {
                info!("Started another stream with the same device session");
                return Ok(None);
            }
            Classification::Notice(Notice::OfflineSyncCompleted { count }) => {
                info!(count, "Offline sync completed");
                return Ok(None);
            }
            Classification::Ignored => return Ok(None),
            Classification::Candidate(message) => message,
        };

        let Some(target) = resolve(&self.commands, &message) else {
            session_messages_skipped_total(vec![]).increment(1);
            trace!(message_id = %message.info.id, "Skipping message that isn't a command");
            return Ok(None);
        };

        info!(
            message_id = %target.event.info.id,
            chat = %target.event.info.chat,
            media_type = %target.event.info.media_type,
            origin = <&'static str>::from(target.origin),
            "Dispatching sticker request"
        );

        Ok(Some(self.dispatcher.dispatch(target)))
    }

    /// Handles the events in the order of delivery until the session
    /// reports a fatal event or the stream ends
    pub(crate) async fn listen(&self, events: impl Stream<Item = InboundEvent>) -> Result {
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            // Dispatched tasks are detached
            let _ = self.handle_event(event)?;
        }

        Err(err!(SessionError::EventStreamClosed))
    }
}

pub(crate) async fn run(config: BotConfig) -> Result {
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();

    let conn = QueueConnection::open("bot", &config.queue, errors_tx).await?;

    // The bot only publishes, so the health of the queue connection must
    // not affect the session
    tokio::spawn(queue::log_errors(errors_rx));

    let worker = QueueWorker::new(
        conn.open_queue(&config.worker.queue).await?,
        conn.open_queue(&config.queue.log_metric_queue).await?,
    );

    let (session, events) = SidecarSession::spawn(config.session, config.log_level)?;
    let session: SessionHandle = Arc::new(session);

    session.connect().await?;

    let dispatcher = Dispatcher::new(
        Arc::new(worker),
        session.clone(),
        config.reply_to,
        config.bot.max_in_flight,
    );

    let bot = Bot::new(CommandSet::default(), dispatcher);

    info!(reply_to = config.reply_to, "Bot is listening for events");

    tokio::select! {
        result = bot.listen(events) => result,
        () = signal::shutdown() => {
            info!("Received a termination signal, disconnecting");
            session.disconnect().await;
            Ok(())
        }
    }
}
