//! Chat bot that turns captioned images and videos into stickers, and the
//! companion logger that feeds metric events from a durable queue into
//! Prometheus.

mod bot;
mod config;
mod error;
mod logger;
mod metric_event;
mod observability;
mod queue;
mod session;
mod signal;

pub use crate::error::{Error, Result};
pub use config::*;
pub use observability::*;

mod prelude {
    pub(crate) use crate::error::prelude::*;
    pub(crate) use crate::observability::logging::prelude::*;
}

/// Run the bot processing loop until a termination signal or a fatal
/// session event.
pub async fn run_bot(config: BotConfig) -> Result {
    bot::run(config).await
}

/// Run the metrics queue consumer until a termination signal or a fatal
/// queue connection error.
pub async fn run_logger(config: LoggerConfig) -> Result {
    logger::run(config).await
}
