mod macros;

use crate::prelude::*;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing_error::SpanTrace;

pub(crate) use macros::*;

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

pub(crate) mod prelude {
    pub(crate) use super::{err, err_ctx, fatal};
}

/// Describes any possible error that may happen in the application lifetime.
#[derive(Clone)]
pub struct Error {
    imp: Arc<ErrorImp>,
}

struct ErrorImp {
    /// Small identifier used for debugging purposes.
    /// It is logged together with the error, so that it's easy
    /// to correlate the log records that relate to the same failure.
    id: String,
    kind: ErrorKind,

    // Participates only in debug impl
    spantrace: SpanTrace,
}

#[derive(Error, Debug)]
pub(crate) enum ErrorKind {
    #[error(transparent)]
    Session {
        #[from]
        source: SessionError,
    },

    #[error(transparent)]
    Queue {
        #[from]
        source: QueueError,
    },

    #[error(transparent)]
    Worker {
        #[from]
        source: WorkerError,
    },

    #[error(transparent)]
    Deserialize {
        #[from]
        source: DeserializeError,
    },

    #[error(transparent)]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Fatal error: {message}")]
    Fatal {
        message: String,
        source: Option<Box<DynError>>,
    },
}

/// Errors of the protocol session layer.
#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error(
        "Session can never become valid again without external intervention \
        (event: {event})"
    )]
    Fatal { event: &'static str },

    #[error("Failed to spawn the session sidecar process `{program}`")]
    SpawnSidecar {
        program: String,
        source: std::io::Error,
    },

    #[error("Session sidecar process has no {stream} handle")]
    MissingSidecarStdio { stream: &'static str },

    #[error("Failed to send the `{command}` command to the session sidecar")]
    SendCommand {
        command: &'static str,
        source: std::io::Error,
    },

    #[error("Session sidecar closed its event stream")]
    EventStreamClosed,
}

/// Errors at the layer of the durable queue broker.
#[derive(Debug, Error)]
pub(crate) enum QueueError {
    #[error("Unsupported queue transport `{transport}`, expected `tcp` or `unix`")]
    UnsupportedTransport { transport: String },

    #[error("Failed to connect to the queue broker at {address}")]
    Connect {
        address: String,
        source: redis::RedisError,
    },

    #[error("Queue broker command `{command}` failed")]
    Command {
        command: &'static str,
        source: redis::RedisError,
    },

    #[error(
        "Queue connection heartbeat failed {consecutive} time(s) in a row \
        (connection: {connection})"
    )]
    Heartbeat {
        connection: String,
        consecutive: u32,
        source: Box<Error>,
    },

    #[error("Consuming stopped after too many heartbeat errors (connection: {connection})")]
    ConsumingStopped { connection: String },

    #[error("Queue `{queue}` is already consuming")]
    AlreadyConsuming { queue: String },

    #[error("Queue `{queue}` must start consuming before adding consumers")]
    NotConsuming { queue: String },
}

/// Errors of the conversion worker that handles dispatched requests.
#[derive(Debug, Error)]
pub(crate) enum WorkerError {
    #[error("Dispatched message doesn't carry any media to convert (message: {message_id})")]
    MissingMedia { message_id: String },
}

#[derive(Debug, Error)]
pub(crate) enum DeserializeError {
    #[error("Failed to parse JSON as `{target_ty}`, input surrounded by backticks:\n```\n{input}\n```")]
    Json {
        target_ty: &'static str,
        input: String,
        source: serde_json::Error,
    },

    #[error("Failed to serialize `{source_ty}` as JSON")]
    SerializeJson {
        source_ty: &'static str,
        source: serde_json::Error,
    },
}

pub(crate) type DynError = dyn std::error::Error + Send + Sync;

impl Error {
    pub fn id(&self) -> &str {
        &self.imp.id
    }

    pub(crate) fn kind(&self) -> &ErrorKind {
        &self.imp.kind
    }

    /// Returns `true` if the error means that the session can't be used anymore.
    pub fn is_fatal_session(&self) -> bool {
        matches!(
            self.imp.kind,
            ErrorKind::Session {
                source: SessionError::Fatal { .. }
            }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error (id: {}): {}", self.imp.id, self.imp.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.imp.kind.source()
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)?;
        fmt::Display::fmt(&self.imp.spantrace, f)
    }
}

impl<T: Into<ErrorKind>> From<T> for Error {
    #[track_caller]
    fn from(kind: T) -> Self {
        let imp = ErrorImp {
            kind: kind.into(),
            id: nanoid::nanoid!(6),
            spantrace: SpanTrace::capture(),
        };

        let err = Self { imp: Arc::new(imp) };

        trace!(err = tracing_err(&err), "Created an error");

        err
    }
}
