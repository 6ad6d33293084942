use super::{Config, EventStream, InboundEvent, Session};
use crate::error::SessionError;
use crate::observability::LogLevel;
use crate::prelude::*;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};

/// Capacity of the channel between the stdout reader and the bot
const EVENTS_BUFFER: usize = 256;

/// Session that is run by a sidecar process. The sidecar emits
/// [`InboundEvent`]s as JSON lines on its stdout and accepts [`SidecarCommand`]s
/// as JSON lines on its stdin.
pub(crate) struct SidecarSession {
    stdin: Mutex<ChildStdin>,
    device_store: String,
    log_level: LogLevel,
    device_id: Arc<SyncMutex<Option<String>>>,

    // Held to kill the process when the session is dropped
    _child: Child,
}

#[derive(Serialize, Debug)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum SidecarCommand<'a> {
    Connect {
        device_store: &'a str,
        log_level: LogLevel,
    },
    Disconnect,
}

impl SidecarCommand<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
        }
    }
}

impl SidecarSession {
    pub(crate) fn spawn(config: Config, log_level: LogLevel) -> Result<(Self, EventStream)> {
        let args = shlex::split(&config.sidecar_args).ok_or_else(|| {
            fatal!(
                "Invalid quoting in the sidecar arguments: {}",
                config.sidecar_args
            )
        })?;

        info!(program = %config.sidecar_cmd, ?args, "Spawning session sidecar");

        let mut child = Command::new(&config.sidecar_cmd)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(err_ctx!(SessionError::SpawnSidecar {
                program: config.sidecar_cmd.clone()
            }))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| err!(SessionError::MissingSidecarStdio { stream: "stdin" }))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| err!(SessionError::MissingSidecarStdio { stream: "stdout" }))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "session_sidecar", "{line}");
                }
            });
        }

        let device_id = Arc::new(SyncMutex::new(None));
        let (events_tx, mut events_rx) = mpsc::channel(EVENTS_BUFFER);

        tokio::spawn(read_events(stdout, events_tx, device_id.clone()));

        let session = Self {
            stdin: Mutex::new(stdin),
            device_store: config.device_store,
            log_level,
            device_id,
            _child: child,
        };

        let events = futures::stream::poll_fn(move |cx| events_rx.poll_recv(cx));

        Ok((session, Box::pin(events)))
    }

    async fn send(&self, command: SidecarCommand<'_>) -> Result {
        let name = command.name();

        let mut line = serde_json::to_vec(&command).map_err(err_ctx!(
            crate::error::DeserializeError::SerializeJson {
                source_ty: "SidecarCommand"
            }
        ))?;
        line.push(b'\n');

        let mut stdin = self.stdin.lock().await;

        async {
            stdin.write_all(&line).await?;
            stdin.flush().await
        }
        .await
        .map_err(err_ctx!(SessionError::SendCommand { command: name }))
    }
}

async fn read_events(
    stdout: tokio::process::ChildStdout,
    events: mpsc::Sender<InboundEvent>,
    device_id: Arc<SyncMutex<Option<String>>>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!("Session sidecar closed its stdout");
                return;
            }
            Err(err) => {
                error!(err = tracing_err(&err), "Failed to read from the session sidecar");
                return;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let event: InboundEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    err = tracing_err(&err),
                    line = %line,
                    "Skipping a malformed event from the session sidecar"
                );
                continue;
            }
        };

        // Pairing and login are the concern of the session, the bot doesn't
        // look at these events
        match &event {
            InboundEvent::Qr { code } => info!(%code, "Scan the QR code to log in"),
            InboundEvent::Connected { device_id: id } => {
                info!(device_id = id.as_deref(), "Session connected");
                *device_id.lock() = id.clone();
            }
            _ => {}
        }

        if events.send(event).await.is_err() {
            debug!("Events receiver was dropped, stopping the sidecar reader");
            return;
        }
    }
}

#[async_trait]
impl Session for SidecarSession {
    fn device_id(&self) -> Option<String> {
        self.device_id.lock().clone()
    }

    async fn connect(&self) -> Result {
        self.send(SidecarCommand::Connect {
            device_store: &self.device_store,
            log_level: self.log_level,
        })
        .await
    }

    async fn disconnect(&self) {
        if let Err(err) = self.send(SidecarCommand::Disconnect).await {
            warn!(
                err = tracing_err(&err),
                "Failed to disconnect the session, exiting anyway"
            );
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use futures::prelude::*;

    #[test_log::test(tokio::test)]
    async fn speaks_json_lines() {
        let config = Config {
            sidecar_cmd: "sh".to_owned(),
            sidecar_args: r#"-c 'read cmd; case "$cmd" in *\"log_level\":\"DEBUG\"*) echo "{\"type\":\"connected\",\"device_id\":\"42\"}";; esac; echo garbage; echo "{\"type\":\"client_outdated\"}"'"#.to_owned(),
            device_store: "db/test.db".to_owned(),
        };

        let (session, events) = SidecarSession::spawn(config, LogLevel::Debug).unwrap();

        assert_eq!(session.device_id(), None);

        session.connect().await.unwrap();

        let events: Vec<_> = events.collect().await;

        assert_eq!(
            events,
            [
                InboundEvent::Connected {
                    device_id: Some("42".to_owned())
                },
                InboundEvent::ClientOutdated,
            ]
        );
        assert_eq!(session.device_id().as_deref(), Some("42"));
    }

    #[test]
    fn command_format() {
        let connect = SidecarCommand::Connect {
            device_store: "db/examplestore.db",
            log_level: LogLevel::Debug,
        };
        assert_eq!(
            serde_json::to_string(&connect).unwrap(),
            r#"{"cmd":"connect","device_store":"db/examplestore.db","log_level":"DEBUG"}"#
        );

        let connect = SidecarCommand::Connect {
            device_store: "db/examplestore.db",
            log_level: LogLevel::default(),
        };
        assert_eq!(
            serde_json::to_string(&connect).unwrap(),
            r#"{"cmd":"connect","device_store":"db/examplestore.db","log_level":"INFO"}"#
        );
        assert_eq!(
            serde_json::to_string(&SidecarCommand::Disconnect).unwrap(),
            r#"{"cmd":"disconnect"}"#
        );
    }
}
