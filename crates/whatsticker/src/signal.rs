use crate::prelude::*;

/// Resolves when the process receives an interrupt (Ctrl+C) or a termination
/// signal.
pub(crate) async fn shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    () = ctrl_c() => {}
                    _ = terminate.recv() => info!("SIGTERM received"),
                }
                return;
            }
            Err(err) => {
                warn!(
                    err = tracing_err(&err),
                    "Failed to listen for SIGTERM, waiting only for Ctrl+C"
                );
            }
        }
    }

    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received"),
        Err(err) => {
            warn!(
                err = tracing_err(&err),
                "Failed to wait for Ctrl+C, the process may only be killed forcefully"
            );
            std::future::pending::<()>().await;
        }
    }
}
