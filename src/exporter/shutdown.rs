use tokio::signal;
use tracing::warn;

/// Resolves on SIGINT or SIGTERM, or on Ctrl+C where unix signals are not
/// available.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let handlers = (
            signal::unix::signal(signal::unix::SignalKind::interrupt()),
            signal::unix::signal(signal::unix::SignalKind::terminate()),
        );

        match handlers {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {},
                    _ = sigterm.recv() => {},
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to install signal handlers, falling back to ctrl_c");
            }
        }
    }

    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl_c");
        std::future::pending::<()>().await;
    }
}
