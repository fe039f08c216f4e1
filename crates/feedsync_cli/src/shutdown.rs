use tokio_util::sync::CancellationToken;

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Spawn the shutdown handler and return the token it cancels.
///
/// The first signal cancels the token so in-flight work can wind down; a
/// second one exits with status 130.
pub(crate) fn setup_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Shutdown requested, finishing current operations (signal again to force quit)");
        trigger.cancel();

        shutdown_signal().await;
        tracing::error!("Force quit");
        std::process::exit(130);
    });

    token
}
