use std::path::PathBuf;
use std::sync::Arc;

use feedsync::SyncEngine;
use feedsync::http::reqwest_transport::ReqwestTransport;
use feedsync::sync::SyncError;

use crate::config::load_sync_config;
use crate::progress::{LoggingReporter, as_callback};
use crate::scratch;
use crate::shutdown::setup_shutdown_handler;

pub(crate) struct RunOptions {
    pub(crate) config: PathBuf,
    pub(crate) scratch_dir: PathBuf,
    pub(crate) once: bool,
}

pub(crate) async fn handle_run(options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_sync_config(&options.config, options.scratch_dir.clone())?;
    tracing::info!(
        config = %options.config.display(),
        chains = config.chains.len(),
        scratch_dir = %options.scratch_dir.display(),
        once = options.once,
        "Configuration loaded"
    );

    scratch::reset_dir(&options.scratch_dir)?;

    let limits = config.limits;
    let transport = ReqwestTransport::with_timeout(
        limits.web_request_timeout.max(limits.iteration_timeout),
    )?;

    let pause = (!options.once).then_some(limits.iteration_timeout);
    let reporter = Arc::new(LoggingReporter::new(pause));
    let engine =
        SyncEngine::new(config, Arc::new(transport)).with_progress(as_callback(&reporter));

    let cancel = setup_shutdown_handler();

    if options.once {
        return match engine.run_iteration(&cancel).await {
            Ok(report) => {
                tracing::info!(transferred = report.transferred(), "Single iteration complete");
                Ok(())
            }
            Err(SyncError::Cancelled) => {
                tracing::warn!("Interrupted before the iteration finished");
                Ok(())
            }
            Err(e) => Err(e.into()),
        };
    }

    let scratch_dir = options.scratch_dir;
    engine
        .run(&cancel, || scratch::reset_dir(&scratch_dir))
        .await;

    Ok(())
}
