//! Sync orchestrator.
//!
//! One iteration walks every configured chain in order:
//! list source, list destination, diff, transfer, then (with retention
//! enabled) list the destination again and prune. A failing chain is logged
//! and skipped; the iteration moves on to the next one. The whole iteration
//! runs under the `sync_timeout` deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::diff::{apply_limits, packages_to_sync, version_count};
use super::errors::{Result, SyncError};
use super::progress::{FeedSide, ProgressCallback, SyncProgress, emit};
use super::retention::prune_destination;
use super::transfer::transfer_packages;
use super::types::{ChainReport, ChainSyncResult, IterationReport, SyncChain, SyncConfig};
use crate::feed::{FeedClient, FeedEndpoint, FeedHttp, OpContext, Package, client_for};
use crate::http::HttpTransport;

/// Drives sync iterations over all chains of a [`SyncConfig`].
pub struct SyncEngine {
    config: SyncConfig,
    transport: Arc<dyn HttpTransport>,
    progress: Option<Arc<ProgressCallback>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            transport,
            progress: None,
        }
    }

    /// Deliver [`SyncProgress`] events to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn on_progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_deref()
    }

    fn feed_http(&self) -> FeedHttp {
        let limits = &self.config.limits;
        FeedHttp::new(
            Arc::clone(&self.transport),
            limits.retry_config(),
            limits.web_request_timeout,
            limits.iteration_timeout,
        )
    }

    /// Run every chain once.
    ///
    /// Returns the report when all chains succeed, [`SyncError::ChainsFailed`]
    /// (carrying the report) when some were abandoned,
    /// [`SyncError::IterationTimeout`] when the deadline hit and
    /// [`SyncError::Cancelled`] on shutdown.
    #[tracing::instrument(skip_all, fields(chains = self.config.chains.len()))]
    pub async fn run_iteration(&self, cancel: &CancellationToken) -> Result<IterationReport> {
        let started = Instant::now();
        let deadline = self.config.limits.sync_timeout;
        let iteration_cancel = cancel.child_token();

        let outcome =
            tokio::time::timeout(deadline, self.sync_chains(&iteration_cancel)).await;

        let mut report = match outcome {
            Ok(report) => report,
            Err(_) => {
                iteration_cancel.cancel();
                tracing::error!(deadline = ?deadline, "Iteration deadline exceeded, aborting");
                emit(
                    self.on_progress(),
                    SyncProgress::Warning {
                        message: format!("iteration exceeded its {deadline:?} deadline"),
                    },
                );
                return Err(SyncError::IterationTimeout(deadline));
            }
        };
        report.duration = started.elapsed();

        let total = report.chains.len();
        let failed = report.failed();
        emit(
            self.on_progress(),
            SyncProgress::IterationFinished {
                chains: total,
                failed,
                duration: report.duration,
            },
        );

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if failed > 0 {
            return Err(SyncError::ChainsFailed {
                failed,
                total,
                report,
            });
        }
        tracing::info!(
            chains = total,
            transferred = report.transferred(),
            duration = ?report.duration,
            "Iteration complete"
        );
        Ok(report)
    }

    async fn sync_chains(&self, cancel: &CancellationToken) -> IterationReport {
        let mut report = IterationReport::default();

        for chain in &self.config.chains {
            if cancel.is_cancelled() {
                tracing::info!("Cancelled, not starting further chains");
                break;
            }

            let label = chain.label();
            match self.sync_chain(chain, cancel).await {
                Ok(chain_report) => {
                    emit(
                        self.on_progress(),
                        SyncProgress::ChainFinished {
                            chain: label.clone(),
                            transferred: chain_report.transfer.transferred,
                            deleted: chain_report.retention.deleted,
                        },
                    );
                    report.chains.push(ChainSyncResult {
                        chain: label,
                        report: chain_report,
                        error: None,
                    });
                }
                Err(e) => {
                    if e.is_cancelled() {
                        tracing::warn!(chain = %label, "Chain interrupted by shutdown");
                    } else {
                        tracing::error!(chain = %label, error = %e, "Chain failed, skipping for this iteration");
                    }
                    emit(
                        self.on_progress(),
                        SyncProgress::ChainFailed {
                            chain: label.clone(),
                            error: e.to_string(),
                        },
                    );
                    report.chains.push(ChainSyncResult {
                        chain: label.clone(),
                        report: ChainReport {
                            chain: label,
                            ..ChainReport::default()
                        },
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        report
    }

    async fn list(
        &self,
        client: &dyn FeedClient,
        endpoint: &FeedEndpoint,
        side: FeedSide,
        chain: &str,
        ctx: OpContext<'_>,
    ) -> Result<Vec<Package>> {
        let packages = client.list_packages(endpoint, ctx).await?;
        tracing::info!(
            url = %endpoint.host_label(),
            feed = endpoint.feed_name(),
            side = side.as_str(),
            packages = packages.len(),
            "Listed feed"
        );
        emit(
            ctx.on_progress,
            SyncProgress::PackagesListed {
                chain: chain.to_string(),
                side,
                feed: endpoint.feed_name().to_string(),
                count: packages.len(),
            },
        );
        Ok(packages)
    }

    /// Reconcile one chain.
    #[tracing::instrument(skip_all, fields(chain = %chain.label()))]
    pub async fn sync_chain(
        &self,
        chain: &SyncChain,
        cancel: &CancellationToken,
    ) -> Result<ChainReport> {
        for endpoint in [&chain.source, &chain.destination] {
            endpoint
                .validate()
                .map_err(|e| SyncError::Config(e.to_string()))?;
        }
        self.config.retention.validate()?;

        let label = chain.label();
        let mut report = ChainReport {
            chain: label.clone(),
            ..ChainReport::default()
        };
        let config = &self.config;
        let client = client_for(chain.chain_type, self.feed_http());
        let ctx = OpContext::new(cancel, self.on_progress());

        emit(
            ctx.on_progress,
            SyncProgress::ChainStarted {
                chain: label.clone(),
                feed_type: chain.chain_type,
            },
        );

        let source = self
            .list(client.as_ref(), &chain.source, FeedSide::Source, &label, ctx)
            .await?;
        let destination = self
            .list(
                client.as_ref(),
                &chain.destination,
                FeedSide::Destination,
                &label,
                ctx,
            )
            .await?;
        report.source_packages = source.len();
        report.destination_packages = destination.len();

        let to_sync = apply_limits(
            packages_to_sync(&source, &destination, &config.retention),
            config.limits.max_concurrent_packages,
            config.limits.max_versions_per_package,
        );
        report.packages_to_sync = to_sync.len();
        report.versions_to_sync = version_count(&to_sync);
        tracing::info!(
            packages = report.packages_to_sync,
            versions = report.versions_to_sync,
            "Computed packages to sync"
        );
        emit(
            ctx.on_progress,
            SyncProgress::DiffComputed {
                chain: label.clone(),
                packages: report.packages_to_sync,
                versions: report.versions_to_sync,
            },
        );

        if !to_sync.is_empty() {
            report.transfer = transfer_packages(
                client.as_ref(),
                &chain.source,
                &chain.destination,
                &to_sync,
                &config.limits,
                &config.scratch_dir,
                cancel,
                ctx.on_progress,
            )
            .await?;
        }

        if config.retention.enabled && chain.chain_type.supports_retention() {
            let current = self
                .list(
                    client.as_ref(),
                    &chain.destination,
                    FeedSide::Destination,
                    &label,
                    ctx,
                )
                .await?;
            report.retention = prune_destination(
                client.as_ref(),
                &chain.destination,
                &current,
                &config.retention,
                config.limits.retry_config(),
                ctx,
            )
            .await?;
        }

        Ok(report)
    }

    /// Run iterations until `cancel` fires, pausing `iteration_timeout`
    /// between them.
    ///
    /// `before_iteration` runs first each time (the CLI cleans scratch space
    /// there); if it fails the iteration is skipped.
    pub async fn run<F>(&self, cancel: &CancellationToken, mut before_iteration: F)
    where
        F: FnMut() -> std::io::Result<()>,
    {
        let pause = self.config.limits.iteration_timeout;
        let mut iteration: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            iteration += 1;

            match before_iteration() {
                Err(e) => {
                    tracing::error!(iteration, error = %e, "Preparing iteration failed, skipping it");
                }
                Ok(()) => match self.run_iteration(cancel).await {
                    Ok(_) => {}
                    Err(e) if e.is_cancelled() => break,
                    Err(e) => tracing::error!(iteration, error = %e, "Iteration failed"),
                },
            }

            tracing::debug!(iteration, pause = ?pause, "Waiting before next iteration");
            if pause_or_cancel(pause, cancel).await {
                break;
            }
        }

        tracing::info!("Sync loop stopped");
    }
}

/// Sleep for `pause`; returns true if cancelled first.
async fn pause_or_cancel(pause: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(pause) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use crate::feed::FeedType;
    use crate::http::{HttpMethod, MockTransport};
    use crate::sync::types::{RetentionPolicy, TransferLimits};

    const SRC: &str = "https://src.example.com";
    const DST: &str = "https://dst.example.com";

    fn config(chains: Vec<SyncChain>, retention: RetentionPolicy, scratch: PathBuf) -> SyncConfig {
        SyncConfig {
            chains,
            limits: TransferLimits {
                max_retries: 2,
                backoff_base: Duration::from_millis(10),
                ..TransferLimits::default()
            },
            retention,
            scratch_dir: scratch,
        }
    }

    fn upack_chain() -> SyncChain {
        SyncChain::new(
            FeedEndpoint::new(SRC, "src-key", "main", FeedType::Upack),
            FeedEndpoint::new(DST, "dst-key", "mirror", FeedType::Upack),
            FeedType::Upack,
        )
    }

    fn collect_events() -> (ProgressCallback, Arc<Mutex<Vec<SyncProgress>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |e| events_clone.lock().unwrap().push(e));
        (callback, events)
    }

    #[tokio::test(start_paused = true)]
    async fn chain_transfers_missing_versions_and_verifies() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mock = MockTransport::new();
        mock.push(
            HttpMethod::Get,
            format!("{SRC}/upack/main/packages"),
            200,
            br#"[{"group":"g","name":"a","versions":["2","1"]}]"#,
        );
        mock.push(
            HttpMethod::Get,
            format!("{DST}/upack/mirror/packages"),
            200,
            br#"[{"group":"g","name":"a","versions":["1"]}]"#,
        );
        mock.push(HttpMethod::Get, format!("{SRC}/upack/main/download/g/a/2"), 200, b"pkg");
        mock.push(HttpMethod::Put, format!("{DST}/upack/mirror/upload"), 201, b"");
        mock.push(
            HttpMethod::Get,
            format!("{SRC}/upack/main/versions?group=g&name=a&version=2"),
            200,
            br#"{"sha1":"abc"}"#,
        );
        mock.push(
            HttpMethod::Get,
            format!("{DST}/upack/mirror/versions?group=g&name=a&version=2"),
            200,
            br#"{"sha1":"abc"}"#,
        );
        let (callback, events) = collect_events();
        let engine = SyncEngine::new(
            config(
                vec![upack_chain()],
                RetentionPolicy::disabled(),
                scratch.path().to_path_buf(),
            ),
            Arc::new(mock.clone()),
        )
        .with_progress(callback);

        let report = engine
            .run_iteration(&CancellationToken::new())
            .await
            .expect("iteration");

        assert_eq!(report.transferred(), 1);
        assert_eq!(report.chains[0].report.versions_to_sync, 1);
        assert!(!scratch.path().join("a.2.upack").exists());
        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, SyncProgress::IterationFinished { failed: 0, .. })));
        let upload = mock
            .requests()
            .into_iter()
            .find(|r| r.method == HttpMethod::Put)
            .expect("upload request");
        assert_eq!(crate::http::header_get(&upload.headers, "X-ApiKey"), Some("dst-key"));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_chain_does_not_stop_the_next_one() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mock = MockTransport::new();
        for _ in 0..2 {
            mock.push(HttpMethod::Get, format!("{SRC}/upack/main/packages"), 500, b"");
        }
        mock.push(HttpMethod::Get, format!("{SRC}/nuget/main/packages"), 200, b"<feed/>");
        mock.push(HttpMethod::Get, format!("{DST}/nuget/mirror/packages"), 200, b"<feed/>");
        let nuget = SyncChain::new(
            FeedEndpoint::new(SRC, "k", "main", FeedType::Nuget),
            FeedEndpoint::new(DST, "k", "mirror", FeedType::Nuget),
            FeedType::Nuget,
        );
        let engine = SyncEngine::new(
            config(
                vec![upack_chain(), nuget],
                RetentionPolicy::disabled(),
                scratch.path().to_path_buf(),
            ),
            Arc::new(mock.clone()),
        );

        let err = engine
            .run_iteration(&CancellationToken::new())
            .await
            .expect_err("first chain fails");

        match err {
            SyncError::ChainsFailed {
                failed,
                total,
                report,
            } => {
                assert_eq!((failed, total), (1, 2));
                assert!(report.chains[0].error.is_some());
                assert!(report.chains[1].error.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(mock.count(HttpMethod::Get, &format!("{SRC}/upack/main/packages")), 2);
    }

    #[tokio::test]
    async fn unparsable_endpoint_fails_fast() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mock = MockTransport::new();
        let chain = SyncChain::new(
            FeedEndpoint::new("not a url", "k", "main", FeedType::Upack),
            FeedEndpoint::new(DST, "k", "mirror", FeedType::Upack),
            FeedType::Upack,
        );
        let engine = SyncEngine::new(
            config(vec![], RetentionPolicy::disabled(), scratch.path().to_path_buf()),
            Arc::new(mock.clone()),
        );

        let err = engine
            .sync_chain(&chain, &CancellationToken::new())
            .await
            .expect_err("invalid url");

        assert!(matches!(err, SyncError::Config(_)));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn zero_retention_limit_fails_the_chain_before_listing() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mock = MockTransport::new();
        let engine = SyncEngine::new(
            config(
                vec![upack_chain()],
                RetentionPolicy::keep(0),
                scratch.path().to_path_buf(),
            ),
            Arc::new(mock.clone()),
        );

        let err = engine
            .sync_chain(&upack_chain(), &CancellationToken::new())
            .await
            .expect_err("keeping nothing is invalid");

        assert!(matches!(err, SyncError::Config(_)));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retention_relists_destination_and_prunes() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mock = MockTransport::new();
        let listing: &[u8] = br#"[{"group":"g","name":"b","versions":["5","4","3","2","1"]}]"#;
        mock.push(HttpMethod::Get, format!("{SRC}/upack/main/packages"), 200, listing);
        mock.push(HttpMethod::Get, format!("{DST}/upack/mirror/packages"), 200, listing);
        mock.push(HttpMethod::Get, format!("{DST}/upack/mirror/packages"), 200, listing);
        mock.push(HttpMethod::Post, format!("{DST}/upack/mirror/delete/g/b/2"), 200, b"");
        mock.push(HttpMethod::Post, format!("{DST}/upack/mirror/delete/g/b/1"), 200, b"");
        let engine = SyncEngine::new(
            config(
                vec![upack_chain()],
                RetentionPolicy::keep(3),
                scratch.path().to_path_buf(),
            ),
            Arc::new(mock.clone()),
        );

        let report = engine
            .run_iteration(&CancellationToken::new())
            .await
            .expect("iteration");

        assert_eq!(report.chains[0].report.retention.deleted, 2);
        assert_eq!(mock.count(HttpMethod::Get, &format!("{DST}/upack/mirror/packages")), 2);
        assert_eq!(
            mock.requests()
                .iter()
                .filter(|r| r.method == HttpMethod::Post)
                .map(|r| r.url.clone())
                .collect::<Vec<_>>(),
            vec![
                format!("{DST}/upack/mirror/delete/g/b/2"),
                format!("{DST}/upack/mirror/delete/g/b/1"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_the_iteration() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mock = MockTransport::new();
        for _ in 0..10 {
            mock.push(HttpMethod::Get, format!("{SRC}/upack/main/packages"), 503, b"");
        }
        let mut cfg = config(
            vec![upack_chain()],
            RetentionPolicy::disabled(),
            scratch.path().to_path_buf(),
        );
        cfg.limits.max_retries = 10;
        cfg.limits.backoff_base = Duration::from_secs(60);
        cfg.limits.sync_timeout = Duration::from_secs(90);
        let engine = SyncEngine::new(cfg, Arc::new(mock.clone()));

        let err = engine
            .run_iteration(&CancellationToken::new())
            .await
            .expect_err("deadline");

        assert!(matches!(err, SyncError::IterationTimeout(_)));
        assert!(mock.count(HttpMethod::Get, &format!("{SRC}/upack/main/packages")) < 10);
    }

    #[tokio::test]
    async fn cancelled_iteration_starts_no_chain() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mock = MockTransport::new();
        let engine = SyncEngine::new(
            config(
                vec![upack_chain()],
                RetentionPolicy::disabled(),
                scratch.path().to_path_buf(),
            ),
            Arc::new(mock.clone()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine.run_iteration(&cancel).await.expect_err("cancelled");

        assert!(err.is_cancelled());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_stops_on_cancel_and_calls_hook_each_iteration() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mock = MockTransport::new();
        for _ in 0..3 {
            mock.push(HttpMethod::Get, format!("{SRC}/upack/main/packages"), 200, b"[]");
            mock.push(HttpMethod::Get, format!("{DST}/upack/mirror/packages"), 200, b"[]");
        }
        let engine = SyncEngine::new(
            config(
                vec![upack_chain()],
                RetentionPolicy::disabled(),
                scratch.path().to_path_buf(),
            ),
            Arc::new(mock.clone()),
        );
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let pause = engine.config().limits.iteration_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(pause * 2 + pause / 2).await;
            stopper.cancel();
        });

        let mut hook_calls = 0;
        engine
            .run(&cancel, || {
                hook_calls += 1;
                Ok(())
            })
            .await;

        assert_eq!(hook_calls, 3);
    }
}
