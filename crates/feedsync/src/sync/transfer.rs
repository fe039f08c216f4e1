//! Bounded-concurrency transfer pipeline.
//!
//! One unit of work is one version of one package: download from the
//! source, upload to the destination, then compare the hashes both servers
//! report. Units run concurrently behind a semaphore sized
//! `min(max_concurrent_packages, distinct packages)`.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::diff::units;
use super::progress::{ProgressCallback, SyncAction, SyncProgress, emit};
use super::types::{TransferLimits, TransferReport};
use crate::feed::{FeedClient, FeedEndpoint, FeedError, OpContext, Package, PackageVersion};
use crate::retry::{RetryConfig, with_retry};

/// Result of one completed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Transferred { hash_mismatch: bool },
    Skipped,
}

/// Everything a unit needs besides the package version itself.
struct UnitContext<'a> {
    client: &'a dyn FeedClient,
    source: &'a FeedEndpoint,
    destination: &'a FeedEndpoint,
    scratch_dir: &'a Path,
    retry: RetryConfig,
    ctx: OpContext<'a>,
}

/// Transfer every version of `packages` from `source` to `destination`.
///
/// The first unit failure stops admission of further units; units already
/// running finish and the first error is returned. Cancellation of `cancel`
/// likewise stops admission and yields [`FeedError::Cancelled`].
#[allow(clippy::too_many_arguments)]
pub async fn transfer_packages(
    client: &dyn FeedClient,
    source: &FeedEndpoint,
    destination: &FeedEndpoint,
    packages: &[Package],
    limits: &TransferLimits,
    scratch_dir: &Path,
    cancel: &CancellationToken,
    on_progress: Option<&ProgressCallback>,
) -> Result<TransferReport, FeedError> {
    let mut report = TransferReport::default();
    let work = units(packages);
    if work.is_empty() {
        return Ok(report);
    }

    let distinct = packages.len();
    let bound = limits.max_concurrent_packages.min(distinct).max(1);
    let semaphore = Semaphore::new(bound);
    let admission = cancel.child_token();
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    tracing::info!(
        feed = destination.feed_name(),
        units = work.len(),
        packages = distinct,
        concurrency = bound,
        "Starting transfers"
    );

    let unit_ctx = UnitContext {
        client,
        source,
        destination,
        scratch_dir,
        retry: limits.retry_config(),
        ctx: OpContext::new(cancel, on_progress),
    };

    let mut pending: FuturesUnordered<_> = work
        .into_iter()
        .map(|unit| {
            let semaphore = &semaphore;
            let admission = &admission;
            let active = &active;
            let peak = &peak;
            let unit_ctx = &unit_ctx;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (unit, Ok(UnitOutcome::Skipped));
                };
                if admission.is_cancelled() {
                    return (unit, Ok(UnitOutcome::Skipped));
                }
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let result = transfer_one(unit_ctx, &unit).await;
                active.fetch_sub(1, Ordering::SeqCst);
                (unit, result)
            }
        })
        .collect();

    let mut first_error: Option<FeedError> = None;

    while let Some((unit, result)) = pending.next().await {
        match result {
            Ok(UnitOutcome::Transferred { hash_mismatch }) => {
                report.transferred += 1;
                if hash_mismatch {
                    report.hash_mismatches += 1;
                }
            }
            Ok(UnitOutcome::Skipped) => report.skipped += 1,
            Err(e) if e.is_cancelled() => report.skipped += 1,
            Err(e) => {
                tracing::error!(
                    feed = destination.feed_name(),
                    package = %unit,
                    error = %e,
                    "Transfer failed"
                );
                if first_error.is_none() {
                    admission.cancel();
                    first_error = Some(e);
                }
            }
        }
    }

    report.peak_concurrency = peak.load(Ordering::SeqCst);

    if let Some(e) = first_error {
        return Err(e);
    }
    if cancel.is_cancelled() && report.skipped > 0 {
        return Err(FeedError::Cancelled);
    }

    tracing::info!(
        feed = destination.feed_name(),
        transferred = report.transferred,
        hash_mismatches = report.hash_mismatches,
        "Transfers complete"
    );
    Ok(report)
}

fn finished(
    on_progress: Option<&ProgressCallback>,
    feed: &FeedEndpoint,
    unit: &PackageVersion,
    action: SyncAction,
    success: bool,
    started: Instant,
) {
    emit(
        on_progress,
        SyncProgress::TransferFinished {
            feed: feed.feed_name().to_string(),
            package: unit.identity(),
            version: unit.version.clone(),
            action,
            success,
            duration: started.elapsed(),
        },
    );
}

async fn transfer_one(
    uc: &UnitContext<'_>,
    unit: &PackageVersion,
) -> Result<UnitOutcome, FeedError> {
    let ctx = uc.ctx;
    ctx.check_cancelled()?;

    emit(
        ctx.on_progress,
        SyncProgress::TransferStarted {
            feed: uc.destination.feed_name().to_string(),
            package: unit.identity(),
            version: unit.version.clone(),
        },
    );

    let path = uc.client.scratch_path(uc.scratch_dir, unit);

    let started = Instant::now();
    let downloaded = uc.client.download(uc.source, unit, &path, ctx).await;
    finished(
        ctx.on_progress,
        uc.source,
        unit,
        SyncAction::Download,
        downloaded.is_ok(),
        started,
    );
    let artifact = downloaded?;
    tracing::info!(
        url = %uc.source.host_label(),
        feed = uc.source.feed_name(),
        package = %unit,
        size = artifact.size,
        sha1 = %artifact.sha1,
        "Downloaded"
    );

    let started = Instant::now();
    let uploaded = uc
        .client
        .upload(uc.destination, unit, &artifact.path, ctx)
        .await;
    finished(
        ctx.on_progress,
        uc.destination,
        unit,
        SyncAction::Upload,
        uploaded.is_ok(),
        started,
    );
    uploaded?;
    tracing::info!(
        url = %uc.destination.host_label(),
        feed = uc.destination.feed_name(),
        package = %unit,
        "Uploaded"
    );

    if !uc.client.verifies_content() {
        tracing::debug!(package = %unit, "Feed type has no hash API, skipping verification");
        return Ok(UnitOutcome::Transferred {
            hash_mismatch: false,
        });
    }

    let hash_mismatch = verify(uc, unit).await?;
    Ok(UnitOutcome::Transferred { hash_mismatch })
}

/// Compare source and destination hashes; remove the destination copy on
/// mismatch so the next iteration transfers it again.
///
/// Returns whether a mismatch was found. Hash lookup failures leave the
/// transfer unverified but do not fail it.
async fn verify(uc: &UnitContext<'_>, unit: &PackageVersion) -> Result<bool, FeedError> {
    let ctx = uc.ctx;
    let started = Instant::now();

    let hashes = async {
        let source = uc.client.content_hash(uc.source, unit, ctx).await?;
        let destination = uc.client.content_hash(uc.destination, unit, ctx).await?;
        Ok::<_, FeedError>((source, destination))
    }
    .await;

    let (source_hash, destination_hash) = match hashes {
        Ok((Some(source), Some(destination))) => (source, destination),
        Ok(_) => {
            tracing::warn!(package = %unit, "Metadata carries no sha1, skipping verification");
            emit(
                ctx.on_progress,
                SyncProgress::Warning {
                    message: format!("no sha1 in metadata for {unit}"),
                },
            );
            return Ok(false);
        }
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            tracing::warn!(package = %unit, error = %e, "Hash lookup failed, transfer left unverified");
            finished(
                ctx.on_progress,
                uc.destination,
                unit,
                SyncAction::Verify,
                false,
                started,
            );
            return Ok(false);
        }
    };

    let matches = source_hash == destination_hash;
    finished(
        ctx.on_progress,
        uc.destination,
        unit,
        SyncAction::Verify,
        matches,
        started,
    );
    if matches {
        tracing::debug!(package = %unit, sha1 = %source_hash, "Hashes match");
        return Ok(false);
    }

    tracing::warn!(
        feed = uc.destination.feed_name(),
        package = %unit,
        source_hash = %source_hash,
        destination_hash = %destination_hash,
        "Hash mismatch, removing destination copy"
    );
    emit(
        ctx.on_progress,
        SyncProgress::HashMismatch {
            feed: uc.destination.feed_name().to_string(),
            package: unit.identity(),
            version: unit.version.clone(),
            source_hash,
            destination_hash,
        },
    );

    let started = Instant::now();
    let label = unit.to_string();
    let repaired = with_retry(
        uc.retry,
        "delete",
        &label,
        ctx.cancel,
        ctx.on_progress,
        |e: &FeedError| e.is_retryable() && !e.is_policy_terminal(),
        || uc.client.delete(uc.destination, unit, ctx),
    )
    .await;
    finished(
        ctx.on_progress,
        uc.destination,
        unit,
        SyncAction::Repair,
        repaired.is_ok(),
        started,
    );
    if let Err(e) = repaired {
        if e.is_cancelled() {
            return Err(e);
        }
        tracing::error!(package = %unit, error = %e, "Failed to remove mismatched destination copy");
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::feed::{DownloadedArtifact, FeedType, Result};

    /// In-memory feed client recording calls and tracking concurrency.
    #[derive(Default)]
    struct FakeClient {
        calls: Mutex<Vec<String>>,
        fail_download: Mutex<Vec<String>>,
        hashes: Mutex<Vec<(String, String, String)>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl FakeClient {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl FeedClient for FakeClient {
        fn feed_type(&self) -> FeedType {
            FeedType::Upack
        }

        async fn list_packages(&self, _: &FeedEndpoint, _: OpContext<'_>) -> Result<Vec<Package>> {
            Ok(Vec::new())
        }

        fn scratch_path(&self, scratch_dir: &Path, package: &PackageVersion) -> PathBuf {
            scratch_dir.join(format!("{}.{}.upack", package.name, package.version))
        }

        async fn download(
            &self,
            endpoint: &FeedEndpoint,
            package: &PackageVersion,
            dest: &Path,
            _: OpContext<'_>,
        ) -> Result<DownloadedArtifact> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.record(format!("download {} {package}", endpoint.feed_name()));
            if self.fail_download.lock().unwrap().contains(&package.name) {
                return Err(FeedError::status(500, "u", ""));
            }
            Ok(DownloadedArtifact {
                path: dest.to_path_buf(),
                size: 1,
                sha1: "00".to_string(),
            })
        }

        async fn upload(
            &self,
            endpoint: &FeedEndpoint,
            package: &PackageVersion,
            _: &Path,
            _: OpContext<'_>,
        ) -> Result<()> {
            self.record(format!("upload {} {package}", endpoint.feed_name()));
            Ok(())
        }

        async fn delete(
            &self,
            endpoint: &FeedEndpoint,
            package: &PackageVersion,
            _: OpContext<'_>,
        ) -> Result<()> {
            self.record(format!("delete {} {package}", endpoint.feed_name()));
            Ok(())
        }

        async fn content_hash(
            &self,
            endpoint: &FeedEndpoint,
            package: &PackageVersion,
            _: OpContext<'_>,
        ) -> Result<Option<String>> {
            Ok(self
                .hashes
                .lock()
                .unwrap()
                .iter()
                .find(|(feed, name, _)| feed == endpoint.feed_name() && *name == package.name)
                .map(|(_, _, hash)| hash.clone()))
        }
    }

    fn endpoints() -> (FeedEndpoint, FeedEndpoint) {
        (
            FeedEndpoint::new("https://src.example.com", "k", "src", FeedType::Upack),
            FeedEndpoint::new("https://dst.example.com", "k", "dst", FeedType::Upack),
        )
    }

    fn limits(max_concurrent_packages: usize) -> TransferLimits {
        TransferLimits {
            max_concurrent_packages,
            backoff_base: Duration::from_millis(1),
            max_retries: 1,
            ..TransferLimits::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_by_distinct_packages() {
        let client = FakeClient::with_delay(Duration::from_secs(1));
        let (src, dst) = endpoints();
        let packages = vec![
            Package::new("g", "a", ["5", "4", "3", "2", "1"]),
            Package::new("g", "b", ["2", "1"]),
        ];

        let report = transfer_packages(
            &client,
            &src,
            &dst,
            &packages,
            &limits(10),
            Path::new("/scratch"),
            &CancellationToken::new(),
            None,
        )
        .await
        .expect("transfer");

        assert_eq!(report.transferred, 7);
        assert_eq!(report.peak_concurrency, 2);
        assert_eq!(client.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_by_limit() {
        let client = FakeClient::with_delay(Duration::from_secs(1));
        let (src, dst) = endpoints();
        let packages: Vec<Package> = (0..6)
            .map(|i| Package::new("g", format!("p{i}"), ["1", "2"]))
            .collect();

        let report = transfer_packages(
            &client,
            &src,
            &dst,
            &packages,
            &limits(3),
            Path::new("/scratch"),
            &CancellationToken::new(),
            None,
        )
        .await
        .expect("transfer");

        assert_eq!(report.transferred, 12);
        assert!(report.peak_concurrency <= 3);
        assert!(client.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn download_then_upload_per_version() {
        let client = FakeClient::default();
        let (src, dst) = endpoints();

        transfer_packages(
            &client,
            &src,
            &dst,
            &[Package::new("g", "a", ["1"])],
            &limits(1),
            Path::new("/scratch"),
            &CancellationToken::new(),
            None,
        )
        .await
        .expect("transfer");

        assert_eq!(
            client.calls(),
            vec!["download src g/a:1".to_string(), "upload dst g/a:1".to_string()]
        );
    }

    #[tokio::test]
    async fn hash_mismatch_deletes_destination_copy() {
        let client = FakeClient::default();
        client.hashes.lock().unwrap().extend([
            ("src".to_string(), "a".to_string(), "aa".to_string()),
            ("dst".to_string(), "a".to_string(), "bb".to_string()),
            ("src".to_string(), "b".to_string(), "cc".to_string()),
            ("dst".to_string(), "b".to_string(), "cc".to_string()),
        ]);
        let (src, dst) = endpoints();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |e| events_clone.lock().unwrap().push(e));

        let report = transfer_packages(
            &client,
            &src,
            &dst,
            &[Package::new("g", "a", ["1"]), Package::new("g", "b", ["1"])],
            &limits(1),
            Path::new("/scratch"),
            &CancellationToken::new(),
            Some(&callback),
        )
        .await
        .expect("mismatch is not an error");

        assert_eq!(report.transferred, 2);
        assert_eq!(report.hash_mismatches, 1);
        let calls = client.calls();
        assert!(calls.contains(&"delete dst g/a:1".to_string()));
        assert!(!calls.iter().any(|c| c.contains("delete dst g/b")));
        let events = events.lock().unwrap();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SyncProgress::HashMismatch { .. }))
                .count(),
            1
        );
        assert!(events.iter().any(|e| matches!(
            e,
            SyncProgress::TransferFinished {
                action: SyncAction::Repair,
                success: true,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_stops_admission_and_is_returned() {
        let client = FakeClient::with_delay(Duration::from_millis(10));
        client.fail_download.lock().unwrap().push("a".to_string());
        let (src, dst) = endpoints();
        let packages = vec![Package::new("g", "a", ["1"]), Package::new("g", "b", ["3", "2", "1"])];

        let err = transfer_packages(
            &client,
            &src,
            &dst,
            &packages,
            &limits(1),
            Path::new("/scratch"),
            &CancellationToken::new(),
            None,
        )
        .await
        .expect_err("download failure");

        assert_eq!(err.status_code(), Some(500));
        assert!(!client.calls().iter().any(|c| c.starts_with("download src g/b")));
    }

    #[tokio::test]
    async fn cancelled_before_start_issues_no_calls() {
        let client = FakeClient::default();
        let (src, dst) = endpoints();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transfer_packages(
            &client,
            &src,
            &dst,
            &[Package::new("g", "a", ["2", "1"])],
            &limits(4),
            Path::new("/scratch"),
            &cancel,
            None,
        )
        .await
        .expect_err("cancelled");

        assert!(err.is_cancelled());
        assert!(client.calls().is_empty());
    }
}
