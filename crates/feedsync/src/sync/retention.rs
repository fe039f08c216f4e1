//! Retention pruning of destination feeds.

use super::diff::retention_candidates;
use super::errors::SyncError;
use super::progress::{SyncProgress, emit};
use super::types::{RetentionPolicy, RetentionReport};
use crate::feed::{FeedClient, FeedEndpoint, FeedError, OpContext, Package};
use crate::retry::{RetryConfig, with_retry};

/// Delete destination versions beyond the newest `version_limit`.
///
/// `packages` must be a fresh destination listing, versions newest-first.
/// In dry-run mode nothing is deleted. A 429 or 403 answer stops retention
/// for the rest of the chain and still counts as success; other delete
/// failures are logged and pruning moves on to the next version. An enabled
/// policy with a zero limit is rejected before anything is deleted.
pub async fn prune_destination(
    client: &dyn FeedClient,
    destination: &FeedEndpoint,
    packages: &[Package],
    policy: &RetentionPolicy,
    retry: RetryConfig,
    ctx: OpContext<'_>,
) -> Result<RetentionReport, SyncError> {
    let mut report = RetentionReport::default();

    if !policy.enabled {
        return Ok(report);
    }
    policy.validate()?;
    if !client.feed_type().supports_retention() {
        tracing::debug!(
            feed = destination.feed_name(),
            feed_type = %client.feed_type(),
            "Feed type is unversioned, skipping retention"
        );
        return Ok(report);
    }

    let feed = destination.feed_name().to_string();
    let limit = policy.version_limit;

    for pkg in packages.iter().filter(|p| p.versions.len() <= limit) {
        report.within_limit += 1;
        tracing::debug!(
            feed = %feed,
            package = %pkg.identity(),
            versions = pkg.versions.len(),
            limit,
            "Within retention limit"
        );
        emit(
            ctx.on_progress,
            SyncProgress::RetentionSkipped {
                feed: feed.clone(),
                package: pkg.identity(),
                versions: pkg.versions.len(),
                limit,
            },
        );
    }

    for candidate in retention_candidates(packages, limit) {
        if policy.dry_run {
            tracing::info!(
                url = %destination.host_label(),
                feed = %feed,
                package = %candidate,
                "Dry-run: would delete version"
            );
            report.planned += 1;
            emit(
                ctx.on_progress,
                SyncProgress::RetentionDeleted {
                    feed: feed.clone(),
                    package: candidate.identity(),
                    version: candidate.version.clone(),
                    dry_run: true,
                    success: true,
                },
            );
            continue;
        }

        let label = candidate.to_string();
        let result = with_retry(
            retry,
            "delete",
            &label,
            ctx.cancel,
            ctx.on_progress,
            |e: &FeedError| e.is_retryable() && !e.is_policy_terminal(),
            || client.delete(destination, &candidate, ctx),
        )
        .await;

        let success = match result {
            Ok(()) => {
                report.deleted += 1;
                tracing::info!(
                    url = %destination.host_label(),
                    feed = %feed,
                    package = %candidate,
                    "Deleted version"
                );
                true
            }
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) if e.is_policy_terminal() => {
                let status = e.status_code().unwrap_or_default();
                tracing::warn!(
                    url = %destination.host_label(),
                    feed = %feed,
                    package = %candidate,
                    status,
                    "Delete refused, stopping retention for this chain"
                );
                report.stopped_by_status = Some(status);
                emit(
                    ctx.on_progress,
                    SyncProgress::RetentionStopped {
                        feed: feed.clone(),
                        status,
                    },
                );
                return Ok(report);
            }
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    url = %destination.host_label(),
                    feed = %feed,
                    package = %candidate,
                    error = %e,
                    "Delete failed"
                );
                false
            }
        };

        emit(
            ctx.on_progress,
            SyncProgress::RetentionDeleted {
                feed: feed.clone(),
                package: candidate.identity(),
                version: candidate.version.clone(),
                dry_run: false,
                success,
            },
        );
    }

    Ok(report)
}
