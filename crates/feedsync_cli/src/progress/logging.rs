use std::time::Duration;

use feedsync::sync::{SyncAction, SyncProgress};

use super::{Outcome, OutcomeCounters};

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter {
    counters: OutcomeCounters,
    /// Pause before the next iteration, when running in a loop.
    next_iteration_in: Option<Duration>,
}

impl LoggingReporter {
    pub fn new(next_iteration_in: Option<Duration>) -> Self {
        Self {
            counters: OutcomeCounters::new(),
            next_iteration_in,
        }
    }

    pub fn counters(&self) -> &OutcomeCounters {
        &self.counters
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::ChainStarted { chain, feed_type } => {
                tracing::info!(chain = %chain, feed_type = %feed_type, "Syncing chain");
            }

            SyncProgress::PackagesListed {
                chain,
                side,
                feed,
                count,
            } => {
                tracing::info!(chain = %chain, side = side.as_str(), feed = %feed, count, "Listed packages");
            }

            SyncProgress::DiffComputed {
                chain,
                packages,
                versions,
            } => {
                tracing::info!(chain = %chain, packages, versions, "Computed packages to sync");
            }

            SyncProgress::TransferStarted {
                feed,
                package,
                version,
            } => {
                tracing::debug!(feed = %feed, package = %package, version = %version, "Transfer started");
            }

            SyncProgress::TransferFinished {
                feed,
                package,
                version,
                action,
                success,
                duration,
            } => {
                self.counters
                    .record(&feed, action.as_str(), Outcome::from_success(success));
                if success {
                    tracing::info!(
                        feed = %feed,
                        package = %package,
                        version = %version,
                        action = %action,
                        duration_ms = duration.as_millis() as u64,
                        "Action succeeded"
                    );
                } else {
                    tracing::warn!(
                        feed = %feed,
                        package = %package,
                        version = %version,
                        action = %action,
                        duration_ms = duration.as_millis() as u64,
                        "Action failed"
                    );
                }
            }

            SyncProgress::HashMismatch {
                feed,
                package,
                version,
                source_hash,
                destination_hash,
            } => {
                tracing::error!(
                    feed = %feed,
                    package = %package,
                    version = %version,
                    source_hash = %source_hash,
                    destination_hash = %destination_hash,
                    "Hash mismatch, destination copy removed"
                );
            }

            SyncProgress::RetryBackoff {
                action,
                target,
                attempt,
                delay,
            } => {
                tracing::warn!(action = %action, target = %target, attempt, delay = ?delay, "Retrying");
            }

            SyncProgress::RetentionDeleted {
                feed,
                package,
                version,
                dry_run,
                success,
            } => {
                let outcome = if dry_run {
                    Outcome::Planned
                } else {
                    Outcome::from_success(success)
                };
                self.counters
                    .record(&feed, SyncAction::Delete.as_str(), outcome);
                tracing::debug!(feed = %feed, package = %package, version = %version, dry_run, success, "Retention delete");
            }

            SyncProgress::RetentionSkipped {
                feed,
                package,
                versions,
                limit,
            } => {
                tracing::debug!(feed = %feed, package = %package, versions, limit, "Within retention limit");
            }

            SyncProgress::RetentionStopped { feed, status } => {
                tracing::warn!(feed = %feed, status, "Retention stopped by server");
            }

            SyncProgress::ChainFinished {
                chain,
                transferred,
                deleted,
            } => {
                tracing::info!(chain = %chain, transferred, deleted, "Chain complete");
            }

            SyncProgress::ChainFailed { chain, error } => {
                tracing::error!(chain = %chain, error = %error, "Chain failed");
            }

            SyncProgress::IterationFinished {
                chains,
                failed,
                duration,
            } => {
                for (key, count) in self.counters.take() {
                    tracing::info!(
                        feed = %key.feed,
                        action = key.action,
                        result = key.outcome.as_str(),
                        count,
                        "Outcome"
                    );
                }

                match self.next_iteration_in.and_then(|pause| chrono::Duration::from_std(pause).ok()) {
                    Some(pause) => {
                        let next_run = chrono::Local::now() + pause;
                        tracing::info!(
                            chains,
                            failed,
                            duration_s = duration.as_secs(),
                            next_run = %next_run.format("%Y-%m-%d %H:%M:%S"),
                            "Iteration complete"
                        );
                    }
                    None => {
                        tracing::info!(chains, failed, duration_s = duration.as_secs(), "Iteration complete");
                    }
                }
            }

            SyncProgress::Warning { message } => {
                tracing::warn!("{}", message);
            }

            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_and_retention_events_are_counted() {
        let reporter = LoggingReporter::new(None);
        reporter.handle(SyncProgress::TransferFinished {
            feed: "internal".to_string(),
            package: "/a".to_string(),
            version: "1.0".to_string(),
            action: SyncAction::Download,
            success: true,
            duration: Duration::from_millis(5),
        });
        reporter.handle(SyncProgress::RetentionDeleted {
            feed: "mirror".to_string(),
            package: "/a".to_string(),
            version: "0.1".to_string(),
            dry_run: true,
            success: true,
        });

        let snapshot = reporter.counters().snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0.action, "download");
        assert_eq!(snapshot[1].0.action, "delete");
        assert_eq!(snapshot[1].0.outcome, Outcome::Planned);
    }

    #[test]
    fn test_iteration_finished_resets_counters() {
        let reporter = LoggingReporter::new(Some(Duration::from_secs(300)));
        reporter.handle(SyncProgress::TransferFinished {
            feed: "mirror".to_string(),
            package: "/a".to_string(),
            version: "1.0".to_string(),
            action: SyncAction::Upload,
            success: false,
            duration: Duration::ZERO,
        });
        reporter.handle(SyncProgress::IterationFinished {
            chains: 1,
            failed: 1,
            duration: Duration::from_secs(2),
        });

        assert!(reporter.counters().snapshot().is_empty());
    }
}
