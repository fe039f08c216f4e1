//! Configuration and report types for sync iterations.

use std::path::PathBuf;
use std::time::Duration;

use super::errors::SyncError;
use crate::feed::{FeedEndpoint, FeedType};
use crate::retry::{DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS, RetryConfig};

/// Default number of packages transferred concurrently per chain.
pub const DEFAULT_MAX_CONCURRENT_PACKAGES: usize = 10;

/// Default number of versions transferred per package per iteration.
pub const DEFAULT_MAX_VERSIONS_PER_PACKAGE: usize = 5;

/// One source/destination pair reconciled as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncChain {
    pub source: FeedEndpoint,
    pub destination: FeedEndpoint,
    /// Selects the feed adapter for both sides.
    pub chain_type: FeedType,
}

impl SyncChain {
    pub fn new(source: FeedEndpoint, destination: FeedEndpoint, chain_type: FeedType) -> Self {
        Self {
            source,
            destination,
            chain_type,
        }
    }

    /// Human-readable `source -> destination` label for logs and events.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "{} {}/{} -> {}/{}",
            self.chain_type,
            self.source.host_label(),
            self.source.feed_name(),
            self.destination.host_label(),
            self.destination.feed_name()
        )
    }
}

/// Bounds on how much work one iteration does and how long it may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    /// Packages kept after diffing, and the transfer concurrency bound.
    pub max_concurrent_packages: usize,
    /// Versions kept per package after diffing.
    pub max_versions_per_package: usize,
    /// Timeout of a single transfer, delete or hash request.
    pub web_request_timeout: Duration,
    /// Timeout of a listing request, and the pause between iterations.
    pub iteration_timeout: Duration,
    /// Deadline for all chains of one iteration.
    pub sync_timeout: Duration,
    /// Attempts per network operation, including the first.
    pub max_retries: usize,
    /// Backoff unit; attempt n waits `backoff_base * n`.
    pub backoff_base: Duration,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            max_concurrent_packages: DEFAULT_MAX_CONCURRENT_PACKAGES,
            max_versions_per_package: DEFAULT_MAX_VERSIONS_PER_PACKAGE,
            web_request_timeout: Duration::from_secs(60),
            iteration_timeout: Duration::from_secs(300),
            sync_timeout: Duration::from_secs(30 * 60),
            max_retries: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl TransferLimits {
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.backoff_base, self.max_retries)
    }
}

/// How many of the newest versions the destination keeps per package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    pub enabled: bool,
    /// Log deletions instead of issuing them.
    pub dry_run: bool,
    /// Versions kept; must be > 0 when enabled.
    pub version_limit: usize,
}

impl RetentionPolicy {
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn keep(version_limit: usize) -> Self {
        Self {
            enabled: true,
            dry_run: false,
            version_limit,
        }
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// An enabled policy must keep at least one version.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.enabled && self.version_limit == 0 {
            return Err(SyncError::Config(
                "retention version limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything one engine instance needs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub chains: Vec<SyncChain>,
    pub limits: TransferLimits,
    pub retention: RetentionPolicy,
    /// Writable scratch directory for downloaded artifacts.
    pub scratch_dir: PathBuf,
}

/// Outcome of the transfer step of one chain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Versions downloaded and uploaded.
    pub transferred: usize,
    /// Versions whose destination copy failed verification and was removed.
    pub hash_mismatches: usize,
    /// Units that never started because of cancellation or an earlier failure.
    pub skipped: usize,
    /// Most units observed holding the admission gate at once.
    pub peak_concurrency: usize,
}

/// Outcome of the retention step of one chain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// Versions deleted.
    pub deleted: usize,
    /// Versions that would have been deleted (dry-run).
    pub planned: usize,
    /// Packages at or under the limit.
    pub within_limit: usize,
    /// Deletes that failed after all attempts.
    pub failed: usize,
    /// Set when a 429/403 stopped retention early.
    pub stopped_by_status: Option<u16>,
}

/// Outcome of one chain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub chain: String,
    pub source_packages: usize,
    pub destination_packages: usize,
    /// Packages selected for transfer after caps.
    pub packages_to_sync: usize,
    /// Versions selected for transfer after caps.
    pub versions_to_sync: usize,
    pub transfer: TransferReport,
    pub retention: RetentionReport,
}

/// Outcome of one chain inside an iteration.
#[derive(Debug)]
pub struct ChainSyncResult {
    pub chain: String,
    pub report: ChainReport,
    /// Error if the chain was abandoned.
    pub error: Option<String>,
}

/// Outcome of one iteration over all chains.
#[derive(Debug, Default)]
pub struct IterationReport {
    pub chains: Vec<ChainSyncResult>,
    pub duration: Duration,
}

impl IterationReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.chains.iter().filter(|c| c.error.is_some()).count()
    }

    #[must_use]
    pub fn transferred(&self) -> usize {
        self.chains.iter().map(|c| c.report.transfer.transferred).sum()
    }
}
