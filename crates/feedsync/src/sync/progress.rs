//! Progress reporting types for sync operations.
//!
//! Events are delivered synchronously to an optional callback. The CLI maps
//! them to log lines and outcome counters; tests collect them.

use std::fmt;
use std::time::Duration;

use crate::feed::FeedType;

/// Network action a per-unit outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    Download,
    Upload,
    /// Source/destination hash comparison.
    Verify,
    /// Deleting a destination copy that failed verification.
    Repair,
    /// Retention delete.
    Delete,
}

impl SyncAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::Download => "download",
            SyncAction::Upload => "upload",
            SyncAction::Verify => "verify",
            SyncAction::Repair => "repair",
            SyncAction::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a chain a listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSide {
    Source,
    Destination,
}

impl FeedSide {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FeedSide::Source => "source",
            FeedSide::Destination => "destination",
        }
    }
}

/// Progress events emitted during sync operations.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// Starting a chain.
    ChainStarted { chain: String, feed_type: FeedType },

    /// A feed listing completed.
    PackagesListed {
        chain: String,
        side: FeedSide,
        feed: String,
        count: usize,
    },

    /// Diff finished; counts are after caps.
    DiffComputed {
        chain: String,
        packages: usize,
        versions: usize,
    },

    /// A transfer unit acquired the admission gate.
    TransferStarted {
        feed: String,
        package: String,
        version: String,
    },

    /// One network action of a transfer unit completed.
    TransferFinished {
        feed: String,
        package: String,
        version: String,
        action: SyncAction,
        success: bool,
        duration: Duration,
    },

    /// Source and destination hashes differ; the destination copy is removed.
    HashMismatch {
        feed: String,
        package: String,
        version: String,
        source_hash: String,
        destination_hash: String,
    },

    /// An attempt failed and the operation will be retried.
    RetryBackoff {
        action: String,
        target: String,
        attempt: u32,
        delay: Duration,
    },

    /// A retention delete was issued (or logged, in dry-run).
    RetentionDeleted {
        feed: String,
        package: String,
        version: String,
        dry_run: bool,
        success: bool,
    },

    /// A package is at or under the version limit.
    RetentionSkipped {
        feed: String,
        package: String,
        versions: usize,
        limit: usize,
    },

    /// A 429/403 answer stopped retention for the chain.
    RetentionStopped { feed: String, status: u16 },

    /// A chain completed.
    ChainFinished {
        chain: String,
        transferred: usize,
        deleted: usize,
    },

    /// A chain was abandoned for this iteration.
    ChainFailed { chain: String, error: String },

    /// All chains of an iteration were attempted.
    IterationFinished {
        chains: usize,
        failed: usize,
        duration: Duration,
    },

    /// A non-fatal condition worth surfacing.
    Warning { message: String },
}

/// Callback type for progress reporting.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}
