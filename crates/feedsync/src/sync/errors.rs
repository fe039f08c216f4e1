use std::time::Duration;

use thiserror::Error;

use super::types::IterationReport;
use crate::feed::FeedError;

/// Errors from running a chain or an iteration.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// An endpoint cannot be used; the chain is not started.
    #[error("invalid chain configuration: {0}")]
    Config(String),

    #[error("iteration exceeded its {0:?} deadline")]
    IterationTimeout(Duration),

    #[error("sync cancelled")]
    Cancelled,

    /// Some chains were abandoned; the report covers all of them.
    #[error("{failed} of {total} chains failed")]
    ChainsFailed {
        failed: usize,
        total: usize,
        report: IterationReport,
    },
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Feed(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
