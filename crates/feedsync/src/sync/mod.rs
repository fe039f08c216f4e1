//! Feed reconciliation.
//!
//! # Module Structure
//!
//! - [`types`] - Configuration and reports: `SyncConfig`, `SyncChain`, `TransferLimits`, `RetentionPolicy`
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`diff`] - Pure catalog diffing: `packages_to_sync()`, `apply_limits()`, `retention_candidates()`
//! - [`transfer`] - Bounded-concurrency download/upload/verify pipeline
//! - [`retention`] - Destination pruning
//! - [`engine`] - Orchestrator: `SyncEngine`
//!
//! # Example
//!
//! ```ignore
//! use feedsync::sync::{SyncEngine, SyncProgress};
//!
//! let engine = SyncEngine::new(config, transport).with_progress(Box::new(|event| {
//!     if let SyncProgress::ChainFailed { chain, error } = event {
//!         eprintln!("{chain}: {error}");
//!     }
//! }));
//! engine.run(&shutdown, || Ok(())).await;
//! ```

pub mod diff;
pub mod engine;
mod errors;
mod progress;
pub mod retention;
pub mod transfer;
mod types;

pub use errors::{Result, SyncError};
pub use progress::{FeedSide, ProgressCallback, SyncAction, SyncProgress, emit};
pub use types::{
    ChainReport, ChainSyncResult, DEFAULT_MAX_CONCURRENT_PACKAGES,
    DEFAULT_MAX_VERSIONS_PER_PACKAGE, IterationReport, RetentionPolicy, RetentionReport,
    SyncChain, SyncConfig, TransferLimits, TransferReport,
};

pub use diff::{apply_limits, packages_to_sync, retention_candidates};
pub use engine::SyncEngine;
pub use retention::prune_destination;
pub use transfer::transfer_packages;
