//! Feedsync - keeps package feeds in sync.
//!
//! This library mirrors package feeds (universal packages, NuGet and flat
//! asset directories) from a source registry to a destination registry. Each
//! iteration lists both sides, transfers what the destination is missing,
//! verifies content hashes and optionally prunes old versions.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use feedsync::http::reqwest_transport::ReqwestTransport;
//! use feedsync::sync::SyncEngine;
//!
//! let transport = Arc::new(ReqwestTransport::with_timeout(config.limits.web_request_timeout)?);
//! let engine = SyncEngine::new(config, transport);
//! let report = engine.run_iteration(&cancel).await?;
//! ```

pub mod feed;
pub mod http;
pub mod retry;
pub mod sync;

pub use feed::{FeedClient, FeedEndpoint, FeedError, FeedType, Package, PackageVersion};
pub use sync::{
    IterationReport, ProgressCallback, RetentionPolicy, SyncChain, SyncConfig, SyncEngine,
    SyncError, SyncProgress, TransferLimits,
};
