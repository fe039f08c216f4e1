//! Shared retry utilities for feed operations.
//!
//! Every retried network operation (listing, download, upload, hash fetch,
//! retention delete) uses the same linearly increasing backoff: the n-th
//! retry waits `base_delay * n`. `max_attempts` counts the first try, so an
//! operation is issued at most `max_attempts` times.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{BackoffBuilder, Retryable};
use tokio_util::sync::CancellationToken;

use crate::feed::FeedError;
use crate::sync::{ProgressCallback, SyncProgress, emit};

/// Default delay unit between attempts.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Default number of attempts per operation.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Configuration for retry operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay unit; the n-th retry sleeps `base_delay * n`.
    pub base_delay: Duration,
    /// Total attempts including the first one.
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BACKOFF_BASE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(base_delay: Duration, max_attempts: usize) -> Self {
        Self {
            base_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Build the linear backoff strategy for this configuration.
    #[must_use]
    pub fn into_backoff(self) -> LinearBuilder {
        LinearBuilder {
            base: self.base_delay,
            retries: self.max_attempts.saturating_sub(1),
        }
    }
}

/// Builder for [`LinearBackoff`].
#[derive(Debug, Clone, Copy)]
pub struct LinearBuilder {
    base: Duration,
    retries: usize,
}

impl BackoffBuilder for LinearBuilder {
    type Backoff = LinearBackoff;

    fn build(self) -> Self::Backoff {
        LinearBackoff {
            base: self.base,
            retries: self.retries,
            attempt: 0,
        }
    }
}

/// Yields `base * 1, base * 2, ...` for `retries` steps.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    retries: usize,
    attempt: usize,
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.retries {
            return None;
        }
        self.attempt += 1;
        let factor = u32::try_from(self.attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, runs
/// out of attempts, or `cancel` fires.
///
/// No attempt is started after cancellation, and backoff sleeps end early
/// when the token is cancelled. An attempt already in flight is allowed to
/// complete. Exhausting the attempts wraps the last error in
/// [`FeedError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut, P>(
    config: RetryConfig,
    action: &str,
    target: &str,
    cancel: &CancellationToken,
    on_progress: Option<&ProgressCallback>,
    is_retryable: P,
    mut operation: F,
) -> Result<T, FeedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FeedError>>,
    P: Fn(&FeedError) -> bool,
{
    let attempt = AtomicU32::new(0);

    let retry_op = || {
        let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let cancelled = cancel.is_cancelled();
        if !cancelled {
            tracing::debug!(action, target, attempt = n, "Attempt");
        }
        let fut = operation();
        async move {
            if cancelled {
                return Err(FeedError::Cancelled);
            }
            fut.await
        }
    };

    let sleep_token = cancel.clone();
    let result = retry_op
        .retry(config.into_backoff())
        .sleep(move |delay: Duration| {
            let token = sleep_token.clone();
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => {}
                }
            }
        })
        .when(|e| !cancel.is_cancelled() && is_retryable(e))
        .notify(|err, delay| {
            let current = attempt.load(Ordering::SeqCst);
            tracing::warn!(
                action,
                target,
                attempt = current,
                retry_in = ?delay,
                error = %err,
                "Attempt failed, backing off"
            );
            emit(
                on_progress,
                SyncProgress::RetryBackoff {
                    action: action.to_string(),
                    target: target.to_string(),
                    attempt: current,
                    delay,
                },
            );
        })
        .await;

    match result {
        Ok(value) => Ok(value),
        Err(FeedError::Cancelled) => Err(FeedError::Cancelled),
        Err(err) if cancel.is_cancelled() => {
            tracing::debug!(action, target, error = %err, "Giving up after cancellation");
            Err(FeedError::Cancelled)
        }
        Err(err) if is_retryable(&err) => Err(FeedError::RetriesExhausted {
            operation: action.to_string(),
            target: target.to_string(),
            attempts: attempt.load(Ordering::SeqCst),
            last: Box::new(err),
        }),
        Err(err) => Err(err),
    }
}
