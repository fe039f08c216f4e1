//! Progress reporting for sync runs.
//!
//! Library events are turned into structured log lines and tallied into
//! outcome counters keyed by feed, action and result. The counters are
//! logged and reset at the end of every iteration.

mod logging;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use feedsync::sync::ProgressCallback;

pub use logging::LoggingReporter;

/// Outcome of one counted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    Success,
    Failure,
    /// Dry-run retention: the delete was only logged.
    Planned,
}

impl Outcome {
    pub fn from_success(success: bool) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Planned => "planned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OutcomeKey {
    pub feed: String,
    pub action: &'static str,
    pub outcome: Outcome,
}

/// Per-iteration counters of transfer and retention outcomes.
#[derive(Debug, Default)]
pub struct OutcomeCounters {
    counts: Mutex<BTreeMap<OutcomeKey, u64>>,
}

impl OutcomeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, feed: &str, action: &'static str, outcome: Outcome) {
        let key = OutcomeKey {
            feed: feed.to_string(),
            action,
            outcome,
        };
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        *counts.entry(key).or_insert(0) += 1;
    }

    /// Current counts, sorted by key.
    #[allow(dead_code)]
    pub fn snapshot(&self) -> Vec<(OutcomeKey, u64)> {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Return the counts and start over.
    pub fn take(&self) -> Vec<(OutcomeKey, u64)> {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *counts).into_iter().collect()
    }
}

/// Wrap a reporter as the library's progress callback.
pub fn as_callback(reporter: &Arc<LoggingReporter>) -> ProgressCallback {
    let reporter = Arc::clone(reporter);
    Box::new(move |event| reporter.handle(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_group_by_feed_action_and_outcome() {
        let counters = OutcomeCounters::new();
        counters.record("mirror", "upload", Outcome::Success);
        counters.record("mirror", "upload", Outcome::Success);
        counters.record("mirror", "upload", Outcome::Failure);
        counters.record("internal", "download", Outcome::Success);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].0.feed, "internal");
        assert_eq!(snapshot[1].0.outcome, Outcome::Success);
        assert_eq!(snapshot[1].1, 2);
        assert_eq!(snapshot[2].1, 1);
    }

    #[test]
    fn test_take_resets() {
        let counters = OutcomeCounters::new();
        counters.record("f", "delete", Outcome::Planned);

        assert_eq!(counters.take().len(), 1);
        assert!(counters.take().is_empty());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::from_success(true).as_str(), "success");
        assert_eq!(Outcome::from_success(false).as_str(), "failure");
        assert_eq!(Outcome::Planned.as_str(), "planned");
    }
}
