use std::time::Duration;

use crate::feed::Outcome;
use crate::storage::StoryCounts;

/// Timing and result of one feed attempt, handed to the recorder
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTiming {
    pub feed_id: i64,
    pub outcome: Outcome,
    /// History code of the attempt (explicit, or the outcome's fallback)
    pub code: u16,
    pub elapsed: Duration,
    pub stories: StoryCounts,
}

/// Out-of-band sink for per-feed fetch statistics.
///
/// Fire-and-forget: implementations must not block the worker and have no way
/// to fail the attempt they describe.
pub trait FetchRecorder: Send + Sync {
    fn record(&self, timing: &FetchTiming);
}

/// Emits each timing as a structured `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl FetchRecorder for TracingRecorder {
    fn record(&self, timing: &FetchTiming) {
        tracing::info!(
            target: "feedpipe::analytics",
            feed_id = timing.feed_id,
            outcome = %timing.outcome,
            code = timing.code,
            elapsed_ms = u64::try_from(timing.elapsed.as_millis()).unwrap_or(u64::MAX),
            new = timing.stories.new,
            updated = timing.stories.updated,
            "Feed fetched"
        );
    }
}
