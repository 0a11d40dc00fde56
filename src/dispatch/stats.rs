use serde::Serialize;

use crate::feed::Outcome;
use crate::storage::{Feed, StoryCounts};

/// Per-outcome feed counters, serialized under the outcome labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub ok: usize,
    pub unchanged: usize,
    pub cant_parse: usize,
    pub http_error: usize,
    pub exception: usize,
}

impl FeedStats {
    pub fn record(&mut self, outcome: Outcome) {
        *self.slot(outcome) += 1;
    }

    pub fn get(&self, outcome: Outcome) -> usize {
        match outcome {
            Outcome::Ok => self.ok,
            Outcome::Same => self.unchanged,
            Outcome::ParseError => self.cant_parse,
            Outcome::HttpError => self.http_error,
            Outcome::Exception => self.exception,
        }
    }

    pub fn total(&self) -> usize {
        Outcome::ALL.iter().map(|o| self.get(*o)).sum()
    }

    pub fn merge(&mut self, other: &FeedStats) {
        for outcome in Outcome::ALL {
            *self.slot(outcome) += other.get(outcome);
        }
    }

    fn slot(&mut self, outcome: Outcome) -> &mut usize {
        match outcome {
            Outcome::Ok => &mut self.ok,
            Outcome::Same => &mut self.unchanged,
            Outcome::ParseError => &mut self.cant_parse,
            Outcome::HttpError => &mut self.http_error,
            Outcome::Exception => &mut self.exception,
        }
    }
}

/// What one worker hands back after draining its queue
#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub worker: usize,
    pub stats: FeedStats,
    pub stories: StoryCounts,
    /// The feed as stored after the worker's last counted attempt
    pub last_feed: Option<Feed>,
}

impl WorkerReport {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            ..Default::default()
        }
    }
}

/// Totals across all workers of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchSummary {
    pub workers: usize,
    pub feeds: usize,
    pub outcomes: FeedStats,
    pub stories: StoryCounts,
}

impl DispatchSummary {
    pub fn from_reports(reports: &[WorkerReport]) -> Self {
        reports.iter().fold(
            Self {
                workers: reports.len(),
                ..Default::default()
            },
            |mut summary, report| {
                summary.outcomes.merge(&report.stats);
                summary.stories.merge(&report.stories);
                summary.feeds += report.stats.total();
                summary
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_and_get() {
        let mut stats = FeedStats::default();
        stats.record(Outcome::Ok);
        stats.record(Outcome::Ok);
        stats.record(Outcome::Same);
        assert_eq!(stats.get(Outcome::Ok), 2);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_summary_merges_worker_reports() {
        let mut a = WorkerReport::new(0);
        a.stats.record(Outcome::Ok);
        a.stories.new = 3;
        let mut b = WorkerReport::new(1);
        b.stats.record(Outcome::Exception);
        b.stats.record(Outcome::Ok);
        b.stories.same = 2;

        let summary = DispatchSummary::from_reports(&[a, b]);
        assert_eq!(summary.workers, 2);
        assert_eq!(summary.feeds, 3);
        assert_eq!(summary.outcomes.ok, 2);
        assert_eq!(summary.outcomes.exception, 1);
        assert_eq!(summary.stories.new, 3);
        assert_eq!(summary.stories.same, 2);
    }

    #[test]
    fn test_stats_serialize_under_labels() {
        let mut stats = FeedStats::default();
        stats.record(Outcome::ParseError);
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["cant_parse"], 1);
        assert_eq!(json["unchanged"], 0);
    }
}
