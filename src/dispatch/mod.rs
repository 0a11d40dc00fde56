//! Worker pool that drives feeds through fetch and process.
//!
//! Each worker owns a disjoint queue of feed ids (see [`partition_feeds`]) and
//! its own counters; the only thing workers share is the database. Callers
//! merge the returned [`WorkerReport`]s with [`DispatchSummary::from_reports`].

mod analytics;
mod partition;
mod stats;
mod worker;

use std::sync::Arc;
use std::time::Instant;

use crate::feed::{Fetcher, Processor};
use crate::storage::Database;

pub use analytics::{FetchRecorder, FetchTiming, TracingRecorder};
pub use partition::partition_feeds;
pub use stats::{DispatchSummary, FeedStats, WorkerReport};

/// Everything a worker needs to handle a feed
pub struct PipelineContext {
    pub db: Database,
    pub fetcher: Fetcher,
    pub processor: Processor,
    pub recorder: Arc<dyn FetchRecorder>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Process every fetched document and promote the feed regardless of new stories.
    /// The fetcher's own `force` setting should match.
    pub force: bool,
    pub verbose: bool,
    /// Run on the caller's task instead of spawning workers
    pub single_threaded: bool,
}

pub struct Dispatcher {
    ctx: Arc<PipelineContext>,
    options: DispatchOptions,
    workers: usize,
    queues: Vec<Vec<i64>>,
    started: Instant,
}

impl Dispatcher {
    pub fn new(ctx: PipelineContext, options: DispatchOptions, workers: usize) -> Self {
        let workers = if options.single_threaded { 1 } else { workers.max(1) };
        Self {
            ctx: Arc::new(ctx),
            options,
            workers,
            queues: vec![Vec::new(); workers],
            started: Instant::now(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Append queues of feed ids. Queue `i` goes to worker `i % workers`, so
    /// in single-threaded mode everything lands on worker 0 in order.
    pub fn add_jobs(&mut self, queues: Vec<Vec<i64>>) {
        for (i, queue) in queues.into_iter().enumerate() {
            self.queues[i % self.workers].extend(queue);
        }
    }

    /// Run every queue to completion and return one report per worker.
    ///
    /// Queues are consumed; a second call runs nothing new unless more jobs
    /// were added.
    pub async fn run_jobs(&mut self) -> Vec<WorkerReport> {
        let queues: Vec<Vec<i64>> = self.queues.iter_mut().map(std::mem::take).collect();
        let total: usize = queues.iter().map(Vec::len).sum();
        tracing::info!(
            workers = self.workers,
            feeds = total,
            single_threaded = self.options.single_threaded,
            "Dispatching feeds"
        );

        let reports = if self.options.single_threaded {
            let queue = queues.into_iter().next().unwrap_or_default();
            vec![worker::run_queue(&self.ctx, &self.options, 0, queue).await]
        } else {
            self.run_spawned(queues).await
        };

        let summary = DispatchSummary::from_reports(&reports);
        tracing::info!(
            feeds = summary.feeds,
            new_stories = summary.stories.new,
            elapsed_secs = self.started.elapsed().as_secs(),
            "Dispatch complete"
        );
        reports
    }

    async fn run_spawned(&self, queues: Vec<Vec<i64>>) -> Vec<WorkerReport> {
        let handles: Vec<_> = queues
            .into_iter()
            .enumerate()
            .map(|(i, queue)| {
                let ctx = Arc::clone(&self.ctx);
                let options = self.options;
                tokio::spawn(async move {
                    tracing::debug!(worker = i, feeds = queue.len(), "Starting worker");
                    worker::run_queue(&ctx, &options, i, queue).await
                })
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(worker = i, error = %e, "Worker task failed");
                    reports.push(WorkerReport::new(i));
                }
            }
        }
        reports
    }
}
