use std::time::{Duration, Instant};
use thiserror::Error;

use super::analytics::FetchTiming;
use super::stats::WorkerReport;
use super::{DispatchOptions, PipelineContext};
use crate::feed::{FetchError, Outcome, ProcessError};
use crate::storage::{DatabaseError, Feed, StoryCounts};
use crate::util::truncate_to_width;

/// Anything that can end one feed's attempt early
#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl AttemptError {
    fn is_vanished(&self) -> bool {
        matches!(
            self,
            AttemptError::Fetch(FetchError::FeedVanished(_))
                | AttemptError::Process(ProcessError::FeedVanished(_))
                | AttemptError::Database(DatabaseError::FeedNotFound(_))
        )
    }
}

/// What a successful pipeline run produced
struct PipelineResult {
    outcome: Outcome,
    counts: StoryCounts,
    feed_id: i64,
}

/// Drain one queue, in order. No feed's failure stops the loop.
pub(super) async fn run_queue(
    ctx: &PipelineContext,
    options: &DispatchOptions,
    worker: usize,
    queue: Vec<i64>,
) -> WorkerReport {
    let mut report = WorkerReport::new(worker);
    let total = queue.len();

    for (position, feed_id) in queue.into_iter().enumerate() {
        tracing::debug!(
            worker = worker,
            feed_id = feed_id,
            position = position + 1,
            total = total,
            "Next feed"
        );

        let Some((outcome, counts, feed)) = attempt_feed(ctx, options, feed_id).await else {
            continue;
        };

        report.stats.record(outcome);
        report.stories.merge(&counts);
        if feed.is_some() {
            report.last_feed = feed;
        }
    }

    tracing::info!(
        worker = worker,
        feeds = report.stats.total(),
        ok = report.stats.ok,
        unchanged = report.stats.unchanged,
        errors = report.stats.http_error + report.stats.cant_parse + report.stats.exception,
        "Worker finished"
    );
    report
}

/// One feed, start to finish. `None` means the feed is skipped and not counted.
async fn attempt_feed(
    ctx: &PipelineContext,
    options: &DispatchOptions,
    feed_id: i64,
) -> Option<(Outcome, StoryCounts, Option<Feed>)> {
    let started = Instant::now();
    let mut outcome = Outcome::Exception;
    let mut counts = StoryCounts::default();
    let mut code: Option<u16> = None;
    let mut current_id = feed_id;

    match run_pipeline(ctx, options, feed_id).await {
        Ok(result) => {
            outcome = result.outcome;
            counts = result.counts;
            current_id = result.feed_id;
        }
        Err(e) if e.is_vanished() => {
            tracing::debug!(feed_id = feed_id, "Feed vanished, skipping");
            return None;
        }
        Err(AttemptError::Fetch(FetchError::Transport {
            status,
            reason,
            body,
        })) => {
            tracing::warn!(feed_id = feed_id, status = status, reason = %reason, "Transport error");
            record_history(ctx, feed_id, status, &reason, Some(&body)).await;
            code = Some(status);
        }
        Err(AttemptError::Fetch(FetchError::Timeout(limit))) => {
            tracing::warn!(feed_id = feed_id, limit_secs = limit.as_secs(), "Fetch timed out");
            record_history(ctx, feed_id, 505, "Timeout", None).await;
            code = Some(505);
        }
        Err(e) => {
            let diagnostic = format!("{:#}", anyhow::Error::from(e));
            tracing::error!(
                feed_id = feed_id,
                error = %diagnostic,
                "Unexpected error processing feed"
            );
            match ctx.db.get_feed_by_id(feed_id).await {
                Ok(feed) => {
                    current_id = feed.id;
                    record_history(ctx, feed.id, 500, "Error", Some(&diagnostic)).await;
                    code = Some(500);
                }
                Err(reload) => {
                    tracing::warn!(
                        feed_id = feed_id,
                        error = %reload,
                        "Feed unavailable after error, skipping"
                    );
                    return None;
                }
            }
        }
    }

    let code = code.unwrap_or_else(|| outcome.fallback_code());
    let elapsed = started.elapsed();
    let feed = finish_attempt(ctx, current_id, elapsed).await;

    if options.verbose {
        let title = feed
            .as_ref()
            .map(|f| truncate_to_width(&f.title, 30).into_owned())
            .unwrap_or_default();
        tracing::debug!(
            feed_id = current_id,
            title = %title,
            outcome = %outcome,
            code = code,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Feed done"
        );
    }

    ctx.recorder.record(&FetchTiming {
        feed_id: current_id,
        outcome,
        code,
        elapsed,
        stories: counts,
    });

    Some((outcome, counts, feed))
}

/// Fetch, then process when there is a document worth processing, then
/// promote the feed when it earned it.
async fn run_pipeline(
    ctx: &PipelineContext,
    options: &DispatchOptions,
    feed_id: i64,
) -> Result<PipelineResult, AttemptError> {
    // Fresh copy; another worker or a merge may have touched it
    let feed = ctx.db.get_feed_by_id(feed_id).await?;
    let fetched = ctx.fetcher.fetch(feed.id).await?;

    let mut result = PipelineResult {
        outcome: fetched.outcome,
        counts: StoryCounts::default(),
        feed_id: feed.id,
    };

    let Some(document) = fetched.document else {
        return Ok(result);
    };
    if fetched.outcome != Outcome::Ok && !options.force {
        return Ok(result);
    }

    let processed = ctx.processor.process(feed.id, document).await?;
    result.outcome = processed.outcome;
    result.counts = processed.counts;
    result.feed_id = processed.feed.id;

    let mut feed = processed.feed;
    let earned = processed.counts.new > 0 || options.force;
    if earned && (!feed.known_good || !feed.fetched_once) {
        tracing::debug!(feed_id = feed.id, "Promoting feed to known good");
        feed.known_good = true;
        feed.fetched_once = true;
        ctx.db.save_feed(&feed).await?;
    }

    Ok(result)
}

/// Post-attempt bookkeeping on a fresh copy of the feed.
///
/// Failures here are logged; the attempt still counts.
async fn finish_attempt(ctx: &PipelineContext, feed_id: i64, elapsed: Duration) -> Option<Feed> {
    let mut feed = match ctx.db.get_feed_by_id(feed_id).await {
        Ok(feed) => feed,
        Err(e) => {
            tracing::warn!(feed_id = feed_id, error = %e, "Could not reload feed for bookkeeping");
            return None;
        }
    };

    feed.last_load_time = elapsed.as_secs_f64().round() as i64;
    feed.fetched_once = true;

    match ctx.db.save_feed(&feed).await {
        Ok(saved) => Some(saved),
        Err(DatabaseError::IntegrityConflict(reason)) => {
            tracing::warn!(feed_id = feed_id, reason = %reason, "Integrity conflict saving feed");
            Some(feed)
        }
        Err(e) => {
            tracing::warn!(feed_id = feed_id, error = %e, "Failed to save feed bookkeeping");
            Some(feed)
        }
    }
}

async fn record_history(
    ctx: &PipelineContext,
    feed_id: i64,
    code: u16,
    message: &str,
    detail: Option<&str>,
) {
    if let Err(e) = ctx.db.save_feed_history(feed_id, code, message, detail).await {
        tracing::warn!(feed_id = feed_id, code = code, error = %e, "Failed to record feed history");
    }
}
