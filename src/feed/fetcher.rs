use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::document::ParsedDocument;
use super::outcome::Outcome;
use super::parser::{FeedSource, SourceError, SourceRequest};
use super::sampling::{draw_selects_force, UniformSource};
use crate::storage::{Database, DatabaseError, Feed};
use crate::util::cache_bust_url;

/// Default hard deadline for one fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(150);

/// Default chance that a fetch skips the cache validators
pub const DEFAULT_FORCE_PROBABILITY: f64 = 0.01;

/// Errors that end a fetch without a document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The feed was deleted (or never existed) between scheduling and fetching
    #[error("Feed {0} vanished")]
    FeedVanished(i64),
    /// The whole fetch exceeded its deadline
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
    /// The transport reported a structured failure
    #[error("HTTP {status} {reason}")]
    Transport {
        status: u16,
        reason: String,
        body: String,
    },
    /// Any other source failure
    #[error(transparent)]
    Source(SourceError),
    #[error(transparent)]
    Database(DatabaseError),
}

impl From<SourceError> for FetchError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Transport {
                status,
                reason,
                body,
            } => FetchError::Transport {
                status,
                reason,
                body,
            },
            other => FetchError::Source(other),
        }
    }
}

impl From<DatabaseError> for FetchError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::FeedNotFound(id) => FetchError::FeedVanished(id),
            other => FetchError::Database(other),
        }
    }
}

/// A completed fetch. `document` is absent only when the request could not be
/// formed even without cache validators.
#[derive(Debug)]
pub struct Fetched {
    pub outcome: Outcome,
    pub document: Option<ParsedDocument>,
}

/// Per-run fetch settings
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    /// Base user agent; the feed's site link is appended per request
    pub user_agent: String,
    pub force_probability: f64,
    /// Bypass the cache validators on every fetch
    pub force: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: default_user_agent(),
            force_probability: DEFAULT_FORCE_PROBABILITY,
            force: false,
        }
    }
}

pub fn default_user_agent() -> String {
    format!("feedpipe/{}", env!("CARGO_PKG_VERSION"))
}

/// The request a fetch will make, decided before any I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPlan {
    pub request: SourceRequest,
    /// The address carries a cache-busting parameter and no validators
    pub cache_busted: bool,
}

/// Decide which request to send for `feed`.
///
/// A forced fetch, or one selected by `draw`, drops the validators and
/// cache-busts the address. A feed that has never been fetched or never
/// proved good drops the validators only.
pub fn plan_request(feed: &Feed, config: &FetcherConfig, draw: f64, token: u64) -> RequestPlan {
    let user_agent = match feed.link.as_deref().filter(|l| !l.is_empty()) {
        Some(link) => format!("{} (+{})", config.user_agent, link),
        None => config.user_agent.clone(),
    };

    let request = SourceRequest {
        address: feed.address.clone(),
        user_agent,
        etag: feed.etag.clone().filter(|e| !e.is_empty()),
        modified: feed.last_modified,
    };

    if config.force || draw_selects_force(draw, config.force_probability) {
        return RequestPlan {
            request: SourceRequest {
                address: cache_bust_url(&feed.address, token),
                ..request.without_conditionals()
            },
            cache_busted: true,
        };
    }

    if !feed.fetched_once || !feed.known_good {
        return RequestPlan {
            request: request.without_conditionals(),
            cache_busted: false,
        };
    }

    RequestPlan {
        request,
        cache_busted: false,
    }
}

/// Performs one conditional fetch per call.
#[derive(Clone)]
pub struct Fetcher {
    db: Database,
    source: Arc<dyn FeedSource>,
    random: Arc<dyn UniformSource>,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(
        db: Database,
        source: Arc<dyn FeedSource>,
        random: Arc<dyn UniformSource>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            db,
            source,
            random,
            config,
        }
    }

    /// Fetch the feed's document.
    ///
    /// Any document the source produces comes back as [`Outcome::Ok`],
    /// whatever its status; classifying it is the processor's job.
    ///
    /// # Errors
    ///
    /// - [`FetchError::FeedVanished`] - no feed with this id
    /// - [`FetchError::Timeout`] - the deadline passed
    /// - [`FetchError::Transport`] / [`FetchError::Source`] - the source failed
    pub async fn fetch(&self, feed_id: i64) -> Result<Fetched, FetchError> {
        let feed = self.db.get_feed_by_id(feed_id).await?;
        self.fetch_feed(&feed).await
    }

    /// Fetch an already loaded feed under the configured deadline.
    pub async fn fetch_feed(&self, feed: &Feed) -> Result<Fetched, FetchError> {
        let token = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let plan = plan_request(feed, &self.config, self.random.draw(), token);

        if plan.cache_busted {
            tracing::debug!(
                feed_id = feed.id,
                address = %plan.request.address,
                "Forcing uncached fetch"
            );
        }

        let attempt = self.fetch_with_retry(feed, &plan.request);
        match tokio::time::timeout(self.config.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.config.timeout)),
        }
    }

    async fn fetch_with_retry(
        &self,
        feed: &Feed,
        request: &SourceRequest,
    ) -> Result<Fetched, FetchError> {
        let document = match self.source.parse(request).await {
            Ok(document) => document,
            Err(SourceError::InvalidRequest(reason)) => {
                tracing::warn!(
                    feed_id = feed.id,
                    reason = %reason,
                    "Invalid request, retrying without cache validators"
                );
                match self.source.parse(&request.without_conditionals()).await {
                    Ok(document) => document,
                    Err(SourceError::InvalidRequest(reason)) => {
                        tracing::warn!(
                            feed_id = feed.id,
                            reason = %reason,
                            "Invalid request on retry"
                        );
                        return Ok(Fetched {
                            outcome: Outcome::HttpError,
                            document: None,
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Fetched {
            outcome: Outcome::Ok,
            document: Some(document),
        })
    }
}
