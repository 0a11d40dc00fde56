//! Turns a fetched document into feed metadata updates and stored stories.
//!
//! The document's transport status decides the path:
//!
//! | status / content            | history            | outcome      |
//! |-----------------------------|--------------------|--------------|
//! | 304                         | 304 Not modified   | `Same`       |
//! | 301, no entries             | 301 HTTP Redirect  | `HttpError`  |
//! | >= 400                      | `<status>` HTTP Error | `HttpError` |
//! | no entries, non-XML body    | 552 Non-xml feed   | `ParseError` |
//! | no entries, XML syntax error| 553 SAX Exception  | `ParseError` |
//! | anything else               | 200 OK             | `Ok`         |
//!
//! Error statuses and unparseable bodies first try to repair the feed's
//! address (unless the feed is known good); a successful repair replaces the
//! history entry with an immediate refetch.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use super::dedup::build_stories;
use super::discovery::AddressRepair;
use super::document::{MalformedKind, ParsedDocument};
use super::outcome::Outcome;
use crate::storage::{Database, DatabaseError, Feed, StoryCounts};
use crate::util::{
    is_feedburner_terminus, strip_control_chars, strip_tags, truncate_chars, truncate_to_width,
};

/// Default cap on entries processed per document
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Longest etag stored
const MAX_ETAG_CHARS: usize = 255;

/// Feed titles in log lines are cut to this many columns
const LOG_TITLE_WIDTH: usize = 30;

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The feed disappeared before processing started
    #[error("Feed {0} vanished")]
    FeedVanished(i64),
    #[error(transparent)]
    Database(DatabaseError),
}

impl From<DatabaseError> for ProcessError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::FeedNotFound(id) => ProcessError::FeedVanished(id),
            other => ProcessError::Database(other),
        }
    }
}

/// Result of processing one document
#[derive(Debug, Clone)]
pub struct Processed {
    pub outcome: Outcome,
    pub counts: StoryCounts,
    /// The feed as stored afterwards; its id may differ from the one asked for
    pub feed: Feed,
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_entries: usize,
    /// Emit per-entry debug events
    pub verbose: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            verbose: false,
        }
    }
}

#[derive(Clone)]
pub struct Processor {
    db: Database,
    repair: Arc<dyn AddressRepair>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(db: Database, repair: Arc<dyn AddressRepair>, config: ProcessorConfig) -> Self {
        Self { db, repair, config }
    }

    /// Classify `document` and apply it to the feed.
    ///
    /// # Errors
    ///
    /// [`ProcessError::FeedVanished`] if the feed no longer resolves; any
    /// other storage failure as [`ProcessError::Database`].
    pub async fn process(
        &self,
        feed_id: i64,
        document: ParsedDocument,
    ) -> Result<Processed, ProcessError> {
        let mut feed = self.db.get_feed_by_id(feed_id).await?;
        if feed.id != feed_id {
            tracing::info!(
                from = feed_id,
                to = feed.id,
                "Feed was merged, continuing under surviving id"
            );
        }

        match document.status {
            Some(304) => {
                let feed = self.db.save_feed(&feed).await?;
                self.db.save_feed_history(feed.id, 304, "Not modified", None).await?;
                tracing::debug!(feed_id = feed.id, title = %log_title(&feed), "Not modified");
                return Ok(Processed {
                    outcome: Outcome::Same,
                    counts: StoryCounts::default(),
                    feed,
                });
            }
            Some(301) => {
                match document.href.as_deref() {
                    Some(href) if !is_feedburner_terminus(href) => {
                        tracing::info!(
                            feed_id = feed.id,
                            from = %feed.address,
                            to = %href,
                            "Feed moved permanently"
                        );
                        feed.address = href.to_owned();
                    }
                    _ => {}
                }
                if !feed.known_good {
                    feed.fetched_once = true;
                    self.db.schedule_immediate_refetch(&mut feed).await?;
                }
                if document.entries.is_empty() {
                    let feed = self.save_or_merge(feed).await?;
                    self.db.save_feed_history(feed.id, 301, "HTTP Redirect", None).await?;
                    return Ok(Processed {
                        outcome: Outcome::HttpError,
                        counts: StoryCounts::default(),
                        feed,
                    });
                }
            }
            Some(status) if status >= 400 => {
                let feed = self.repair_or_record(feed, status, "HTTP Error", None).await?;
                return Ok(Processed {
                    outcome: Outcome::HttpError,
                    counts: StoryCounts::default(),
                    feed,
                });
            }
            _ => {}
        }

        if document.entries.is_empty() {
            let failure = [
                (MalformedKind::NonXmlContentType, 552, "Non-xml feed"),
                (MalformedKind::XmlSyntax, 553, "SAX Exception"),
            ]
            .into_iter()
            .find(|(kind, _, _)| document.is_malformed_as(*kind));

            if let Some((_, code, message)) = failure {
                let detail = document.malformed.as_ref().map(|m| m.message.as_str());
                if self.config.verbose {
                    tracing::debug!(
                        feed_id = feed.id,
                        code = code,
                        detail = ?detail,
                        "Unparseable feed body"
                    );
                }
                let feed = self.repair_or_record(feed, code, message, detail).await?;
                return Ok(Processed {
                    outcome: Outcome::ParseError,
                    counts: StoryCounts::default(),
                    feed,
                });
            }
        }

        self.apply_content(feed, document).await
    }

    /// Content-update path: refresh metadata, then reconcile entries.
    async fn apply_content(
        &self,
        mut feed: Feed,
        document: ParsedDocument,
    ) -> Result<Processed, ProcessError> {
        let last_modified = document.modified_at();
        let ParsedDocument {
            etag,
            feed: meta,
            mut entries,
            ..
        } = document;

        feed.etag = Some(
            etag.as_deref()
                .map(|e| truncate_chars(e, MAX_ETAG_CHARS).to_owned())
                .unwrap_or_default(),
        );
        feed.last_modified = last_modified;

        entries.truncate(self.config.max_entries);

        if let Some(title) = meta.title.as_deref() {
            let cleaned = strip_control_chars(&strip_tags(title)).trim().to_owned();
            if !cleaned.is_empty() {
                feed.title = cleaned;
            }
        }
        feed.link = meta.link.or(meta.id).or(feed.link.take());

        let feed = self.save_or_merge(feed).await?;

        let stories = build_stories(feed.id, &entries, Utc::now(), self.config.verbose);
        let hashes: Vec<String> = stories.iter().map(|s| s.story_hash.clone()).collect();
        let existing = self.db.find_stories_by_hashes(&hashes).await?;
        let counts = self.db.reconcile_stories(feed.id, &stories, &existing).await?;

        self.db.update_feed_statistics(feed.id, counts.new > 0).await?;
        self.db.save_feed_history(feed.id, 200, "OK", None).await?;

        tracing::info!(
            feed_id = feed.id,
            title = %log_title(&feed),
            entries = entries.len(),
            new = counts.new,
            updated = counts.updated,
            same = counts.same,
            error = counts.error,
            "Processed feed"
        );

        let feed = self.db.get_feed_by_id(feed.id).await?;
        Ok(Processed {
            outcome: Outcome::Ok,
            counts,
            feed,
        })
    }

    /// Try to repair a failing feed's address; record the failure when that
    /// does not work out.
    async fn repair_or_record(
        &self,
        mut feed: Feed,
        code: u16,
        message: &str,
        detail: Option<&str>,
    ) -> Result<Feed, ProcessError> {
        let repaired = if feed.known_good {
            None
        } else {
            match self.repair.repair(&feed).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::debug!(feed_id = feed.id, error = %e, "Address repair failed");
                    None
                }
            }
        };

        match repaired {
            Some(address) => {
                feed.address = address;
                let mut feed = self.save_or_merge(feed).await?;
                self.db.schedule_immediate_refetch(&mut feed).await?;
                Ok(feed)
            }
            None => {
                self.db.save_feed_history(feed.id, code, message, detail).await?;
                Ok(self.save_or_merge(feed).await?)
            }
        }
    }

    /// Save the feed; when its new address already belongs to another feed,
    /// fold this feed into that one and continue as the survivor.
    async fn save_or_merge(&self, feed: Feed) -> Result<Feed, DatabaseError> {
        match self.db.save_feed(&feed).await {
            Err(DatabaseError::IntegrityConflict(reason)) => {
                let Some(keep_id) = self.db.find_feed_id_by_address(&feed.address).await? else {
                    return Err(DatabaseError::IntegrityConflict(reason));
                };
                tracing::info!(
                    feed_id = feed.id,
                    survivor = keep_id,
                    address = %feed.address,
                    "Address already subscribed, merging feeds"
                );
                self.db.merge_feeds(keep_id, feed.id).await?;
                self.db.get_feed_by_id(keep_id).await
            }
            other => other,
        }
    }
}

fn log_title(feed: &Feed) -> String {
    truncate_to_width(&feed.title, LOG_TITLE_WIDTH).into_owned()
}
