use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The feed id no longer resolves, directly or through a merge
    #[error("Feed {0} not found")]
    FeedNotFound(i64),

    /// A uniqueness constraint rejected the write (e.g. two feeds on one address)
    #[error("Integrity conflict: {0}")]
    IntegrityConflict(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, pulling uniqueness violations out of the generic bucket
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return DatabaseError::IntegrityConflict(db_err.message().to_string());
            }
        }
        DatabaseError::Other(err)
    }
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for Feed queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub title: String,
    pub address: String,
    pub link: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<i64>,
    pub fetched_once: bool,
    pub known_good: bool,
    pub last_load_time: i64,
    pub next_scheduled_update: Option<i64>,
    pub story_count: i64,
    pub stories_last_month: i64,
    pub last_story_date: Option<i64>,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            title: self.title,
            address: self.address,
            link: self.link,
            etag: self.etag,
            last_modified: self.last_modified.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            fetched_once: self.fetched_once,
            known_good: self.known_good,
            last_load_time: self.last_load_time,
            next_scheduled_update: self.next_scheduled_update,
            story_count: self.story_count,
            stories_last_month: self.stories_last_month,
            last_story_date: self.last_story_date,
        }
    }
}

/// Internal row type for Story queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StoryDbRow {
    pub story_hash: String,
    pub feed_id: i64,
    pub guid: String,
    pub permalink: Option<String>,
    pub title: String,
    pub author: Option<String>,
    pub content: Option<String>,
    pub published: i64,
}

impl StoryDbRow {
    pub(crate) fn into_story(self) -> Story {
        Story {
            story_hash: self.story_hash,
            feed_id: self.feed_id,
            guid: self.guid,
            permalink: self.permalink,
            title: self.title,
            author: self.author,
            content: self.content,
            published: DateTime::from_timestamp(self.published, 0).unwrap_or_default(),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed metadata as stored.
///
/// `story_count`, `stories_last_month` and `last_story_date` are owned by
/// [`Database::update_feed_statistics`](super::Database::update_feed_statistics);
/// `save_feed` never writes them, so a stale `Feed` cannot clobber them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub address: String,
    pub link: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub fetched_once: bool,
    pub known_good: bool,
    /// Duration of the last fetch attempt, whole seconds
    pub last_load_time: i64,
    pub next_scheduled_update: Option<i64>,
    pub story_count: i64,
    pub stories_last_month: i64,
    pub last_story_date: Option<i64>,
}

/// A persisted entry, keyed by `story_hash`
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub story_hash: String,
    pub feed_id: i64,
    /// Resolved identifier (after degenerate-guid repair)
    pub guid: String,
    pub permalink: Option<String>,
    pub title: String,
    pub author: Option<String>,
    pub content: Option<String>,
    pub published: DateTime<Utc>,
}

impl Story {
    /// Whether the stored copy differs from an incoming one in anything a reader would see
    pub fn differs_from(&self, other: &Story) -> bool {
        self.title != other.title
            || self.permalink != other.permalink
            || self.content != other.content
            || self.author != other.author
    }
}

/// Per-batch reconciliation counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoryCounts {
    pub new: usize,
    pub updated: usize,
    pub same: usize,
    pub error: usize,
}

impl StoryCounts {
    pub fn total(&self) -> usize {
        self.new + self.updated + self.same + self.error
    }

    /// Fold another batch's counts into this one
    pub fn merge(&mut self, other: &StoryCounts) {
        self.new += other.new;
        self.updated += other.updated;
        self.same += other.same;
        self.error += other.error;
    }
}

/// One entry in a feed's fetch history
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FeedHistoryEntry {
    pub feed_id: i64,
    pub status_code: i64,
    pub message: String,
    pub detail: Option<String>,
    pub fetched_at: i64,
}
