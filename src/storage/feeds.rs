use chrono::Utc;

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedDbRow, FeedHistoryEntry};
use crate::feed::story_hash;

/// Number of history entries retained per feed
const MAX_HISTORY_PER_FEED: i64 = 25;

/// Seconds in the trailing window used for `stories_last_month`
const MONTH_SECS: i64 = 30 * 24 * 60 * 60;

const FEED_COLUMNS: &str = "f.id, f.title, f.address, f.link, f.etag, f.last_modified, \
     f.fetched_once, f.known_good, f.last_load_time, f.next_scheduled_update, \
     f.story_count, f.stories_last_month, f.last_story_date";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed by address, returning its id.
    ///
    /// Re-inserting an existing address keeps the row and updates the title.
    pub async fn insert_feed(&self, address: &str, title: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO feeds (address, title) VALUES (?, ?)
             ON CONFLICT(address) DO UPDATE SET title = excluded.title
             RETURNING id",
        )
        .bind(address)
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.0)
    }

    /// All feed ids, in id order
    pub async fn get_all_feed_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Id of the feed stored at `address`, if any
    pub async fn find_feed_id_by_address(
        &self,
        address: &str,
    ) -> Result<Option<i64>, DatabaseError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }

    /// Load a feed by id.
    ///
    /// An id that was merged into another feed resolves to the surviving
    /// feed, so callers must compare the returned `id` with the one they asked
    /// for.
    ///
    /// # Errors
    ///
    /// `DatabaseError::FeedNotFound` when neither the feed nor a merge record exists.
    pub async fn get_feed_by_id(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
        let direct = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f WHERE f.id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = direct {
            return Ok(row.into_feed());
        }

        let merged = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM duplicate_feeds d
             JOIN feeds f ON f.id = d.feed_id
             WHERE d.duplicate_id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        merged
            .map(FeedDbRow::into_feed)
            .ok_or(DatabaseError::FeedNotFound(feed_id))
    }

    /// Persist the feed's fetch metadata and return the stored row.
    ///
    /// Statistics columns are left alone (see [`Feed`]).
    ///
    /// # Errors
    ///
    /// `DatabaseError::IntegrityConflict` when the address already belongs to
    /// another feed; `DatabaseError::FeedNotFound` if the row vanished.
    pub async fn save_feed(&self, feed: &Feed) -> Result<Feed, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE feeds SET
                title = ?, address = ?, link = ?, etag = ?, last_modified = ?,
                fetched_once = ?, known_good = ?, last_load_time = ?,
                next_scheduled_update = ?
            WHERE id = ?
        "#,
        )
        .bind(&feed.title)
        .bind(&feed.address)
        .bind(&feed.link)
        .bind(&feed.etag)
        .bind(feed.last_modified.map(|dt| dt.timestamp()))
        .bind(feed.fetched_once)
        .bind(feed.known_good)
        .bind(feed.last_load_time)
        .bind(feed.next_scheduled_update)
        .bind(feed.id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::FeedNotFound(feed.id));
        }

        self.get_feed_by_id(feed.id).await
    }

    /// Ask the scheduler to pick this feed up again as soon as possible
    pub async fn schedule_immediate_refetch(&self, feed: &mut Feed) -> Result<(), DatabaseError> {
        let now = Utc::now().timestamp();
        sqlx::query("UPDATE feeds SET next_scheduled_update = ? WHERE id = ?")
            .bind(now)
            .bind(feed.id)
            .execute(&self.pool)
            .await?;
        feed.next_scheduled_update = Some(now);
        Ok(())
    }

    /// Remove a feed and everything hanging off it
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fold `duplicate_id` into `keep_id`: stories and history move over, the
    /// duplicate row is deleted and its id keeps resolving to `keep_id`.
    ///
    /// Moved stories are re-keyed under the survivor so its next fetch finds
    /// them. A story the survivor already holds under the same guid wins and
    /// the duplicate's copy is dropped.
    pub async fn merge_feeds(&self, keep_id: i64, duplicate_id: i64) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let moved: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, guid FROM stories WHERE feed_id = ?")
                .bind(duplicate_id)
                .fetch_all(&mut *tx)
                .await?;
        for (story_id, guid) in &moved {
            sqlx::query("UPDATE OR IGNORE stories SET feed_id = ?, story_hash = ? WHERE id = ?")
                .bind(keep_id)
                .bind(story_hash(keep_id, guid))
                .bind(story_id)
                .execute(&mut *tx)
                .await?;
        }
        // Whatever is left collided with a survivor story
        sqlx::query("DELETE FROM stories WHERE feed_id = ?")
            .bind(duplicate_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE feed_history SET feed_id = ? WHERE feed_id = ?")
            .bind(keep_id)
            .bind(duplicate_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE duplicate_feeds SET feed_id = ? WHERE feed_id = ?")
            .bind(keep_id)
            .bind(duplicate_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(duplicate_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT OR REPLACE INTO duplicate_feeds (duplicate_id, feed_id) VALUES (?, ?)")
            .bind(duplicate_id)
            .bind(keep_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Append a fetch result to the feed's history, keeping the newest 25.
    pub async fn save_feed_history(
        &self,
        feed_id: i64,
        status_code: u16,
        message: &str,
        detail: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO feed_history (feed_id, status_code, message, detail, fetched_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(feed_id)
        .bind(i64::from(status_code))
        .bind(message)
        .bind(detail)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM feed_history WHERE feed_id = ? AND id NOT IN (
                SELECT id FROM feed_history WHERE feed_id = ? ORDER BY id DESC LIMIT ?
             )",
        )
        .bind(feed_id)
        .bind(feed_id)
        .bind(MAX_HISTORY_PER_FEED)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// History entries for a feed, newest first
    pub async fn feed_history(&self, feed_id: i64) -> Result<Vec<FeedHistoryEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedHistoryEntry>(
            "SELECT feed_id, status_code, message, detail, fetched_at
             FROM feed_history WHERE feed_id = ? ORDER BY id DESC",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Recompute the feed's story statistics.
    ///
    /// `full` rebuilds every column; otherwise only the trailing-month count
    /// is refreshed.
    pub async fn update_feed_statistics(
        &self,
        feed_id: i64,
        full: bool,
    ) -> Result<(), DatabaseError> {
        let month_ago = Utc::now().timestamp() - MONTH_SECS;

        if full {
            sqlx::query(
                r#"
                UPDATE feeds SET
                    story_count = (SELECT COUNT(*) FROM stories WHERE feed_id = ?1),
                    stories_last_month = (
                        SELECT COUNT(*) FROM stories WHERE feed_id = ?1 AND published >= ?2
                    ),
                    last_story_date = (SELECT MAX(published) FROM stories WHERE feed_id = ?1)
                WHERE id = ?1
            "#,
            )
            .bind(feed_id)
            .bind(month_ago)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE feeds SET stories_last_month = (
                    SELECT COUNT(*) FROM stories WHERE feed_id = ?1 AND published >= ?2
                )
                WHERE id = ?1
            "#,
            )
            .bind(feed_id)
            .bind(month_ago)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }
}
