use chrono::Utc;
use sqlx::QueryBuilder;
use std::collections::{HashMap, HashSet};

use super::schema::Database;
use super::types::{DatabaseError, Story, StoryCounts, StoryDbRow};

/// Hashes per `IN (...)` lookup, well under SQLite's bound parameter limit
const HASH_BATCH_SIZE: usize = 500;

impl Database {
    // ========================================================================
    // Story Queries
    // ========================================================================

    /// Load the stored stories whose hash is in `hashes`, keyed by hash
    pub async fn find_stories_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Story>, DatabaseError> {
        let mut found = HashMap::with_capacity(hashes.len());

        for chunk in hashes.chunks(HASH_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "SELECT story_hash, feed_id, guid, permalink, title, author, content, published \
                 FROM stories WHERE story_hash IN (",
            );
            let mut separated = builder.separated(", ");
            for hash in chunk {
                separated.push_bind(hash);
            }
            separated.push_unseparated(")");

            let rows: Vec<StoryDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
            for row in rows {
                let story = row.into_story();
                found.insert(story.story_hash.clone(), story);
            }
        }

        Ok(found)
    }

    /// Stories for a feed, newest first
    pub async fn get_stories_for_feed(&self, feed_id: i64) -> Result<Vec<Story>, DatabaseError> {
        let rows = sqlx::query_as::<_, StoryDbRow>(
            r#"
            SELECT story_hash, feed_id, guid, permalink, title, author, content, published
            FROM stories
            WHERE feed_id = ?
            ORDER BY published DESC, id DESC
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoryDbRow::into_story).collect())
    }

    // ========================================================================
    // Story Mutations
    // ========================================================================

    /// Insert or update a batch of incoming stories against what is stored.
    ///
    /// Each story is classified by its hash:
    /// - absent from `existing` → inserted, counted `new`
    /// - present and different → rewritten, counted `updated`
    /// - present and identical → counted `same`
    ///
    /// A hash seen earlier in the same batch, or an insert that loses a race
    /// with another writer, counts as `error`. Each story's write is atomic on
    /// its own; the batch runs in one transaction only to keep it fast.
    pub async fn reconcile_stories(
        &self,
        feed_id: i64,
        stories: &[Story],
        existing: &HashMap<String, Story>,
    ) -> Result<StoryCounts, DatabaseError> {
        let now = Utc::now().timestamp();
        let mut counts = StoryCounts::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(stories.len());
        let mut tx = self.pool.begin().await?;

        for story in stories {
            if !seen.insert(story.story_hash.as_str()) {
                tracing::debug!(
                    feed_id = feed_id,
                    story_hash = %story.story_hash,
                    "Duplicate story hash within batch"
                );
                counts.error += 1;
                continue;
            }

            match existing.get(&story.story_hash) {
                None => {
                    let inserted = sqlx::query(
                        r#"
                        INSERT INTO stories
                            (story_hash, feed_id, guid, permalink, title, author, content, published, created_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT(story_hash) DO NOTHING
                    "#,
                    )
                    .bind(&story.story_hash)
                    .bind(feed_id)
                    .bind(&story.guid)
                    .bind(&story.permalink)
                    .bind(&story.title)
                    .bind(&story.author)
                    .bind(&story.content)
                    .bind(story.published.timestamp())
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;

                    if inserted.rows_affected() == 0 {
                        tracing::debug!(
                            feed_id = feed_id,
                            story_hash = %story.story_hash,
                            "Story inserted concurrently, skipping"
                        );
                        counts.error += 1;
                    } else {
                        counts.new += 1;
                    }
                }
                Some(stored) if stored.differs_from(story) => {
                    sqlx::query(
                        r#"
                        UPDATE stories SET
                            guid = ?, permalink = ?, title = ?, author = ?, content = ?, published = ?
                        WHERE story_hash = ?
                    "#,
                    )
                    .bind(&story.guid)
                    .bind(&story.permalink)
                    .bind(&story.title)
                    .bind(&story.author)
                    .bind(&story.content)
                    .bind(story.published.timestamp())
                    .bind(&story.story_hash)
                    .execute(&mut *tx)
                    .await?;
                    counts.updated += 1;
                }
                Some(_) => counts.same += 1,
            }
        }

        tx.commit().await?;
        Ok(counts)
    }
}
