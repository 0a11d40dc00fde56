mod feeds;
mod schema;
mod stories;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, Feed, FeedHistoryEntry, Story, StoryCounts};
