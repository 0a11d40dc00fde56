//! Polling feed-ingestion pipeline.
//!
//! A [`dispatch::Dispatcher`] drives a pool of workers; each worker fetches
//! feeds conditionally ([`feed::Fetcher`]), classifies and stores what came
//! back ([`feed::Processor`]) and records bookkeeping in SQLite
//! ([`storage::Database`]).

pub mod config;
pub mod dispatch;
pub mod feed;
pub mod storage;
pub mod util;
