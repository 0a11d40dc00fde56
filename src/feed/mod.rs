//! Fetching and processing of individual feeds.
//!
//! - [`parser`] - the document source seam and its HTTP implementation (`reqwest` + `feed-rs`)
//! - [`fetcher`] - one conditional, deadline-bound fetch per feed
//! - [`processor`] - status classification, metadata updates and story reconciliation
//! - [`dedup`] - degenerate-guid repair and story hashing
//! - [`discovery`] - address repair for feeds whose address stopped working
//!
//! # Example
//!
//! ```ignore
//! let fetched = fetcher.fetch(feed_id).await?;
//! if let Some(document) = fetched.document {
//!     let processed = processor.process(feed_id, document).await?;
//!     println!("{}: {} new", processed.outcome, processed.counts.new);
//! }
//! ```

mod dedup;
mod discovery;
mod document;
mod fetcher;
mod outcome;
mod parser;
mod processor;
mod sampling;

pub use dedup::{build_stories, detect_guid_repair, story_hash, GuidRepair};
pub use discovery::{AddressRepair, DiscoveryError, LinkDiscovery, NoRepair};
pub use document::{FeedMeta, Malformed, MalformedKind, ParsedDocument, RawEntry};
pub use fetcher::{
    default_user_agent, plan_request, FetchError, Fetched, Fetcher, FetcherConfig, RequestPlan,
    DEFAULT_FETCH_TIMEOUT, DEFAULT_FORCE_PROBABILITY,
};
pub use outcome::Outcome;
pub use parser::{parse_feed, FeedSource, HttpSource, SourceError, SourceRequest, MAX_FEED_SIZE};
pub use processor::{ProcessError, Processed, Processor, ProcessorConfig, DEFAULT_MAX_ENTRIES};
pub use sampling::{FixedDraw, SeededRandom, ThreadRandom, UniformSource};
