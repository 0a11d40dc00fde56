//! Small helpers shared by the fetch pipeline.
//!
//! - **Text**: log-friendly truncation, control-character and tag stripping
//! - **URLs**: cache busting and redirect-terminus checks

mod text;
mod feed_url;

pub use self::text::{strip_control_chars, strip_tags, truncate_chars, truncate_to_width};
pub use self::feed_url::{cache_bust_url, is_feedburner_terminus, resolve_url};
