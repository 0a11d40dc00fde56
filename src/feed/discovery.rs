use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::storage::Feed;
use crate::util::resolve_url;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DISCOVERY_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Errors that can occur while looking for a feed's corrected address.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The feed has neither a site link nor a usable address to start from
    #[error("no site to search: {0}")]
    NoSite(String),
    /// HTTP request failed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The site answered with a non-success status
    #[error("site returned HTTP {0}")]
    HttpStatus(u16),
    /// Request exceeded the 10-second timeout
    #[error("request timed out")]
    Timeout,
    /// Response body exceeded the 5MB size limit
    #[error("response too large")]
    TooLarge,
}

/// Finds a working address for a feed whose current one is failing.
///
/// `Ok(None)` means nothing better was found; the caller keeps the address it has.
#[async_trait]
pub trait AddressRepair: Send + Sync {
    async fn repair(&self, feed: &Feed) -> Result<Option<String>, DiscoveryError>;
}

/// Never repairs anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRepair;

#[async_trait]
impl AddressRepair for NoRepair {
    async fn repair(&self, _feed: &Feed) -> Result<Option<String>, DiscoveryError> {
        Ok(None)
    }
}

/// Repairs addresses by reading the feed's website for a
/// `<link rel="alternate">` that points at an RSS/Atom document.
#[derive(Clone)]
pub struct LinkDiscovery {
    client: reqwest::Client,
}

impl LinkDiscovery {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, DiscoveryError> {
        let response = tokio::time::timeout(DISCOVERY_TIMEOUT, self.client.get(url).send())
            .await
            .map_err(|_| DiscoveryError::Timeout)?
            .map_err(DiscoveryError::Network)?;

        if !response.status().is_success() {
            return Err(DiscoveryError::HttpStatus(response.status().as_u16()));
        }

        read_discovery_bytes(response).await
    }
}

#[async_trait]
impl AddressRepair for LinkDiscovery {
    async fn repair(&self, feed: &Feed) -> Result<Option<String>, DiscoveryError> {
        let site = site_url(feed)?;
        let html_bytes = self.get_bytes(&site).await?;
        let html = String::from_utf8_lossy(&html_bytes);

        let Some(candidate) = find_feed_link_in_html(&html, &site) else {
            tracing::debug!(feed_id = feed.id, site = %site, "No alternate feed link on site");
            return Ok(None);
        };

        if candidate == feed.address {
            return Ok(None);
        }

        // Only hand back an address that actually serves a feed
        let feed_bytes = match self.get_bytes(&candidate).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(
                    feed_id = feed.id,
                    candidate = %candidate,
                    error = %e,
                    "Candidate address unreachable"
                );
                return Ok(None);
            }
        };
        if feed_rs::parser::parse(feed_bytes.as_slice()).is_err() {
            tracing::debug!(
                feed_id = feed.id,
                candidate = %candidate,
                "Candidate address is not a feed"
            );
            return Ok(None);
        }

        tracing::info!(
            feed_id = feed.id,
            from = %feed.address,
            to = %candidate,
            "Repaired feed address"
        );
        Ok(Some(candidate))
    }
}

/// The page to search: the feed's site link, else the origin of its address.
fn site_url(feed: &Feed) -> Result<String, DiscoveryError> {
    if let Some(link) = feed.link.as_deref().filter(|l| l.starts_with("http")) {
        return Ok(link.to_owned());
    }

    let address = Url::parse(&feed.address).map_err(|e| DiscoveryError::NoSite(e.to_string()))?;
    let origin = address.origin();
    if !origin.is_tuple() {
        return Err(DiscoveryError::NoSite(feed.address.clone()));
    }
    Ok(format!("{}/", origin.ascii_serialization()))
}

/// Reads response body with a 5MB size limit using stream-based reading.
async fn read_discovery_bytes(response: reqwest::Response) -> Result<Vec<u8>, DiscoveryError> {
    if let Some(len) = response.content_length() {
        if len as usize > MAX_DISCOVERY_SIZE {
            return Err(DiscoveryError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(DiscoveryError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > MAX_DISCOVERY_SIZE {
            return Err(DiscoveryError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// Scans HTML for `<link>` tags with `rel="alternate"` and RSS/Atom type attributes.
///
/// Plain string scanning, no HTML parser. Attribute order does not matter and
/// relative hrefs are resolved against `base_url`. Returns the first match.
fn find_feed_link_in_html(html: &str, base_url: &str) -> Option<String> {
    // ASCII folding keeps byte offsets valid for slicing `html`
    let html_lower = html.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(link_start) = html_lower[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let remaining = &html_lower[abs_start..];

        let Some(tag_end) = remaining.find('>') else {
            break;
        };
        let tag = &remaining[..=tag_end];

        if contains_attr(tag, "rel", "alternate") && is_feed_type(tag) {
            // href comes from the original text to keep its case
            let original_tag = html.get(abs_start..=abs_start + tag_end)?;
            if let Some(href) = extract_attr_value(original_tag, "href") {
                return Some(resolve_url(href, base_url));
            }
        }

        search_from = abs_start + tag_end + 1;
    }

    None
}

fn contains_attr(tag: &str, attr_name: &str, attr_value: &str) -> bool {
    let pattern_double = format!("{attr_name}=\"{attr_value}\"");
    let pattern_single = format!("{attr_name}='{attr_value}'");
    tag.contains(&pattern_double) || tag.contains(&pattern_single)
}

fn is_feed_type(tag: &str) -> bool {
    tag.contains("application/rss+xml") || tag.contains("application/atom+xml")
}

/// Extracts a quoted attribute value from a tag (case-preserving).
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_ascii_lowercase();
    let attr_prefix = format!("{attr_name}=");

    let attr_start = tag_lower.find(&attr_prefix)?;
    let rest = tag.get(attr_start + attr_prefix.len()..)?;
    let quote = *rest.as_bytes().first()?;

    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let inner = &rest[1..];
    let end = inner.find(quote as char)?;
    Some(&inner[..end])
}
