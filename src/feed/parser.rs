use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED, LOCATION, USER_AGENT,
};
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use super::document::{FeedMeta, Malformed, MalformedKind, ParsedDocument, RawEntry};

/// Default response body cap
pub const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

const MAX_REDIRECTS: usize = 5;

/// Errors raised by a document source call itself (not by the remote content).
#[derive(Debug, Error)]
pub enum SourceError {
    /// The call arguments could not be turned into a request (bad URL, bad header value)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The transport gave a structured failure worth recording verbatim
    #[error("HTTP {status} {reason}")]
    Transport {
        status: u16,
        reason: String,
        body: String,
    },
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// Arguments for one conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    pub address: String,
    pub user_agent: String,
    pub etag: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

impl SourceRequest {
    /// Same request with the cache validators dropped
    pub fn without_conditionals(&self) -> Self {
        Self {
            etag: None,
            modified: None,
            ..self.clone()
        }
    }
}

/// Turns an address into a [`ParsedDocument`].
///
/// Malformed remote content is reported through the document's `malformed`
/// field; `Err` is reserved for calls that could not be made or whose
/// transport failed outright.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn parse(&self, request: &SourceRequest) -> Result<ParsedDocument, SourceError>;
}

/// Fetches over HTTP with `reqwest` and parses with `feed-rs`.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpSource {
    /// Build a source with its own client. Redirects are followed by hand so
    /// permanent moves can be reported to the processor.
    pub fn new(max_body_bytes: usize) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            max_body_bytes,
        })
    }

    fn request_headers(request: &SourceRequest) -> Result<HeaderMap, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&request.user_agent)
                .map_err(|e| SourceError::InvalidRequest(format!("user agent: {e}")))?,
        );
        if let Some(etag) = &request.etag {
            headers.insert(
                IF_NONE_MATCH,
                HeaderValue::from_str(etag)
                    .map_err(|e| SourceError::InvalidRequest(format!("etag: {e}")))?,
            );
        }
        if let Some(modified) = request.modified {
            let http_date = modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            headers.insert(
                IF_MODIFIED_SINCE,
                HeaderValue::from_str(&http_date)
                    .map_err(|e| SourceError::InvalidRequest(format!("modified: {e}")))?,
            );
        }
        Ok(headers)
    }
}

#[async_trait]
impl FeedSource for HttpSource {
    async fn parse(&self, request: &SourceRequest) -> Result<ParsedDocument, SourceError> {
        let mut url = Url::parse(&request.address)
            .map_err(|e| SourceError::InvalidRequest(format!("address: {e}")))?;
        let headers = Self::request_headers(request)?;
        let mut permanent = false;
        let mut hops = 0;

        let response = loop {
            let response = self
                .client
                .get(url.as_str())
                .headers(headers.clone())
                .send()
                .await?;

            let status = response.status();
            if !status.is_redirection() || status == StatusCode::NOT_MODIFIED {
                break response;
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| url.join(loc).ok());
            let Some(next) = location else {
                break response;
            };

            hops += 1;
            if hops > MAX_REDIRECTS {
                return Err(SourceError::Transport {
                    status: status.as_u16(),
                    reason: "Too many redirects".into(),
                    body: url.to_string(),
                });
            }

            permanent |=
                status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::PERMANENT_REDIRECT;
            tracing::debug!(from = %url, to = %next, status = %status, "Following redirect");
            url = next;
        };

        let status = response.status();
        let (etag, modified, content_type) = {
            let headers = response.headers();
            let header = |name: HeaderName| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
            };
            (header(ETAG), header(LAST_MODIFIED), header(CONTENT_TYPE))
        };

        let reported_status = if permanent && status.is_success() {
            StatusCode::MOVED_PERMANENTLY.as_u16()
        } else {
            status.as_u16()
        };

        let mut document = if status.is_success() {
            let bytes = read_limited_bytes(response, self.max_body_bytes).await?;
            parse_feed(&bytes, content_type.as_deref())
        } else {
            ParsedDocument::default()
        };

        document.status = Some(reported_status);
        document.href = Some(url.to_string());
        document.etag = etag;
        document.modified = modified;
        Ok(document)
    }
}

/// Read a response body, failing once it grows past `limit`.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, SourceError> {
    let too_large = || SourceError::Transport {
        status: StatusCode::PAYLOAD_TOO_LARGE.as_u16(),
        reason: "Response too large".into(),
        body: format!("response exceeded {limit} bytes"),
    };

    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(too_large());
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

fn is_xml_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ["xml", "rss", "atom", "rdf"].iter().any(|k| ct.contains(k))
}

/// Parse a response body into a document with no transport fields set.
///
/// Never fails: unparseable bodies come back with no entries and a
/// [`Malformed`] diagnostic whose kind depends on the declared content type.
pub fn parse_feed(bytes: &[u8], content_type: Option<&str>) -> ParsedDocument {
    let feed = match feed_rs::parser::parse(bytes) {
        Ok(feed) => feed,
        Err(e) => {
            let kind = match content_type {
                Some(ct) if !is_xml_content_type(ct) => MalformedKind::NonXmlContentType,
                _ => MalformedKind::XmlSyntax,
            };
            let message = match (kind, content_type) {
                (MalformedKind::NonXmlContentType, Some(ct)) => {
                    format!("{ct} is not an XML media type: {e}")
                }
                _ => e.to_string(),
            };
            return ParsedDocument {
                malformed: Some(Malformed { kind, message }),
                ..Default::default()
            };
        }
    };

    let link = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .map(|l| l.href.clone());
    let meta = FeedMeta {
        title: feed.title.map(|t| t.content),
        link,
        id: Some(feed.id).filter(|id| !id.is_empty()),
    };

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let mut hrefs = entry
                .links
                .iter()
                .filter(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .map(|l| l.href.clone());
            let link = hrefs.next();
            let links = hrefs.collect();

            RawEntry {
                guid: Some(entry.id).filter(|id| !id.trim().is_empty()),
                link,
                links,
                title: entry.title.map(|t| t.content),
                published: entry.published,
                updated: entry.updated,
                summary: entry.summary.map(|s| s.content),
                content: entry.content.and_then(|c| c.body),
                author: entry.authors.first().map(|p| p.name.clone()),
            }
        })
        .collect();

    ParsedDocument {
        feed: meta,
        entries,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example Blog</title>
    <link>https://example.com/</link>
    <item><guid>1</guid><title>First</title><link>https://example.com/1</link></item>
    <item><guid>2</guid><title>Second</title><link>https://example.com/2</link></item>
</channel></rss>"#;

    fn request(address: String) -> SourceRequest {
        SourceRequest {
            address,
            user_agent: "feedpipe-test".into(),
            etag: None,
            modified: None,
        }
    }

    #[test]
    fn test_parse_rss_entries_and_meta() {
        let doc = parse_feed(VALID_RSS.as_bytes(), Some("application/rss+xml"));
        assert!(doc.malformed.is_none());
        assert_eq!(doc.feed.title.as_deref(), Some("Example Blog"));
        assert_eq!(doc.entries.len(), 2);
        assert_eq!(doc.entries[0].guid.as_deref(), Some("1"));
        assert_eq!(doc.entries[0].link.as_deref(), Some("https://example.com/1"));
        assert_eq!(doc.entries[1].title.as_deref(), Some("Second"));
    }

    #[test]
    fn test_parse_html_is_non_xml() {
        let doc = parse_feed(b"<html><body>Hello</body></html>", Some("text/html; charset=utf-8"));
        assert!(doc.entries.is_empty());
        assert!(doc.is_malformed_as(MalformedKind::NonXmlContentType));
    }

    #[test]
    fn test_parse_broken_xml_is_syntax_error() {
        let doc = parse_feed(b"<not valid xml", Some("application/xml"));
        assert!(doc.entries.is_empty());
        assert!(doc.is_malformed_as(MalformedKind::XmlSyntax));
    }

    #[test]
    fn test_invalid_etag_is_invalid_request() {
        let mut req = request("https://example.com/feed".into());
        req.etag = Some("bad\netag".into());
        assert!(matches!(
            HttpSource::request_headers(&req),
            Err(SourceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_address_is_invalid_request() {
        let source = HttpSource::new(MAX_FEED_SIZE).unwrap();
        let result = source.parse(&request("not a url".into())).await;
        assert!(matches!(result, Err(SourceError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_fetch_sends_conditionals_and_reads_validators() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"v1\""))
            .and(header("User-Agent", "feedpipe-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/rss+xml")
                    .insert_header("ETag", "\"v2\"")
                    .insert_header("Last-Modified", "Tue, 14 Nov 2023 22:13:20 GMT"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = HttpSource::new(MAX_FEED_SIZE).unwrap();
        let mut req = request(format!("{}/feed", mock_server.uri()));
        req.etag = Some("\"v1\"".into());
        let doc = source.parse(&req).await.unwrap();

        assert_eq!(doc.status, Some(200));
        assert_eq!(doc.etag.as_deref(), Some("\"v2\""));
        assert_eq!(doc.modified_at().map(|d| d.timestamp()), Some(1_700_000_000));
        assert_eq!(doc.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_not_modified_has_no_entries() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&mock_server)
            .await;

        let source = HttpSource::new(MAX_FEED_SIZE).unwrap();
        let doc = source
            .parse(&request(format!("{}/feed", mock_server.uri())))
            .await
            .unwrap();
        assert_eq!(doc.status, Some(304));
        assert!(doc.entries.is_empty());
        assert!(doc.malformed.is_none());
    }

    #[tokio::test]
    async fn test_permanent_redirect_reports_301_and_final_href() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let source = HttpSource::new(MAX_FEED_SIZE).unwrap();
        let doc = source
            .parse(&request(format!("{}/old", mock_server.uri())))
            .await
            .unwrap();
        assert_eq!(doc.status, Some(301));
        assert_eq!(doc.href, Some(format!("{}/new", mock_server.uri())));
        assert_eq!(doc.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_temporary_redirect_reports_final_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let source = HttpSource::new(MAX_FEED_SIZE).unwrap();
        let doc = source
            .parse(&request(format!("{}/old", mock_server.uri())))
            .await
            .unwrap();
        assert_eq!(doc.status, Some(200));
    }

    #[tokio::test]
    async fn test_error_status_is_a_document_not_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&mock_server)
            .await;

        let source = HttpSource::new(MAX_FEED_SIZE).unwrap();
        let doc = source
            .parse(&request(format!("{}/feed", mock_server.uri())))
            .await
            .unwrap();
        assert_eq!(doc.status, Some(404));
        assert!(doc.entries.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_is_transport_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let source = HttpSource::new(16).unwrap();
        let result = source
            .parse(&request(format!("{}/feed", mock_server.uri())))
            .await;
        assert!(matches!(
            result,
            Err(SourceError::Transport { status: 413, .. })
        ));
    }
}
