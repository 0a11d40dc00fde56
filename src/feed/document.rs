use chrono::{DateTime, Utc};
use std::fmt;

/// Why the document source could not make sense of the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    /// The server answered with something that is not XML (an HTML page, JSON, ...)
    NonXmlContentType,
    /// The body looked like XML but did not parse as RSS/Atom
    XmlSyntax,
}

/// Diagnostic attached to a document whose body was not clean.
///
/// A malformed document may still carry entries; the processor only treats
/// the diagnostic as fatal when there are none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed {
    pub kind: MalformedKind,
    pub message: String,
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Feed-level fields from the document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMeta {
    pub title: Option<String>,
    pub link: Option<String>,
    pub id: Option<String>,
}

/// One item as delivered by the source, before identifier repair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    /// Declared identifier; may be absent or shared with other entries
    pub guid: Option<String>,
    pub link: Option<String>,
    /// Alternate links, in document order
    pub links: Vec<String>,
    pub title: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
}

impl RawEntry {
    /// The entry's permalink: its link, else its first alternate link, else its guid
    pub fn permalink(&self) -> Option<&str> {
        self.link
            .as_deref()
            .filter(|l| !l.is_empty())
            .or_else(|| self.links.first().map(String::as_str))
            .or(self.guid.as_deref())
    }
}

/// Result of one fetch-and-parse, consumed once by the processor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    /// Transport status. Absent when the source never got an HTTP answer
    pub status: Option<u16>,
    /// Final address after redirects
    pub href: Option<String>,
    pub etag: Option<String>,
    /// Raw `Last-Modified` header value
    pub modified: Option<String>,
    pub malformed: Option<Malformed>,
    pub feed: FeedMeta,
    /// Entries newest-first as delivered
    pub entries: Vec<RawEntry>,
}

impl ParsedDocument {
    /// Whether the body was flagged with the given kind of malformation
    pub fn is_malformed_as(&self, kind: MalformedKind) -> bool {
        self.malformed.as_ref().is_some_and(|m| m.kind == kind)
    }

    /// `modified` parsed as an HTTP date, `None` when missing or unparseable
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.modified.as_deref()?.trim();
        DateTime::parse_from_rfc2822(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
