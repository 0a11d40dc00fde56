use url::Url;

/// Query parameter appended by [`cache_bust_url`]
const CACHE_BUST_PARAM: &str = "_";

/// Redirect target that feedburner uses for feeds it has stopped serving
const FEEDBURNER_TERMINUS: &str = "feedburner.com/atom.xml";

/// Appends a cache-defeating query parameter so intermediaries serve a fresh copy.
///
/// `token` should change between calls (the fetcher passes the current time in
/// milliseconds). Unparseable addresses get the parameter appended textually so
/// the request still goes out and fails where the transport can report it.
///
/// # Examples
///
/// ```
/// use feedpipe::util::cache_bust_url;
///
/// assert_eq!(cache_bust_url("https://example.com/rss", 42), "https://example.com/rss?_=42");
/// assert_eq!(
///     cache_bust_url("https://example.com/rss?format=atom", 42),
///     "https://example.com/rss?format=atom&_=42"
/// );
/// ```
pub fn cache_bust_url(address: &str, token: u64) -> String {
    match Url::parse(address) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair(CACHE_BUST_PARAM, &token.to_string());
            url.to_string()
        }
        Err(_) => {
            let sep = if address.contains('?') { '&' } else { '?' };
            format!("{address}{sep}{CACHE_BUST_PARAM}={token}")
        }
    }
}

/// Whether a permanent redirect points at feedburner's dead-end atom feed
pub fn is_feedburner_terminus(href: &str) -> bool {
    href.ends_with(FEEDBURNER_TERMINUS)
}

/// Resolves a potentially relative URL against a base URL.
pub fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_owned();
    }

    // Protocol-relative: let the parser normalize it
    if href.starts_with("//") {
        if let Ok(parsed) = Url::parse(&format!("https:{href}")) {
            return parsed.to_string();
        }
    }

    if let Ok(base) = Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_bust_adds_param() {
        assert_eq!(
            cache_bust_url("https://example.com/feed", 7),
            "https://example.com/feed?_=7"
        );
    }

    #[test]
    fn test_cache_bust_keeps_existing_query() {
        assert_eq!(
            cache_bust_url("https://example.com/feed?a=1", 7),
            "https://example.com/feed?a=1&_=7"
        );
    }

    #[test]
    fn test_cache_bust_unparseable_address() {
        assert_eq!(cache_bust_url("not a url", 7), "not a url?_=7");
    }

    #[test]
    fn test_feedburner_terminus() {
        assert!(is_feedburner_terminus("http://www.feedburner.com/atom.xml"));
        assert!(!is_feedburner_terminus("https://feeds.feedburner.com/example"));
    }

    #[test]
    fn test_resolve_relative_url() {
        assert_eq!(
            resolve_url("/feed.xml", "https://example.com/page"),
            "https://example.com/feed.xml"
        );
        assert_eq!(
            resolve_url("feed.xml", "https://example.com/blog/"),
            "https://example.com/blog/feed.xml"
        );
    }

    #[test]
    fn test_resolve_absolute_and_protocol_relative() {
        assert_eq!(
            resolve_url("https://other.com/feed", "https://example.com"),
            "https://other.com/feed"
        );
        assert_eq!(
            resolve_url("//cdn.example.com/feed", "https://example.com"),
            "https://cdn.example.com/feed"
        );
    }
}
