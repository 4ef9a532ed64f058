//! Frame URL normalization and lenient matching
//!
//! Frame URLs drift by a trailing slash, a hash or a query suffix depending on
//! when they are read, so comparisons use a prefix relation in both directions
//! instead of strict equality.

use ::url::Url;

/// Canonicalize a frame URL.
///
/// Empty or absent input yields `None`. Strings that parse as absolute URLs are
/// returned in their serialized (`href`) form; anything else is passed through
/// unchanged.
pub fn normalize(value: Option<&str>) -> Option<String> {
    let value = value.filter(|v| !v.is_empty())?;
    match Url::parse(value) {
        Ok(parsed) => Some(parsed.to_string()),
        Err(_) => Some(value.to_string()),
    }
}

/// Check whether `candidate` is close enough to `expected`.
///
/// `None` for `expected` is a wildcard. Otherwise the strings must be equal or
/// one must be a prefix of the other.
pub fn roughly_match(expected: Option<&str>, candidate: Option<&str>) -> bool {
    let Some(expected) = expected.filter(|e| !e.is_empty()) else {
        return true;
    };
    let Some(candidate) = candidate.filter(|c| !c.is_empty()) else {
        return false;
    };
    candidate == expected || candidate.starts_with(expected) || expected.starts_with(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(None), None);
        assert_eq!(normalize(Some("")), None);
    }

    #[test]
    fn test_normalize_valid() {
        assert_eq!(
            normalize(Some("http://example.com")).as_deref(),
            Some("http://example.com/")
        );
        assert_eq!(
            normalize(Some("http://example.com/path")).as_deref(),
            Some("http://example.com/path")
        );
        assert_eq!(
            normalize(Some("HTTP://Example.COM:80/a b")).as_deref(),
            Some("http://example.com/a%20b")
        );
    }

    #[test]
    fn test_normalize_passthrough() {
        assert_eq!(normalize(Some("not-a-url")).as_deref(), Some("not-a-url"));
        assert_eq!(normalize(Some("/relative/path")).as_deref(), Some("/relative/path"));
    }

    #[test]
    fn test_normalize_idempotent() {
        for raw in [
            "http://example.com",
            "https://a.test/x/../y?q=1#frag",
            "about:blank",
            "data:text/html,<h1>x</h1>",
            "not-a-url",
        ] {
            let once = normalize(Some(raw));
            let twice = normalize(once.as_deref());
            assert_eq!(once, twice, "normalize not idempotent for {raw}");
        }
    }

    #[test]
    fn test_roughly_match_wildcard() {
        assert!(roughly_match(None, Some("http://example.com")));
        assert!(roughly_match(None, None));
    }

    #[test]
    fn test_roughly_match_missing_candidate() {
        assert!(!roughly_match(Some("http://example.com"), None));
        assert!(!roughly_match(Some("http://example.com"), Some("")));
    }

    #[test]
    fn test_roughly_match_prefix_both_ways() {
        assert!(roughly_match(Some("http://x.com"), Some("http://x.com/path")));
        assert!(roughly_match(Some("http://x.com/path"), Some("http://x.com")));
        assert!(roughly_match(Some("http://x.com/"), Some("http://x.com/")));
    }

    #[test]
    fn test_roughly_match_unrelated() {
        assert!(!roughly_match(Some("http://foo.com"), Some("http://bar.com")));
        // "contains" is not enough
        assert!(!roughly_match(Some("foo.com"), Some("http://foo.com")));
    }
}
