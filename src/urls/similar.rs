use url::Url;

/// Compares two URLs after a lossy normalization: scheme and leading `www.`
/// stripped, trailing slash and fragment dropped, query pairs sorted.
///
/// For deduplication only - two "similar" URLs may still be served by
/// different origins, so this must never feed a security decision.
///
/// ```
/// use feedrake::urls::is_similar_url;
///
/// assert!(is_similar_url("http://www.example.com/feed/", "https://example.com/feed"));
/// assert!(is_similar_url("https://example.com/f?b=2&a=1", "https://example.com/f?a=1&b=2"));
/// assert!(!is_similar_url("https://example.com/feed", "https://example.com/other"));
/// ```
pub fn is_similar_url(a: &str, b: &str) -> bool {
    match (similarity_key(a), similarity_key(b)) {
        (Some(ka), Some(kb)) => ka == kb,
        // Unparseable input falls back to exact equality; still total.
        _ => a == b,
    }
}

fn similarity_key(url: &str) -> Option<String> {
    let trimmed = url.trim();
    let candidate = if let Some(rest) = trimmed.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        trimmed.to_owned()
    };
    let parsed = Url::parse(&candidate).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let path = parsed.path().trim_end_matches('/');

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    let query = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();
    Some(format!("{host}{port}{path}?{query}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_and_www_ignored() {
        assert!(is_similar_url(
            "http://www.example.com/feed",
            "https://example.com/feed"
        ));
        assert!(is_similar_url("//example.com/feed", "https://example.com/feed"));
    }

    #[test]
    fn trailing_slash_and_fragment_ignored() {
        assert!(is_similar_url(
            "https://example.com/feed/",
            "https://example.com/feed"
        ));
        assert!(is_similar_url(
            "https://example.com/feed#latest",
            "https://example.com/feed"
        ));
    }

    #[test]
    fn query_order_ignored() {
        assert!(is_similar_url(
            "https://example.com/f?b=2&a=1",
            "https://example.com/f?a=1&b=2"
        ));
    }

    #[test]
    fn different_resources_differ() {
        assert!(!is_similar_url(
            "https://example.com/feed",
            "https://example.com/atom"
        ));
        assert!(!is_similar_url(
            "https://example.com/f?a=1",
            "https://example.com/f?a=2"
        ));
        assert!(!is_similar_url(
            "https://cdn.example.com/feed",
            "https://example.com/feed"
        ));
        assert!(!is_similar_url(
            "https://example.com:8080/feed",
            "https://example.com/feed"
        ));
    }

    #[test]
    fn garbage_falls_back_to_exact_equality() {
        assert!(is_similar_url("not a url", "not a url"));
        assert!(!is_similar_url("not a url", "also not a url"));
        assert!(!is_similar_url("", "https://example.com"));
    }
}
