//! Minimal tag scanning over untrusted HTML.
//!
//! String-based, no HTML parser dependency: the inputs are whole documents
//! from arbitrary origins and we only need hrefs out of a handful of tag
//! shapes. Attribute order and quote style vary in the wild, so matching is
//! tolerant of both.

/// Content-Type values (or `type=` attributes) that identify a feed document.
pub(crate) const FEED_MIME_HINTS: &[&str] = &[
    "application/rss+xml",
    "application/atom+xml",
    "application/feed+json",
    "application/json",
];

/// Collects hrefs of `<link rel="alternate">` tags whose type is a feed MIME
/// type, in document order.
pub(crate) fn feed_link_tags(html: &str) -> Vec<String> {
    collect_tags(html, "<link", |tag_lower, tag| {
        if !has_attr_value(tag_lower, "rel", "alternate") {
            return None;
        }
        if !FEED_MIME_HINTS.iter().any(|mime| tag_lower.contains(mime)) {
            return None;
        }
        attr_value(tag, "href").map(str::to_owned)
    })
}

/// Extracts the redirect target of a `<meta http-equiv="refresh">` tag, from
/// the `content="SECONDS;url=TARGET"` form. Returns the raw target; the
/// caller canonicalizes and safety-checks it.
pub(crate) fn meta_refresh_target(html: &str) -> Option<String> {
    collect_tags(html, "<meta", |tag_lower, tag| {
        if !has_attr_value(tag_lower, "http-equiv", "refresh") {
            return None;
        }
        let content = attr_value(tag, "content")?;
        let (_, target) = content.split_once(|c| c == ';' || c == ',')?;
        let target = target.trim();
        let target = target
            .strip_prefix("url=")
            .or_else(|| target.strip_prefix("URL="))
            .unwrap_or(target);
        let target = target.trim().trim_matches('\'').trim_matches('"');
        (!target.is_empty()).then(|| target.to_owned())
    })
    .into_iter()
    .next()
}

/// Collects anchor hrefs that look like feed URLs (path or name mentions
/// rss/atom/feed, or an XML/JSON extension), capped at `limit` candidates.
pub(crate) fn feedish_anchors(html: &str, limit: usize) -> Vec<String> {
    let mut anchors = collect_tags(html, "<a", |_tag_lower, tag| {
        let href = attr_value(tag, "href")?;
        let lower = href.to_ascii_lowercase();
        let feedish = lower.contains("rss")
            || lower.contains("atom")
            || lower.contains("feed")
            || lower.ends_with(".xml");
        (feedish && !lower.starts_with("mailto:")).then(|| href.to_owned())
    });
    anchors.truncate(limit);
    anchors
}

/// Paths worth probing when a page advertises nothing explicit.
pub(crate) const WELL_KNOWN_FEED_PATHS: &[&str] = &[
    "/feed",
    "/feed.xml",
    "/rss",
    "/rss.xml",
    "/atom.xml",
    "/index.xml",
    "/feed.json",
];

/// Scans for tags starting with `opener` (e.g. `"<link"`), handing each
/// complete tag to `extract` with a lowercased copy for matching and the
/// original for case-preserving value extraction.
fn collect_tags<F>(html: &str, opener: &str, extract: F) -> Vec<String>
where
    F: Fn(&str, &str) -> Option<String>,
{
    // ASCII lowercasing keeps byte offsets identical between the two copies.
    let html_lower = html.to_ascii_lowercase();
    let mut found = Vec::new();
    let mut search_from = 0;

    while let Some(rel_start) = html_lower[search_from..].find(opener) {
        let abs_start = search_from + rel_start;
        // The opener must end the tag name: "<a " matches, "<article" not.
        let after = html_lower[abs_start + opener.len()..].chars().next();
        let name_ends = matches!(after, Some(c) if c.is_whitespace() || c == '>' || c == '/');

        let Some(rel_end) = html_lower[abs_start..].find('>') else {
            break;
        };
        let abs_end = abs_start + rel_end;

        if name_ends {
            let tag_lower = &html_lower[abs_start..=abs_end];
            if let Some(original) = html.get(abs_start..=abs_end) {
                if let Some(value) = extract(tag_lower, original) {
                    found.push(value);
                }
            }
        }
        search_from = abs_end + 1;
    }

    found
}

/// True when the lowercased tag carries `name="value"` or `name='value'`.
fn has_attr_value(tag_lower: &str, name: &str, value: &str) -> bool {
    tag_lower.contains(&format!("{name}=\"{value}\""))
        || tag_lower.contains(&format!("{name}='{value}'"))
}

/// Extracts a quoted attribute value, case-preserving.
fn attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_ascii_lowercase();
    let needle = format!("{name}=");
    let start = tag_lower.find(&needle)? + needle.len();
    let rest = tag.get(start..)?;
    let quote = *rest.as_bytes().first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let inner = &rest[1..];
    let end = inner.find(quote as char)?;
    Some(&inner[..end])
}
