use std::borrow::Cow;
use url::Url;

use super::safety::is_safe_public_parsed;

/// Maximum serialized length accepted by [`prepare_url`].
const MAX_URL_LENGTH: usize = 2048;
/// Maximum number of query pairs accepted by [`prepare_url`].
const MAX_QUERY_PARAMS: usize = 50;
/// Percent- and entity-decoding must reach a fixed point within this many
/// rounds.
const MAX_DECODE_ROUNDS: usize = 3;

/// Feed-reader pseudo-schemes rewritten to http(s) by [`resolve_feed_scheme`].
const FEED_SCHEMES: &[&str] = &["feed", "rss", "pcast", "itpc"];

/// Validation applied at the end of [`prepare_url`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreparePolicy {
    /// Structural checks plus the SSRF safety gate.
    #[default]
    Validate,
    /// Structural checks plus the safety gate with loopback allowed
    /// (isolated test environments only).
    ValidateAllowLoopback,
    /// Canonicalize only; no safety gate. For display/dedup paths that never
    /// dereference the URL.
    CanonicalizeOnly,
}

/// Returns true only for absolute http(s) URLs or protocol-relative forms
/// that resolve to them.
///
/// ```
/// use feedrake::urls::is_absolute_url;
///
/// assert!(is_absolute_url("https://example.com/feed"));
/// assert!(is_absolute_url("//example.com/feed"));
/// assert!(!is_absolute_url("/feed.xml"));
/// assert!(!is_absolute_url("ftp://example.com/feed"));
/// ```
pub fn is_absolute_url(url: &str) -> bool {
    let trimmed = url.trim();
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Url::parse(&format!("https://{rest}")).is_ok();
    }
    let lower = trimmed.get(..8).map(str::to_ascii_lowercase).unwrap_or_else(|| trimmed.to_ascii_lowercase());
    (lower.starts_with("http://") || lower.starts_with("https://")) && Url::parse(trimmed).is_ok()
}

/// Rewrites feed-reader pseudo-schemes (`feed:`, `feed://`, `rss:`, `pcast:`,
/// `itpc:`) to plain http(s).
///
/// `feed:` may wrap a full URL (`feed:https://x` unwraps to `https://x`);
/// the slashed forms map straight to `http://`.
///
/// ```
/// use feedrake::urls::resolve_feed_scheme;
///
/// assert_eq!(resolve_feed_scheme("feed://example.com/rss"), "http://example.com/rss");
/// assert_eq!(resolve_feed_scheme("feed:https://example.com/rss"), "https://example.com/rss");
/// assert_eq!(resolve_feed_scheme("https://example.com/rss"), "https://example.com/rss");
/// ```
pub fn resolve_feed_scheme(url: &str) -> Cow<'_, str> {
    let trimmed = url.trim();
    for scheme in FEED_SCHEMES {
        let Some(rest) = strip_scheme_prefix(trimmed, scheme) else {
            continue;
        };
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let lower = rest.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Cow::Owned(rest.to_owned());
        }
        return Cow::Owned(format!("http://{rest}"));
    }
    Cow::Borrowed(url)
}

fn strip_scheme_prefix<'a>(url: &'a str, scheme: &str) -> Option<&'a str> {
    let (head, rest) = url.split_at_checked(scheme.len() + 1)?;
    let mut head_chars = head.chars();
    let matches = head_chars
        .by_ref()
        .zip(scheme.chars())
        .all(|(a, b)| a.eq_ignore_ascii_case(&b))
        && head_chars.next() == Some(':');
    matches.then_some(rest)
}

/// Decodes, normalizes, and optionally validates a candidate URL.
///
/// The sequence: decode HTML entities, rewrite feed pseudo-schemes, resolve
/// protocol-relative forms (assuming https), resolve against `base` when
/// relative, canonicalize through the `url` parser, then apply structural
/// checks (length, query-pair count, percent-encoding fixed point) and the
/// safety gate per `policy`.
///
/// Returns `None` on any failure. Callers drop the candidate silently; this
/// function sits on the untrusted-input hot path and never raises toward the
/// remote party.
///
/// ```
/// use feedrake::urls::{prepare_url, PreparePolicy};
///
/// let url = prepare_url("https://Example.COM/a/../feed.xml", None, PreparePolicy::Validate).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed.xml");
///
/// assert!(prepare_url("http://127.0.0.1/feed", None, PreparePolicy::Validate).is_none());
/// ```
pub fn prepare_url(raw: &str, base: Option<&Url>, policy: PreparePolicy) -> Option<Url> {
    let decoded = decode_entities_converged(raw.trim())?;
    let rewritten = resolve_feed_scheme(&decoded);

    let candidate: Cow<'_, str> = if let Some(rest) = rewritten.strip_prefix("//") {
        Cow::Owned(format!("https://{rest}"))
    } else {
        Cow::Borrowed(rewritten.as_ref())
    };

    let url = match Url::parse(&candidate) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(&candidate).ok()?,
        Err(_) => return None,
    };

    if url.as_str().len() > MAX_URL_LENGTH {
        return None;
    }
    if url.query_pairs().count() > MAX_QUERY_PARAMS {
        return None;
    }
    if !percent_decoding_converges(url.as_str()) {
        return None;
    }

    match policy {
        PreparePolicy::Validate => is_safe_public_parsed(&url, false).then_some(url),
        PreparePolicy::ValidateAllowLoopback => is_safe_public_parsed(&url, true).then_some(url),
        PreparePolicy::CanonicalizeOnly => {
            matches!(url.scheme(), "http" | "https").then_some(url)
        }
    }
}

/// Repeated percent-decoding must reach a fixed point quickly; nested
/// encodings (`%2525...`) are a smuggling primitive against downstream
/// consumers that decode again.
fn percent_decoding_converges(s: &str) -> bool {
    let mut current = s.to_owned();
    for _ in 0..MAX_DECODE_ROUNDS {
        let decoded = percent_decode_once(&current);
        if decoded == current {
            return true;
        }
        current = decoded;
    }
    percent_decode_once(&current) == current
}

fn percent_decode_once(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Entity decoding iterated to a fixed point, so the prepared URL contains
/// no decodable entity and re-preparing it is a no-op. Double-escaped input
/// (`&amp;amp;`) decodes fully; input still changing after the round budget
/// is rejected outright.
fn decode_entities_converged(s: &str) -> Option<Cow<'_, str>> {
    let first = decode_html_entities(s);
    if first == s {
        return Some(first);
    }
    let mut current = first.into_owned();
    for _ in 0..MAX_DECODE_ROUNDS {
        let next = decode_html_entities(&current);
        if next == current {
            return Some(Cow::Owned(current));
        }
        current = next.into_owned();
    }
    None
}

/// Decodes the HTML entities that show up in href attributes copied out of
/// documents (`&amp;`, `&#38;`, `&#x2F;`, ...). Unknown entities pass through
/// untouched. No crate in our stack covers this; the set is deliberately
/// small. One pass; [`decode_entities_converged`] drives it to a fixed point.
fn decode_html_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        let Some(end) = rest.find(';').filter(|&end| end <= 12) else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..end];
        match decode_entity(entity) {
            Some(ch) => {
                out.push(ch);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let digits = entity.strip_prefix('#')?;
            let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                digits.parse::<u32>().ok()?
            };
            char::from_u32(code)
        }
    }
}
