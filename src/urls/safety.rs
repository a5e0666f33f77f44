use url::{Host, Url};

/// Checks whether a URL is safe to fetch from a server-side context.
///
/// Security-focused gate to prevent SSRF attacks. Rejects:
/// - Non-HTTP(S) schemes (`file://`, `ftp://`, `gopher://`, ...)
/// - Localhost in any spelling (`localhost`, `*.localhost`, `127.0.0.1`, `::1`)
/// - Private IP ranges (RFC 1918, unique-local IPv6)
/// - Link-local ranges, including the `169.254.169.254` cloud metadata endpoint
/// - Carrier-grade NAT (`100.64.0.0/10`), reserved and benchmarking ranges
/// - IPv4-mapped IPv6 addresses (`::ffff:127.0.0.1` is checked as `127.0.0.1`)
///
/// The verdict is ephemeral by design: address ranges and DNS answers change,
/// so the result must never be persisted. DNS rebinding is a documented gap -
/// the check runs against the URL's host, not every resolved socket address.
///
/// # Examples
///
/// ```
/// use feedrake::urls::is_safe_public_url;
///
/// assert!(is_safe_public_url("https://example.com/feed.xml"));
/// assert!(!is_safe_public_url("http://127.0.0.1/feed"));
/// assert!(!is_safe_public_url("http://169.254.169.254/latest/meta-data/"));
/// assert!(!is_safe_public_url("file:///etc/passwd"));
/// ```
pub fn is_safe_public_url(url: &str) -> bool {
    is_safe_public_url_with(url, false)
}

/// [`is_safe_public_url`] with an opt-in loopback allowance.
///
/// `allow_loopback` exists exclusively for isolated test environments that run
/// mock servers on `127.0.0.1`. It relaxes only the loopback/localhost
/// rejection; private, link-local, and every other blocked range stay blocked
/// so a redirect from a local mock to `169.254.169.254` is still caught.
pub fn is_safe_public_url_with(url: &str, allow_loopback: bool) -> bool {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    is_safe_public_parsed(&parsed, allow_loopback)
}

pub(crate) fn is_safe_public_parsed(url: &Url, allow_loopback: bool) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return false,
    }

    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            let is_localhost = domain == "localhost" || domain.ends_with(".localhost");
            !is_localhost || allow_loopback
        }
        Some(Host::Ipv4(addr)) => ipv4_allowed(addr, allow_loopback),
        Some(Host::Ipv6(addr)) => {
            // Check mapped/compatible addresses against the IPv4 rules, so
            // ::ffff:127.0.0.1 cannot slip past the loopback block.
            if let Some(mapped) = addr.to_ipv4_mapped() {
                return ipv4_allowed(mapped, allow_loopback);
            }
            if addr.is_loopback() {
                return allow_loopback;
            }
            if addr.is_unspecified() {
                return false;
            }
            let segments = addr.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            !(is_unique_local || is_link_local)
        }
        None => false,
    }
}

fn ipv4_allowed(addr: std::net::Ipv4Addr, allow_loopback: bool) -> bool {
    if addr.is_loopback() {
        return allow_loopback;
    }
    !ipv4_blocked(addr)
}

fn ipv4_blocked(addr: std::net::Ipv4Addr) -> bool {
    let octets = addr.octets();
    // Carrier-grade NAT (100.64.0.0/10)
    let is_cgnat = octets[0] == 100 && (octets[1] & 0xc0) == 64;
    // Benchmarking (198.18.0.0/15)
    let is_benchmarking = octets[0] == 198 && (octets[1] & 0xfe) == 18;
    // Reserved (240.0.0.0/4) - is_broadcast covers 255.255.255.255 separately
    let is_reserved = octets[0] & 0xf0 == 240 && !addr.is_broadcast();

    addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
        || addr.is_documentation()
        || is_cgnat
        || is_benchmarking
        || is_reserved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_public_urls_accepted() {
        assert!(is_safe_public_url("https://example.com/feed.xml"));
        assert!(is_safe_public_url("http://news.example.org"));
        assert!(is_safe_public_url("https://example.com:8443/feed"));
    }

    #[test]
    fn non_http_schemes_rejected() {
        assert!(!is_safe_public_url("file:///etc/passwd"));
        assert!(!is_safe_public_url("ftp://example.com"));
        assert!(!is_safe_public_url("gopher://example.com"));
        assert!(!is_safe_public_url("javascript:alert(1)"));
    }

    #[test]
    fn localhost_rejected() {
        assert!(!is_safe_public_url("http://localhost/feed"));
        assert!(!is_safe_public_url("http://LOCALHOST/feed"));
        assert!(!is_safe_public_url("http://app.localhost/feed"));
        assert!(!is_safe_public_url("http://127.0.0.1/feed"));
        assert!(!is_safe_public_url("http://127.8.9.10/feed"));
        assert!(!is_safe_public_url("http://[::1]/feed"));
    }

    #[test]
    fn private_ranges_rejected() {
        assert!(!is_safe_public_url("http://192.168.1.1/feed"));
        assert!(!is_safe_public_url("http://10.0.0.1/feed"));
        assert!(!is_safe_public_url("http://172.16.0.1/feed"));
        assert!(!is_safe_public_url("http://172.31.255.255/feed"));
    }

    #[test]
    fn cloud_metadata_rejected() {
        assert!(!is_safe_public_url("http://169.254.169.254/latest/meta-data/"));
        assert!(!is_safe_public_url("http://169.254.1.1/feed"));
    }

    #[test]
    fn cgnat_and_reserved_rejected() {
        assert!(!is_safe_public_url("http://100.64.0.1/feed"));
        assert!(!is_safe_public_url("http://100.127.255.254/feed"));
        assert!(!is_safe_public_url("http://240.0.0.1/feed"));
        assert!(!is_safe_public_url("http://0.0.0.0/feed"));
        assert!(!is_safe_public_url("http://198.18.0.1/feed"));
    }

    // 100.0.0.1 and 100.128.0.1 fall outside 100.64.0.0/10
    #[test]
    fn cgnat_neighbours_accepted() {
        assert!(is_safe_public_url("http://100.0.0.1/feed"));
        assert!(is_safe_public_url("http://100.128.0.1/feed"));
    }

    #[test]
    fn ipv6_private_ranges_rejected() {
        assert!(!is_safe_public_url("http://[fe80::1]/feed"));
        assert!(!is_safe_public_url("http://[fc00::1]/feed"));
        assert!(!is_safe_public_url("http://[fd12:3456::1]/feed"));
        assert!(!is_safe_public_url("http://[::]/feed"));
    }

    #[test]
    fn ipv4_mapped_ipv6_loopback_rejected() {
        assert!(!is_safe_public_url("http://[::ffff:127.0.0.1]/feed"));
        assert!(!is_safe_public_url("http://[::ffff:192.168.1.1]/feed"));
        assert!(!is_safe_public_url("http://[::ffff:169.254.169.254]/feed"));
    }

    #[test]
    fn ipv6_public_accepted() {
        assert!(is_safe_public_url("http://[2606:4700::6810:85e5]/feed"));
    }

    #[test]
    fn malformed_input_is_false_not_panic() {
        assert!(!is_safe_public_url(""));
        assert!(!is_safe_public_url("not a url"));
        assert!(!is_safe_public_url("http://"));
        assert!(!is_safe_public_url("://missing-scheme"));
    }

    #[test]
    fn loopback_allowance_is_narrow() {
        assert!(is_safe_public_url_with("http://127.0.0.1:8080/feed", true));
        assert!(is_safe_public_url_with("http://localhost:8080/feed", true));
        assert!(is_safe_public_url_with("http://[::1]:8080/feed", true));
        // The allowance must not open any other blocked range.
        assert!(!is_safe_public_url_with("http://169.254.169.254/", true));
        assert!(!is_safe_public_url_with("http://192.168.1.1/feed", true));
        assert!(!is_safe_public_url_with("http://10.0.0.1/feed", true));
    }
}
