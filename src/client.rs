//! Explicitly constructed HTTP transport shared by every pipeline.
//!
//! The connection pool and DNS cache live in one [`Fetcher`] built at startup
//! and passed by reference - never a hidden singleton - so tests can isolate
//! their own instance with its own policy.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::Context;
use reqwest::redirect;
use tokio::sync::Semaphore;

use crate::fetch::error::{RedirectLimit, UnsafeRedirect};
use crate::urls::is_safe_public_parsed;

/// Construction-time configuration for [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// TCP/TLS connect budget per attempt.
    pub connect_timeout: Duration,
    /// Whole-request budget per attempt (headers and body). Expiry counts as
    /// a retryable network error.
    pub request_timeout: Duration,
    /// Process-wide ceiling on concurrent in-flight requests - the primary
    /// backpressure mechanism.
    pub max_concurrent_requests: usize,
    /// Redirect hop limit enforced by the redirect policy.
    pub max_redirects: usize,
    /// User-Agent rotation list; the engine advances through it after each
    /// 403 response.
    pub user_agents: Vec<String>,
    /// Disables the loopback block. Exclusively for isolated test
    /// environments running mock servers; must never be set elsewhere. All
    /// other blocked ranges stay enforced, redirect hops included.
    pub allow_loopback: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(20),
            max_concurrent_requests: 100,
            max_redirects: 10,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| (*ua).to_owned()).collect(),
            allow_loopback: false,
        }
    }
}

const DEFAULT_USER_AGENTS: &[&str] = &[
    concat!("feedrake/", env!("CARGO_PKG_VERSION")),
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:126.0) Gecko/20100101 Firefox/126.0",
];

/// The shared fetch transport: pooled keep-alive client with a TTL-respecting
/// DNS cache, an IPv4-pinned sibling for "network unreachable" fallback, and
/// the process-wide concurrency gate.
pub struct Fetcher {
    pub(crate) client: reqwest::Client,
    pub(crate) ipv4_client: reqwest::Client,
    pub(crate) gate: Semaphore,
    pub(crate) config: FetcherConfig,
}

impl Fetcher {
    /// Builds the shared clients. Expected to be called once at startup; the
    /// result is cheap to share by reference (or `Arc`) across tasks.
    pub fn new(config: FetcherConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.user_agents.is_empty(),
            "user agent rotation list must not be empty"
        );

        let client = base_builder(&config)
            .build()
            .context("building pooled HTTP client")?;

        // Pinning the local address to 0.0.0.0 restricts connections (and
        // usable DNS answers) to IPv4, the fallback for hosts with broken
        // IPv6 routes.
        let ipv4_client = base_builder(&config)
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .build()
            .context("building IPv4-only HTTP client")?;

        Ok(Self {
            client,
            ipv4_client,
            gate: Semaphore::new(config.max_concurrent_requests),
            config,
        })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }
}

fn base_builder(config: &FetcherConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .redirect(redirect_policy(config.allow_loopback, config.max_redirects))
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .hickory_dns(true)
}

/// Every redirect hop re-runs the full safety gate against its resolved
/// target before being followed - the primary anti-SSRF-via-redirect control.
/// Rejections travel through reqwest's error chain as typed markers.
fn redirect_policy(allow_loopback: bool, max_redirects: usize) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            return attempt.error(RedirectLimit);
        }
        if !is_safe_public_parsed(attempt.url(), allow_loopback) {
            let url = attempt.url().to_string();
            tracing::warn!(url = %url, "redirect hop rejected by safety gate");
            return attempt.error(UnsafeRedirect(url));
        }
        attempt.follow()
    })
}
