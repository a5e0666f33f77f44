//! URL safety checks and canonicalization.
//!
//! Everything in this module sits on the untrusted-input hot path: URLs arrive
//! from user submissions, feed self-links, and scraped documents. All functions
//! are total - malformed input yields `false` or `None`, never a panic or an
//! error surfaced to the remote party.
//!
//! The safety check ([`is_safe_public_url`]) is the crate's SSRF policy. It is
//! re-run on every redirect hop by the fetch engine; redirects are the primary
//! SSRF vector.

mod prepare;
mod safety;
mod similar;

pub use prepare::{is_absolute_url, prepare_url, resolve_feed_scheme, PreparePolicy};
pub use safety::{is_safe_public_url, is_safe_public_url_with};
pub use similar::is_similar_url;

pub(crate) use safety::is_safe_public_parsed;
