#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Network operations for hotload
//!
//! The loader talks to the network only through [`HttpClient`], so tests and
//! embedders can substitute their own transport. [`NetClient`] is the
//! reqwest-backed implementation with connection pooling and retries.

mod client;

pub use client::{NetClient, NetConfig};

use async_trait::async_trait;
use hotload_errors::{Error, NetworkError};
use url::Url;

/// Header sent with module downloads; module bytes are content addressed
/// and cached by hotload itself.
pub const CACHE_CONTROL_NO_STORE: (&str, &str) = ("Cache-Control", "no-store");

/// Transport used to download manifests and modules.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Download the full body at `url`.
    ///
    /// When `max_bytes` is set, bodies larger than it must fail with
    /// [`NetworkError::ResponseTooLarge`] before they are fully read.
    async fn download(
        &self,
        url: &str,
        request_headers: &[(String, String)],
        max_bytes: Option<usize>,
    ) -> Result<Vec<u8>, Error>;

    /// Resolve `link` against `base_url`. Absolute links are returned as is.
    ///
    /// # Errors
    ///
    /// Returns an error if either URL is malformed.
    fn resolve(&self, base_url: &str, link: &str) -> Result<String, Error> {
        resolve_url(base_url, link)
    }
}

#[async_trait]
impl HttpClient for NetClient {
    async fn download(
        &self,
        url: &str,
        request_headers: &[(String, String)],
        max_bytes: Option<usize>,
    ) -> Result<Vec<u8>, Error> {
        parse_url(url)?;
        self.get_bytes(url, request_headers, max_bytes).await
    }
}

/// Resolve `link` relative to `base_url`.
///
/// # Errors
///
/// Returns an error if `base_url` is not an absolute URL or `link` cannot be
/// joined onto it.
pub fn resolve_url(base_url: &str, link: &str) -> Result<String, Error> {
    let base = parse_url(base_url)?;
    base.join(link)
        .map(String::from)
        .map_err(|e| NetworkError::InvalidUrl(format!("{link}: {e}")).into())
}

/// Parse and validate a URL
///
/// # Errors
///
/// Returns an error if the URL string is malformed or invalid according to RFC 3986.
pub fn parse_url(url: &str) -> Result<Url, Error> {
    Url::parse(url).map_err(|e| NetworkError::InvalidUrl(format!("{url}: {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        assert!(parse_url("https://example.com").is_ok());
        assert!(parse_url("not a url").is_err());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = "https://example.com/apps/red/red.manifest.hotload.json";
        assert_eq!(
            resolve_url(base, "alpha.bin").unwrap(),
            "https://example.com/apps/red/alpha.bin"
        );
        assert_eq!(
            resolve_url(base, "/root.bin").unwrap(),
            "https://example.com/root.bin"
        );
        assert_eq!(
            resolve_url(base, "https://cdn.example.net/beta.bin").unwrap(),
            "https://cdn.example.net/beta.bin"
        );
    }

    #[test]
    fn test_resolve_requires_absolute_base() {
        assert!(resolve_url("relative/base", "alpha.bin").is_err());
    }
}
