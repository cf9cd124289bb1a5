//! Sources of module bytes, tried in order

mod caching;
mod embedded;
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use hotload_errors::Error;
use hotload_events::EventListener;
use hotload_hash::Hash;
use tokio::sync::Semaphore;

pub use caching::CachingFetcher;
pub use embedded::EmbeddedFetcher;
pub use http::HttpFetcher;

/// One module of one application, as named by its manifest.
#[derive(Debug, Clone, Copy)]
pub struct ModuleRequest<'a> {
    pub application_name: &'a str,
    pub id: &'a str,
    pub sha256: &'a Hash,
    /// The manifest's `unsigned.baseUrl`, used to resolve relative `url`s.
    pub base_url: Option<&'a str>,
    pub url: &'a str,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the module's bytes.
    ///
    /// `Ok(None)` means this source does not have the module and the next
    /// one should be asked. Content is not verified here.
    async fn fetch(
        &self,
        listener: &dyn EventListener,
        request: &ModuleRequest<'_>,
    ) -> Result<Option<Vec<u8>>, Error>;
}

/// Ask each fetcher in turn while holding a download permit.
///
/// The first fetcher returning bytes wins. If none does, the first error
/// seen is returned, or `Ok(None)` if every fetcher simply had nothing.
pub(crate) async fn fetch_first(
    fetchers: &[Arc<dyn Fetcher>],
    semaphore: &Semaphore,
    listener: &dyn EventListener,
    request: &ModuleRequest<'_>,
) -> Result<Option<Vec<u8>>, Error> {
    let _permit = semaphore.acquire().await.map_err(|_| Error::Cancelled)?;

    let mut first_error = None;
    for fetcher in fetchers {
        match fetcher.fetch(listener, request).await {
            Ok(Some(bytes)) => return Ok(Some(bytes)),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(module_id = request.id, error = %e, "fetcher failed, trying next");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}
