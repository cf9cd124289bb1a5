use std::sync::Arc;

use async_trait::async_trait;
use hotload_cache::ContentCache;
use hotload_errors::Error;
use hotload_events::EventListener;
use hotload_manifest::LoadedManifest;

use super::{Fetcher, HttpFetcher, ModuleRequest};

/// Serves modules from the [`ContentCache`], downloading and storing misses.
///
/// Also owns the manifest side of the cache: reading the pinned manifest
/// and moving pins when a load succeeds or fails.
#[derive(Clone)]
pub struct CachingFetcher {
    cache: Arc<ContentCache>,
    delegate: HttpFetcher,
}

impl CachingFetcher {
    #[must_use]
    pub fn new(cache: Arc<ContentCache>, delegate: HttpFetcher) -> Self {
        Self { cache, delegate }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// # Errors
    /// Returns an error if the cache index cannot be queried.
    pub async fn load_pinned_manifest(&self, application_name: &str) -> Result<Option<LoadedManifest>, Error> {
        self.cache.get_pinned_manifest(application_name).await
    }

    /// Make `loaded` the application's only pinned manifest.
    ///
    /// # Errors
    /// Returns an error if the pin transaction fails.
    pub async fn pin(&self, application_name: &str, loaded: &LoadedManifest) -> Result<(), Error> {
        self.cache.pin_manifest(application_name, loaded).await?;
        self.cache
            .update_manifest_fresh_at(application_name, loaded)
            .await
    }

    /// Drop pins taken for `loaded`, falling back to the previous manifest.
    ///
    /// # Errors
    /// Returns an error if the pin transaction fails.
    pub async fn unpin(&self, application_name: &str, loaded: &LoadedManifest) -> Result<(), Error> {
        self.cache.unpin_manifest(application_name, loaded).await
    }

    /// # Errors
    /// Returns an error if the index cannot be updated.
    pub async fn update_fresh_at(&self, application_name: &str, loaded: &LoadedManifest) -> Result<(), Error> {
        self.cache
            .update_manifest_fresh_at(application_name, loaded)
            .await
    }
}

#[async_trait]
impl Fetcher for CachingFetcher {
    async fn fetch(
        &self,
        listener: &dyn EventListener,
        request: &ModuleRequest<'_>,
    ) -> Result<Option<Vec<u8>>, Error> {
        self.cache
            .get_or_put(request.application_name, request.sha256, || {
                self.delegate.download_module(listener, request)
            })
            .await
            .map(Some)
    }
}
