use std::sync::Arc;

use async_trait::async_trait;
use hotload_errors::{Error, ManifestError, NetworkError};
use hotload_events::EventListener;
use hotload_manifest::{with_base_url, LoadedManifest, MANIFEST_MAX_SIZE};
use hotload_net::{HttpClient, CACHE_CONTROL_NO_STORE};

use super::{Fetcher, ModuleRequest};

/// Downloads manifests and modules over the network.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Arc<dyn HttpClient>,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// Download a module, resolving its URL against the manifest's base URL.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be resolved or the download fails.
    pub async fn download_module(
        &self,
        listener: &dyn EventListener,
        request: &ModuleRequest<'_>,
    ) -> Result<Vec<u8>, Error> {
        let url = match request.base_url {
            Some(base_url) => self.client.resolve(base_url, request.url)?,
            None => request.url.to_string(),
        };
        let headers = [(
            CACHE_CONTROL_NO_STORE.0.to_string(),
            CACHE_CONTROL_NO_STORE.1.to_string(),
        )];
        self.download(listener, request.application_name, &url, &headers, None)
            .await
    }

    /// Download and decode the manifest at `url`.
    ///
    /// The returned bytes have `unsigned.baseUrl` set to `url`; the signed
    /// payload is untouched.
    ///
    /// # Errors
    /// Returns an error if the download fails or the manifest is too large or
    /// malformed. A body over [`MANIFEST_MAX_SIZE`] is abandoned mid-transfer
    /// and reported as [`ManifestError::TooLarge`]. Size and decoding failures
    /// are also reported to [`EventListener::manifest_parse_failed`].
    pub async fn fetch_manifest(
        &self,
        listener: &dyn EventListener,
        application_name: &str,
        url: &str,
        fresh_at_epoch_ms: i64,
    ) -> Result<LoadedManifest, Error> {
        let bytes = match self
            .download(listener, application_name, url, &[], Some(MANIFEST_MAX_SIZE))
            .await
        {
            Ok(bytes) => bytes,
            Err(Error::Network(NetworkError::ResponseTooLarge { size, max, .. })) => {
                let err = ManifestError::TooLarge { size, max }.into();
                listener.manifest_parse_failed(application_name, Some(url), &err);
                return Err(err);
            }
            Err(e) => return Err(e),
        };
        decode_network_manifest(bytes, url, fresh_at_epoch_ms)
            .inspect_err(|e| listener.manifest_parse_failed(application_name, Some(url), e))
    }

    async fn download(
        &self,
        listener: &dyn EventListener,
        application_name: &str,
        url: &str,
        headers: &[(String, String)],
        max_bytes: Option<usize>,
    ) -> Result<Vec<u8>, Error> {
        let start = listener.download_start(application_name, url);
        match self.client.download(url, headers, max_bytes).await {
            Ok(bytes) => {
                listener.download_end(application_name, url, start);
                Ok(bytes)
            }
            Err(e) => {
                listener.download_failed(application_name, url, &e, start);
                Err(e)
            }
        }
    }
}

fn decode_network_manifest(
    bytes: Vec<u8>,
    url: &str,
    fresh_at_epoch_ms: i64,
) -> Result<LoadedManifest, Error> {
    if bytes.len() > MANIFEST_MAX_SIZE {
        return Err(ManifestError::TooLarge {
            size: bytes.len(),
            max: MANIFEST_MAX_SIZE,
        }
        .into());
    }
    let json = String::from_utf8(bytes).map_err(|e| ManifestError::ParseError {
        message: format!("manifest is not UTF-8: {e}"),
    })?;
    let rewritten = with_base_url(&json, url)?;
    LoadedManifest::parse(rewritten.into_bytes(), fresh_at_epoch_ms)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        listener: &dyn EventListener,
        request: &ModuleRequest<'_>,
    ) -> Result<Option<Vec<u8>>, Error> {
        self.download_module(listener, request).await.map(Some)
    }
}
