use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hotload_errors::Error;
use hotload_events::EventListener;
use hotload_manifest::LoadedManifest;
use hotload_types::manifest_file_name;

use super::{Fetcher, ModuleRequest};

/// Reads modules and manifests shipped with the host application.
///
/// Layout matches what [`crate::ModuleLoader::download`] writes: modules at
/// `<dir>/<sha256 hex>`, manifests at `<dir>/<application>.manifest.hotload.json`.
#[derive(Debug, Clone)]
pub struct EmbeddedFetcher {
    directory: PathBuf,
}

impl EmbeddedFetcher {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Read the embedded manifest for `application_name`, if one is shipped.
    ///
    /// The manifest's `unsigned.freshAtEpochMs` becomes its freshness
    /// timestamp; a manifest without one is treated as never confirmed.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or decoded.
    pub async fn load_manifest(
        &self,
        listener: &dyn EventListener,
        application_name: &str,
    ) -> Result<Option<LoadedManifest>, Error> {
        let path = self.directory.join(manifest_file_name(application_name));
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        LoadedManifest::parse(bytes, i64::MIN)
            .map(|loaded| LoadedManifest {
                fresh_at_epoch_ms: loaded.manifest.fresh_at_epoch_ms().unwrap_or(i64::MIN),
                ..loaded
            })
            .inspect_err(|e| listener.manifest_parse_failed(application_name, None, e))
            .map(Some)
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, Error> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}

#[async_trait]
impl Fetcher for EmbeddedFetcher {
    async fn fetch(
        &self,
        _listener: &dyn EventListener,
        request: &ModuleRequest<'_>,
    ) -> Result<Option<Vec<u8>>, Error> {
        read_optional(&self.directory.join(request.sha256.to_hex())).await
    }
}
