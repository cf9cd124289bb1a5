//! The application loader

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use hotload_cache::ContentCache;
use hotload_config::LoaderConfig;
use hotload_errors::{ConfigError, Error};
use hotload_events::{NoopEventListener, SharedEventListener};
use hotload_manifest::LoadedManifest;
use hotload_net::HttpClient;
use hotload_signing::ManifestVerifier;
use hotload_types::{manifest_file_name, SharedClock, SystemClock, DEFAULT_CONCURRENT_DOWNLOADS};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::engine::{EngineFactory, EngineHandle};
use crate::fetcher::{CachingFetcher, EmbeddedFetcher, Fetcher, HttpFetcher};
use crate::freshness::FreshnessChecker;
use crate::receiver::{DirectoryReceiver, EngineReceiver, ModuleReceiver};
use crate::result::{LoadResult, LoadedApplication};
use crate::runner::ModuleRun;

/// Loads signed applications into fresh engines, from the cache, the
/// embedded directory or the network.
///
/// Cloning is cheap; clones share the download limit.
#[derive(Clone)]
pub struct ModuleLoader {
    inner: Arc<Inner>,
}

struct DownloadGate {
    limit: usize,
    semaphore: Arc<Semaphore>,
}

struct Inner {
    verifier: ManifestVerifier,
    http: HttpFetcher,
    embedded: Option<EmbeddedFetcher>,
    caching: Option<CachingFetcher>,
    module_fetchers: Vec<Arc<dyn Fetcher>>,
    engine_factory: Arc<dyn EngineFactory>,
    listener: SharedEventListener,
    clock: SharedClock,
    downloads: Mutex<DownloadGate>,
}

pub struct ModuleLoaderBuilder {
    verifier: ManifestVerifier,
    http_client: Arc<dyn HttpClient>,
    engine_factory: Arc<dyn EngineFactory>,
    cache: Option<Arc<ContentCache>>,
    embedded_dir: Option<PathBuf>,
    listener: SharedEventListener,
    clock: SharedClock,
    concurrent_downloads: usize,
}

impl ModuleLoaderBuilder {
    /// Serve modules through this cache and pin loaded manifests in it.
    #[must_use]
    pub fn cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Directory of modules and manifests shipped with the host.
    #[must_use]
    pub fn embedded_dir(mut self, directory: impl Into<PathBuf>) -> Self {
        self.embedded_dir = Some(directory.into());
        self
    }

    #[must_use]
    pub fn event_listener(mut self, listener: SharedEventListener) -> Self {
        self.listener = listener;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn concurrent_downloads(mut self, concurrent_downloads: usize) -> Self {
        self.concurrent_downloads = concurrent_downloads;
        self
    }

    /// Apply the `[loader]` config section.
    #[must_use]
    pub fn loader_config(mut self, config: &LoaderConfig) -> Self {
        self.concurrent_downloads = config.concurrent_downloads;
        if let Some(dir) = &config.embedded_dir {
            self.embedded_dir = Some(dir.clone());
        }
        self
    }

    /// # Errors
    /// Returns an error if `concurrent_downloads` is zero.
    pub fn build(self) -> Result<ModuleLoader, Error> {
        check_concurrent_downloads(self.concurrent_downloads)?;

        let http = HttpFetcher::new(self.http_client);
        let embedded = self.embedded_dir.map(EmbeddedFetcher::new);
        let caching = self
            .cache
            .map(|cache| CachingFetcher::new(cache, http.clone()));

        let mut module_fetchers: Vec<Arc<dyn Fetcher>> = Vec::new();
        if let Some(embedded) = &embedded {
            module_fetchers.push(Arc::new(embedded.clone()));
        }
        match &caching {
            Some(caching) => module_fetchers.push(Arc::new(caching.clone())),
            None => module_fetchers.push(Arc::new(http.clone())),
        }

        Ok(ModuleLoader {
            inner: Arc::new(Inner {
                verifier: self.verifier,
                http,
                embedded,
                caching,
                module_fetchers,
                engine_factory: self.engine_factory,
                listener: self.listener,
                clock: self.clock,
                downloads: Mutex::new(DownloadGate {
                    limit: self.concurrent_downloads,
                    semaphore: Arc::new(Semaphore::new(self.concurrent_downloads)),
                }),
            }),
        })
    }
}

fn check_concurrent_downloads(concurrent_downloads: usize) -> Result<(), Error> {
    if concurrent_downloads == 0 {
        return Err(ConfigError::InvalidValue {
            field: "concurrent_downloads".to_string(),
            value: concurrent_downloads.to_string(),
        }
        .into());
    }
    Ok(())
}

impl ModuleLoader {
    #[must_use]
    pub fn builder(
        verifier: ManifestVerifier,
        http_client: Arc<dyn HttpClient>,
        engine_factory: Arc<dyn EngineFactory>,
    ) -> ModuleLoaderBuilder {
        ModuleLoaderBuilder {
            verifier,
            http_client,
            engine_factory,
            cache: None,
            embedded_dir: None,
            listener: Arc::new(NoopEventListener),
            clock: Arc::new(SystemClock),
            concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
        }
    }

    #[must_use]
    pub fn concurrent_downloads(&self) -> usize {
        self.inner.gate().limit
    }

    /// Change how many manifest and module fetches may run at once.
    ///
    /// Loads already in flight keep the limit they started with.
    ///
    /// # Errors
    /// Returns an error if `concurrent_downloads` is zero.
    pub fn set_concurrent_downloads(&self, concurrent_downloads: usize) -> Result<(), Error> {
        check_concurrent_downloads(concurrent_downloads)?;
        let mut gate = self.inner.gate();
        gate.limit = concurrent_downloads;
        gate.semaphore = Arc::new(Semaphore::new(concurrent_downloads));
        Ok(())
    }

    /// Load `application_name` once.
    ///
    /// A local manifest (pinned in the cache, else embedded) is used when
    /// `freshness` accepts it. Otherwise, or if loading it fails, the
    /// manifest at `manifest_url` is downloaded and loaded.
    pub async fn load_once(
        &self,
        application_name: &str,
        freshness: &dyn FreshnessChecker,
        manifest_url: &str,
    ) -> LoadResult {
        if let Some(LoadResult::Success(app)) = self
            .inner
            .load_from_local(application_name, freshness)
            .await
        {
            return LoadResult::Success(app);
        }

        let mut previous = None;
        self.inner
            .load_from_network(application_name, manifest_url, &mut previous)
            .await
            .unwrap_or_else(|| LoadResult::Failure(Error::internal("network load was skipped")))
    }

    /// Load `application_name` and keep it current.
    ///
    /// Yields one result for the local attempt if a local manifest is fresh
    /// or fails to load, then one per URL from `manifest_urls`. A fresh local
    /// success ends the stream. URLs arriving while the last loaded manifest
    /// is still fresh are ignored, and a downloaded manifest that is the same
    /// release as the last one yields nothing.
    ///
    /// Must be called within a tokio runtime. Dropping the stream stops the
    /// work after the attempt in progress.
    pub fn load<S>(
        &self,
        application_name: impl Into<String>,
        freshness: Arc<dyn FreshnessChecker>,
        manifest_urls: S,
    ) -> impl Stream<Item = LoadResult> + Send + Unpin + 'static
    where
        S: Stream<Item = String> + Send + 'static,
    {
        let inner = self.inner.clone();
        let application_name = application_name.into();
        let (mut results, stream) = mpsc::channel(1);

        tokio::spawn(async move {
            if let Some(result) = inner
                .load_from_local(&application_name, freshness.as_ref())
                .await
            {
                let done = result.is_success();
                if results.send(result).await.is_err() || done {
                    return;
                }
            }

            let mut previous: Option<LoadedManifest> = None;
            let mut manifest_urls = Box::pin(manifest_urls);
            while let Some(url) = manifest_urls.next().await {
                if let Some(previous) = &previous {
                    if freshness.is_fresh(&previous.manifest, previous.fresh_at_epoch_ms, inner.now()) {
                        debug!(application = %application_name, %url, "loaded manifest still fresh");
                        continue;
                    }
                }
                let Some(result) = inner
                    .load_from_network(&application_name, &url, &mut previous)
                    .await
                else {
                    continue;
                };
                if results.send(result).await.is_err() {
                    return;
                }
            }
        });

        stream
    }

    /// Download `application_name` into `directory` for use as an embedded
    /// directory.
    ///
    /// Modules are written as `<directory>/<sha256 hex>`, then the manifest
    /// as `<directory>/<application>.manifest.hotload.json` with its
    /// freshness timestamp set. Only the network is used.
    ///
    /// # Errors
    /// Returns an error if the manifest or any module cannot be downloaded,
    /// verified or written.
    pub async fn download(
        &self,
        application_name: &str,
        directory: &Path,
        manifest_url: &str,
    ) -> Result<(), Error> {
        let loaded = self
            .inner
            .fetch_manifest(application_name, manifest_url)
            .await?
            .encode_fresh_at()?;

        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|e| Error::io_with_path(&e, directory))?;

        let http: Arc<dyn Fetcher> = Arc::new(self.inner.http.clone());
        self.inner
            .module_run(
                application_name,
                vec![http],
                Arc::new(DirectoryReceiver::new(directory)),
            )
            .run(&loaded.manifest)
            .await?;

        let path = directory.join(manifest_file_name(application_name));
        tokio::fs::write(&path, &loaded.manifest_bytes)
            .await
            .map_err(|e| Error::io_with_path(&e, &path))
    }
}

impl Inner {
    fn now(&self) -> i64 {
        self.clock.now_epoch_ms()
    }

    fn gate(&self) -> std::sync::MutexGuard<'_, DownloadGate> {
        self.downloads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn download_semaphore(&self) -> Arc<Semaphore> {
        self.gate().semaphore.clone()
    }

    fn module_run(
        &self,
        application_name: &str,
        fetchers: Vec<Arc<dyn Fetcher>>,
        receiver: Arc<dyn ModuleReceiver>,
    ) -> ModuleRun {
        ModuleRun {
            application_name: application_name.to_string(),
            fetchers,
            semaphore: self.download_semaphore(),
            listener: self.listener.clone(),
            receiver,
        }
    }

    fn verify(&self, application_name: &str, url: Option<&str>, loaded: &LoadedManifest) -> Result<(), Error> {
        if let Some(key_id) = self.verifier.verify(&loaded.manifest_bytes, &loaded.manifest)? {
            self.listener.manifest_verified(application_name, url, &key_id);
        }
        Ok(())
    }

    /// The pinned manifest, else the embedded one, verified.
    async fn local_manifest(&self, application_name: &str) -> Result<Option<LoadedManifest>, Error> {
        let mut loaded = match &self.caching {
            Some(caching) => caching.load_pinned_manifest(application_name).await?,
            None => None,
        };
        if loaded.is_none() {
            if let Some(embedded) = &self.embedded {
                loaded = embedded
                    .load_manifest(self.listener.as_ref(), application_name)
                    .await?;
            }
        }
        let Some(loaded) = loaded else {
            return Ok(None);
        };
        self.verify(application_name, None, &loaded)?;
        Ok(Some(loaded))
    }

    /// `None` when there is no local manifest or it is not fresh.
    async fn load_from_local(
        &self,
        application_name: &str,
        freshness: &dyn FreshnessChecker,
    ) -> Option<LoadResult> {
        let loaded = match self.local_manifest(application_name).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return None,
            Err(e) => {
                warn!(application = application_name, error = %e, "local manifest unusable");
                let start = self.listener.application_load_start(application_name, None);
                self.listener
                    .application_load_failed(application_name, None, &e, start);
                return Some(LoadResult::Failure(e));
            }
        };

        let start = self.listener.application_load_start(application_name, None);
        if !freshness.is_fresh(&loaded.manifest, loaded.fresh_at_epoch_ms, self.now()) {
            self.listener
                .application_load_skipped_not_fresh(application_name, None, start);
            return None;
        }

        match self.load_from_manifest(application_name, None, &loaded).await {
            Ok(engine) => {
                self.listener.application_load_success(
                    application_name,
                    None,
                    loaded.manifest.modules().len(),
                    start,
                );
                Some(LoadResult::Success(LoadedApplication {
                    engine,
                    manifest: loaded.manifest,
                    fresh_at_epoch_ms: loaded.fresh_at_epoch_ms,
                }))
            }
            Err(e) => {
                self.listener
                    .application_load_failed(application_name, None, &e, start);
                Some(LoadResult::Failure(e))
            }
        }
    }

    /// `None` when the downloaded manifest is the same release as `previous`;
    /// only its freshness is updated then.
    async fn load_from_network(
        &self,
        application_name: &str,
        url: &str,
        previous: &mut Option<LoadedManifest>,
    ) -> Option<LoadResult> {
        let start = self.listener.application_load_start(application_name, Some(url));
        let loaded = match self.fetch_manifest(application_name, url).await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.listener
                    .application_load_failed(application_name, Some(url), &e, start);
                return Some(LoadResult::Failure(e));
            }
        };

        if let Some(previous) = previous.as_mut() {
            if previous.manifest.is_same_release(&loaded.manifest) {
                previous.fresh_at_epoch_ms = loaded.fresh_at_epoch_ms;
                if let Some(caching) = &self.caching {
                    if let Err(e) = caching.update_fresh_at(application_name, &loaded).await {
                        warn!(application = application_name, error = %e, "failed to record manifest freshness");
                    }
                }
                self.listener
                    .application_load_skipped(application_name, url, start);
                return None;
            }
        }

        match self
            .load_from_manifest(application_name, Some(url), &loaded)
            .await
        {
            Ok(engine) => {
                if let Some(caching) = &self.caching {
                    if let Err(e) = caching.pin(application_name, &loaded).await {
                        warn!(application = application_name, error = %e, "failed to pin loaded manifest");
                    }
                }
                self.listener.application_load_success(
                    application_name,
                    Some(url),
                    loaded.manifest.modules().len(),
                    start,
                );
                let result = LoadResult::Success(LoadedApplication {
                    engine,
                    manifest: loaded.manifest.clone(),
                    fresh_at_epoch_ms: loaded.fresh_at_epoch_ms,
                });
                *previous = Some(loaded);
                Some(result)
            }
            Err(e) => {
                self.listener
                    .application_load_failed(application_name, Some(url), &e, start);
                if let Some(caching) = &self.caching {
                    if let Err(unpin_error) = caching.unpin(application_name, &loaded).await {
                        warn!(application = application_name, error = %unpin_error, "failed to release pins of failed load");
                    }
                }
                Some(LoadResult::Failure(e))
            }
        }
    }

    /// Download, decode and verify the manifest at `url`, stamped fresh now.
    async fn fetch_manifest(&self, application_name: &str, url: &str) -> Result<LoadedManifest, Error> {
        let semaphore = self.download_semaphore();
        let loaded = {
            let _permit = semaphore.acquire().await.map_err(|_| Error::Cancelled)?;
            self.http
                .fetch_manifest(self.listener.as_ref(), application_name, url, self.now())
                .await?
        };
        self.verify(application_name, Some(url), &loaded)?;
        Ok(loaded)
    }

    /// Start an engine, feed it every module and run the main function.
    async fn load_from_manifest(
        &self,
        application_name: &str,
        url: Option<&str>,
        loaded: &LoadedManifest,
    ) -> Result<EngineHandle, Error> {
        self.listener.manifest_ready(application_name, url);
        let engine = EngineHandle::spawn(self.engine_factory.clone(), application_name).await?;

        let receiver = Arc::new(EngineReceiver::new(engine.clone(), self.listener.clone()));
        self.module_run(application_name, self.module_fetchers.clone(), receiver)
            .run(&loaded.manifest)
            .await?;

        if let Some(main_function) = loaded.manifest.main_function() {
            engine
                .run_application(loaded.manifest.main_module_id(), main_function)
                .await?;
        }
        debug!(application = application_name, modules = loaded.manifest.modules().len(), "application loaded");
        Ok(engine)
    }
}
