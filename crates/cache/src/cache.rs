//! The content cache and its DIRTY/READY state machine

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hotload_errors::{Error, StateError};
use hotload_events::{NoopEventListener, SharedEventListener};
use hotload_hash::Hash;
use hotload_manifest::LoadedManifest;
use hotload_types::{FileState, SharedClock, SystemClock, DEFAULT_CACHE_MAX_BYTES};
use sqlx::{Pool, Sqlite};
use tracing::{debug, warn};

use crate::db::{self, CacheEntry};
use crate::fs::{CacheFileSystem, TokioFileSystem};

/// Stores downloaded files named by their SHA-256, with a SQLite index of
/// which files are being written, when they were last used, and which
/// applications depend on them.
///
/// ```text
///            open_for_write
///   (absent) --------------> DIRTY
///      ^                       |
///      |        pruned         | set_ready
///      '-------------------- READY
/// ```
///
/// Absent entries have no row. A file exists on disk iff its row is READY.
/// `max_size_bytes` bounds the bytes of READY files; it does not count the
/// index or writes in flight.
///
/// Safe for concurrent use within one process. Several processes sharing a
/// cache directory is unsupported.
pub struct ContentCache {
    pool: Pool<Sqlite>,
    file_system: Arc<dyn CacheFileSystem>,
    directory: PathBuf,
    max_size_bytes: u64,
    clock: SharedClock,
    listener: SharedEventListener,
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("directory", &self.directory)
            .field("max_size_bytes", &self.max_size_bytes)
            .finish_non_exhaustive()
    }
}

/// Options for [`ContentCache::open`].
pub struct CacheBuilder {
    directory: PathBuf,
    database_name: String,
    max_size_bytes: u64,
    file_system: Arc<dyn CacheFileSystem>,
    clock: SharedClock,
    listener: SharedEventListener,
}

impl CacheBuilder {
    #[must_use]
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    #[must_use]
    pub fn max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    #[must_use]
    pub fn file_system(mut self, file_system: Arc<dyn CacheFileSystem>) -> Self {
        self.file_system = file_system;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn event_listener(mut self, listener: SharedEventListener) -> Self {
        self.listener = listener;
        self
    }

    /// Open the index, migrate it, and clean up after the previous run.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the index
    /// cannot be opened or migrated.
    pub async fn open(self) -> Result<ContentCache, Error> {
        self.file_system
            .create_dir_all(&self.directory)
            .await
            .map_err(|e| Error::io_with_path(&e, &self.directory))?;

        let pool = db::create_pool(&self.directory.join(&self.database_name)).await?;
        db::run_migrations(&pool).await?;

        let cache = ContentCache {
            pool,
            file_system: self.file_system,
            directory: self.directory,
            max_size_bytes: self.max_size_bytes,
            clock: self.clock,
            listener: self.listener,
        };
        cache.initialize().await?;
        Ok(cache)
    }
}

impl ContentCache {
    /// Configure a cache rooted at `directory`.
    pub fn builder(directory: impl Into<PathBuf>) -> CacheBuilder {
        CacheBuilder {
            directory: directory.into(),
            database_name: "hotload.db".to_string(),
            max_size_bytes: DEFAULT_CACHE_MAX_BYTES,
            file_system: Arc::new(TokioFileSystem),
            clock: Arc::new(SystemClock),
            listener: Arc::new(NoopEventListener),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, entry: &CacheEntry) -> PathBuf {
        self.directory.join(entry.file_name())
    }

    fn now(&self) -> i64 {
        self.clock.now_epoch_ms()
    }

    /// Delete DIRTY rows left by a previous run, then prune.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub async fn initialize(&self) -> Result<(), Error> {
        while let Some(dirty) = db::any_dirty(&self.pool).await? {
            if let Err(e) = self.file_system.remove(&self.path(&dirty)).await {
                // Can't delete files; leave the rest for the next run.
                warn!(entry = %dirty.sha256_hex, error = %e, "could not delete dirty cache file");
                self.listener
                    .cache_storage_failed(None, &Error::io_with_path(&e, self.path(&dirty)));
                break;
            }
            db::delete_entry(&self.pool, dirty.id).await?;
            debug!(entry = %dirty.sha256_hex, "deleted dirty cache entry");
        }
        self.prune().await
    }

    /// Go from absent to DIRTY and pin the new row to `application_name`.
    ///
    /// Returns `None` when a row for `sha256` already exists: another writer
    /// owns it, or it is already READY. Only the caller that receives the
    /// entry may write its file.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be updated.
    pub async fn open_for_write(
        &self,
        application_name: &str,
        sha256: &Hash,
        manifest_fresh_at_epoch_ms: Option<i64>,
    ) -> Result<Option<CacheEntry>, Error> {
        let sha256_hex = sha256.to_hex();
        let manifest_for = manifest_fresh_at_epoch_ms.map(|_| application_name);

        let mut tx = self.pool.begin().await?;
        let inserted = db::insert_dirty(
            &mut *tx,
            &sha256_hex,
            manifest_for,
            self.now(),
            manifest_fresh_at_epoch_ms,
        )
        .await?;
        if !inserted {
            return Ok(None);
        }
        let entry = db::get_by_sha256(&mut *tx, &sha256_hex)
            .await?
            .ok_or_else(|| StateError::StateCorrupted {
                message: format!("inserted row for {sha256_hex} vanished"),
            })?;
        // Pinned optimistically; a failed load unpins it.
        db::create_pin(&mut *tx, entry.id, application_name).await?;
        tx.commit().await?;
        Ok(Some(entry))
    }

    /// Go from DIRTY to READY, then prune.
    ///
    /// The caller stops being the exclusive owner. An entry that is larger
    /// than the budget and unpinned is deleted before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidTransition`] if the row is not DIRTY,
    /// which means something else is writing to this cache directory.
    pub async fn set_ready(&self, entry: &CacheEntry, size_bytes: u64) -> Result<(), Error> {
        let size = i64::try_from(size_bytes).map_err(|_| Error::internal("entry size overflows i64"))?;

        let mut tx = self.pool.begin().await?;
        let current = db::get_by_id(&mut *tx, entry.id).await?;
        if current.as_ref().map(|c| c.file_state) != Some(FileState::Dirty) {
            return Err(StateError::InvalidTransition {
                entry: entry.sha256_hex.clone(),
                from: current.map_or_else(|| "absent".to_string(), |c| c.file_state.to_string()),
                to: FileState::Ready.to_string(),
            }
            .into());
        }
        db::mark_ready(&mut *tx, entry.id, size, self.now()).await?;
        tx.commit().await?;

        self.prune().await
    }

    /// Store `content` under `sha256` if nobody else holds the hash.
    ///
    /// Returns `None` when the write did not happen: the hash was already
    /// present, or storage failed. Storage failures are reported to the
    /// listener and otherwise swallowed; callers proceed without caching.
    ///
    /// # Errors
    ///
    /// Only for broken cache invariants, see [`ContentCache::set_ready`].
    pub async fn write(
        &self,
        application_name: &str,
        sha256: &Hash,
        content: &[u8],
    ) -> Result<Option<CacheEntry>, Error> {
        self.write_entry(application_name, sha256, content, None).await
    }

    async fn write_entry(
        &self,
        application_name: &str,
        sha256: &Hash,
        content: &[u8],
        manifest_fresh_at_epoch_ms: Option<i64>,
    ) -> Result<Option<CacheEntry>, Error> {
        let entry = match self
            .open_for_write(application_name, sha256, manifest_fresh_at_epoch_ms)
            .await
        {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.storage_failed(application_name, &e);
                return Ok(None);
            }
        };

        let path = self.path(&entry);
        if let Err(e) = self.file_system.write(&path, content).await {
            self.storage_failed(application_name, &Error::io_with_path(&e, &path));
            self.abandon(&entry).await;
            return Ok(None);
        }

        match self.set_ready(&entry, content.len() as u64).await {
            Ok(()) => Ok(Some(entry)),
            Err(e @ Error::State(StateError::InvalidTransition { .. })) => Err(e),
            Err(e) => {
                self.storage_failed(application_name, &e);
                Ok(None)
            }
        }
    }

    /// Best-effort rollback of a DIRTY entry whose write failed. Whatever is
    /// left behind is cleaned up by the next [`ContentCache::initialize`].
    async fn abandon(&self, entry: &CacheEntry) {
        if self.file_system.remove(&self.path(entry)).await.is_err() {
            return;
        }
        if let Err(e) = db::delete_entry(&self.pool, entry.id).await {
            debug!(entry = %entry.sha256_hex, error = %e, "could not delete abandoned cache row");
        }
    }

    fn storage_failed(&self, application_name: &str, error: &Error) {
        warn!(application = application_name, error = %error, "cache write failed");
        self.listener.cache_storage_failed(Some(application_name), error);
    }

    /// Return the bytes for `sha256` if READY and intact.
    ///
    /// Touches the entry's last-used time. A missing or corrupt file deletes
    /// the entry and reads as a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub async fn read(&self, sha256: &Hash) -> Result<Option<Vec<u8>>, Error> {
        match db::get_by_sha256(&self.pool, &sha256.to_hex()).await? {
            Some(entry) => self.read_entry(&entry).await,
            None => Ok(None),
        }
    }

    async fn read_entry(&self, entry: &CacheEntry) -> Result<Option<Vec<u8>>, Error> {
        if entry.file_state != FileState::Ready {
            return Ok(None);
        }

        db::touch(&self.pool, entry.id, self.now()).await?;

        let path = self.path(entry);
        let content = self.file_system.read(&path).await.ok();
        let intact = match (&content, Hash::from_hex(&entry.sha256_hex)) {
            (Some(bytes), Ok(expected)) => Hash::from_data(bytes) == expected,
            _ => false,
        };

        if !intact {
            warn!(entry = %entry.sha256_hex, path = %path.display(), "evicting missing or corrupt cache entry");
            self.evict(entry).await?;
            return Ok(None);
        }

        Ok(content)
    }

    /// Read `sha256`, or run `download` and store its result.
    ///
    /// Downloaded bytes are checked against `sha256` before anything is
    /// stored. When several callers race on the same absent hash, one stores
    /// its bytes and the others just return theirs.
    ///
    /// # Errors
    ///
    /// Returns the download's error, a hash mismatch, or an index failure.
    pub async fn get_or_put<F, Fut>(
        &self,
        application_name: &str,
        sha256: &Hash,
        download: F,
    ) -> Result<Vec<u8>, Error>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, Error>> + Send,
    {
        if let Some(content) = self.read(sha256).await? {
            return Ok(content);
        }

        let content = download().await?;
        sha256.verify(&content)?;
        self.write(application_name, sha256, &content).await?;
        Ok(content)
    }

    /// Delete a READY entry whose file is unusable.
    ///
    /// A file that is already gone still drops the row. Any other remove
    /// failure keeps the row, so the file stays accounted for, and is reported.
    async fn evict(&self, entry: &CacheEntry) -> Result<(), Error> {
        let path = self.path(entry);
        match self.file_system.remove(&path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!(entry = %entry.sha256_hex, error = %e, "could not delete unusable cache file");
                self.listener
                    .cache_storage_failed(None, &Error::io_with_path(&e, &path));
                Ok(())
            }
            _ => db::delete_entry(&self.pool, entry.id).await,
        }
    }

    /// Store a manifest unless its bytes are already cached.
    ///
    /// # Errors
    ///
    /// Only for broken cache invariants.
    pub async fn get_or_put_manifest(
        &self,
        application_name: &str,
        loaded: &LoadedManifest,
    ) -> Result<Option<CacheEntry>, Error> {
        let sha256 = Hash::from_data(&loaded.manifest_bytes);
        if let Some(entry) = db::get_by_sha256(&self.pool, &sha256.to_hex()).await? {
            return Ok(Some(entry));
        }
        self.write_entry(
            application_name,
            &sha256,
            &loaded.manifest_bytes,
            Some(loaded.fresh_at_epoch_ms),
        )
        .await
    }

    /// Freshest manifest pinned for `application_name`.
    ///
    /// A pinned manifest whose file is missing, corrupt or unparsable is
    /// evicted and reads as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub async fn get_pinned_manifest(&self, application_name: &str) -> Result<Option<LoadedManifest>, Error> {
        let Some(entry) = db::pinned_manifest(&self.pool, application_name, None).await? else {
            return Ok(None);
        };
        self.load_manifest_entry(&entry).await
    }

    async fn load_manifest_entry(&self, entry: &CacheEntry) -> Result<Option<LoadedManifest>, Error> {
        let Some(bytes) = self.read_entry(entry).await? else {
            return Ok(None);
        };
        match LoadedManifest::parse(bytes, entry.fresh_at_epoch_ms.unwrap_or_default()) {
            Ok(loaded) => Ok(Some(loaded)),
            Err(e) => {
                warn!(entry = %entry.sha256_hex, error = %e, "evicting unparsable cached manifest");
                self.evict(entry).await?;
                Ok(None)
            }
        }
    }

    /// Pin `sha256` to `application_name` if it is cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be updated.
    pub async fn pin(&self, application_name: &str, sha256: &Hash) -> Result<(), Error> {
        if let Some(entry) = db::get_by_sha256(&self.pool, &sha256.to_hex()).await? {
            db::create_pin(&self.pool, entry.id, application_name).await?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the index cannot be updated.
    pub async fn unpin(&self, application_name: &str, sha256: &Hash) -> Result<(), Error> {
        if let Some(entry) = db::get_by_sha256(&self.pool, &sha256.to_hex()).await? {
            db::delete_pin(&self.pool, entry.id, application_name).await?;
        }
        Ok(())
    }

    /// Make `loaded` the application's only pinned manifest.
    ///
    /// Stores the manifest if needed, then in one transaction drops every pin
    /// the application holds and pins the manifest and each cached module.
    /// If the manifest cannot be stored nothing changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be updated.
    pub async fn pin_manifest(&self, application_name: &str, loaded: &LoadedManifest) -> Result<(), Error> {
        let Some(manifest_entry) = self.get_or_put_manifest(application_name, loaded).await? else {
            return Ok(());
        };

        let mut tx = self.pool.begin().await?;
        db::delete_application_pins(&mut *tx, application_name).await?;
        for (_, module) in loaded.manifest.modules().iter() {
            if let Some(entry) = db::get_by_sha256(&mut *tx, &module.sha256.to_hex()).await? {
                db::create_pin(&mut *tx, entry.id, application_name).await?;
            }
        }
        db::create_pin(&mut *tx, manifest_entry.id, application_name).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Release `loaded` after a failed load.
    ///
    /// If the application has another pinned manifest, that one is re-pinned
    /// (which also drops the failed load's optimistic pins). Otherwise every
    /// pin for the application is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be updated.
    pub async fn unpin_manifest(&self, application_name: &str, loaded: &LoadedManifest) -> Result<(), Error> {
        let sha256 = Hash::from_data(&loaded.manifest_bytes);
        let unpinned = db::get_by_sha256(&self.pool, &sha256.to_hex()).await?;

        let mut fallback = None;
        if let Some(unpinned) = &unpinned {
            fallback = db::pinned_manifest(&self.pool, application_name, Some(unpinned.id)).await?;
        }
        if fallback.is_none() && unpinned.is_none() {
            fallback = db::pinned_manifest(&self.pool, application_name, None).await?;
        }

        let fallback = match fallback {
            Some(entry) => self.load_manifest_entry(&entry).await?,
            None => None,
        };

        match fallback {
            Some(fallback) => self.pin_manifest(application_name, &fallback).await,
            None => {
                db::delete_application_pins(&self.pool, application_name).await?;
                Ok(())
            }
        }
    }

    /// Record that `loaded` was confirmed fresh at `loaded.fresh_at_epoch_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be updated.
    pub async fn update_manifest_fresh_at(&self, application_name: &str, loaded: &LoadedManifest) -> Result<(), Error> {
        let Some(entry) = self.get_or_put_manifest(application_name, loaded).await? else {
            return Ok(());
        };
        db::update_fresh_at(&self.pool, entry.id, loaded.fresh_at_epoch_ms).await
    }

    /// Prune to the configured budget.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub async fn prune(&self) -> Result<(), Error> {
        self.prune_to(self.max_size_bytes).await
    }

    /// Delete least recently used unpinned READY entries until the READY
    /// total is at most `max_size_bytes` or nothing else is eligible.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub async fn prune_to(&self, max_size_bytes: u64) -> Result<(), Error> {
        let budget = i64::try_from(max_size_bytes).unwrap_or(i64::MAX);
        loop {
            if db::ready_bytes(&self.pool).await? <= budget {
                return Ok(());
            }
            let Some(oldest) = db::oldest_unpinned_ready(&self.pool).await? else {
                return Ok(());
            };

            let path = self.path(&oldest);
            if let Err(e) = self.file_system.remove(&path).await {
                warn!(entry = %oldest.sha256_hex, error = %e, "could not prune cache file");
                self.listener
                    .cache_storage_failed(None, &Error::io_with_path(&e, &path));
                return Ok(());
            }
            db::delete_entry(&self.pool, oldest.id).await?;
            debug!(entry = %oldest.sha256_hex, size = oldest.size_bytes, "pruned cache entry");
        }
    }

    /// Row for `sha256`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub async fn entry(&self, sha256: &Hash) -> Result<Option<CacheEntry>, Error> {
        db::get_by_sha256(&self.pool, &sha256.to_hex()).await
    }

    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub async fn is_pinned(&self, application_name: &str, sha256: &Hash) -> Result<bool, Error> {
        match db::get_by_sha256(&self.pool, &sha256.to_hex()).await? {
            Some(entry) => db::is_pinned(&self.pool, entry.id, application_name).await,
            None => Ok(false),
        }
    }

    /// Total bytes of READY entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub async fn ready_bytes(&self) -> Result<u64, Error> {
        Ok(u64::try_from(db::ready_bytes(&self.pool).await?).unwrap_or_default())
    }

    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub async fn count_files(&self) -> Result<usize, Error> {
        Ok(usize::try_from(db::count_files(&self.pool).await?).unwrap_or_default())
    }

    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub async fn count_pins(&self) -> Result<usize, Error> {
        Ok(usize::try_from(db::count_pins(&self.pool).await?).unwrap_or_default())
    }

    /// Close the index.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
