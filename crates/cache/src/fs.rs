//! File system seam under the cache
//!
//! Everything the cache does to disk goes through [`CacheFileSystem`], which
//! lets tests inject write failures at any point.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait CacheFileSystem: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Create or replace `path` with `content`, durably.
    async fn write(&self, path: &Path, content: &[u8]) -> io::Result<()>;

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Delete `path`. Deleting a missing file succeeds.
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// The real file system, via tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioFileSystem;

#[async_trait]
impl CacheFileSystem for TokioFileSystem {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(content).await?;
        file.sync_all().await
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Wraps [`TokioFileSystem`] and fails every write once a limit is reached.
///
/// A failing write leaves an empty file behind before returning the error,
/// the way a write that runs out of space partway through would. Removes can
/// be made to fail with a chosen error kind.
#[derive(Debug)]
pub struct FaultInjectingFileSystem {
    inner: TokioFileSystem,
    write_limit: AtomicUsize,
    write_count: AtomicUsize,
    remove_error: Mutex<Option<io::ErrorKind>>,
}

impl Default for FaultInjectingFileSystem {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl FaultInjectingFileSystem {
    /// Writes numbered `write_limit` and later fail. The first write is
    /// number 1, so a limit of 1 fails every write.
    #[must_use]
    pub fn new(write_limit: usize) -> Self {
        Self {
            inner: TokioFileSystem,
            write_limit: AtomicUsize::new(write_limit),
            write_count: AtomicUsize::new(0),
            remove_error: Mutex::new(None),
        }
    }

    pub fn set_write_limit(&self, write_limit: usize) {
        self.write_limit.store(write_limit, Ordering::SeqCst);
    }

    /// Make every remove fail with `kind`, or succeed again with `None`.
    pub fn set_remove_error(&self, kind: Option<io::ErrorKind>) {
        *self
            .remove_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = kind;
    }

    /// Writes attempted so far, including failed ones.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheFileSystem for FaultInjectingFileSystem {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path).await
    }

    async fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let count = self.write_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.write_limit.load(Ordering::SeqCst) {
            self.inner.write(path, &[]).await?;
            return Err(io::Error::new(io::ErrorKind::StorageFull, "write limit exceeded"));
        }
        self.inner.write(path, content).await
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let injected = *self
            .remove_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match injected {
            Some(kind) => Err(io::Error::new(kind, "remove failure injected")),
            None => self.inner.remove(path).await,
        }
    }
}
