//! Destinations for verified module bytes

use std::path::PathBuf;

use async_trait::async_trait;
use hotload_errors::Error;
use hotload_events::SharedEventListener;
use hotload_hash::Hash;

use crate::engine::EngineHandle;

/// Consumes modules once their bytes are verified and their dependencies
/// have been received.
#[async_trait]
pub trait ModuleReceiver: Send + Sync {
    async fn receive(&self, bytes: Vec<u8>, id: &str, sha256: &Hash) -> Result<(), Error>;
}

/// Evaluates modules in the application's engine.
pub struct EngineReceiver {
    engine: EngineHandle,
    listener: SharedEventListener,
}

impl EngineReceiver {
    #[must_use]
    pub fn new(engine: EngineHandle, listener: SharedEventListener) -> Self {
        Self { engine, listener }
    }
}

#[async_trait]
impl ModuleReceiver for EngineReceiver {
    async fn receive(&self, bytes: Vec<u8>, id: &str, _sha256: &Hash) -> Result<(), Error> {
        let application_name = self.engine.application_name();
        let start = self.listener.module_load_start(application_name, id);
        self.engine.load_module(bytes, id).await?;
        self.listener.module_load_end(application_name, id, start);
        Ok(())
    }
}

/// Writes modules to `<directory>/<sha256 hex>` for later use as an
/// embedded directory.
#[derive(Debug, Clone)]
pub struct DirectoryReceiver {
    directory: PathBuf,
}

impl DirectoryReceiver {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl ModuleReceiver for DirectoryReceiver {
    async fn receive(&self, bytes: Vec<u8>, _id: &str, sha256: &Hash) -> Result<(), Error> {
        let path = self.directory.join(sha256.to_hex());
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::io_with_path(&e, &path))
    }
}
