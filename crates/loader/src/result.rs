use hotload_errors::Error;
use hotload_manifest::Manifest;

use crate::engine::EngineHandle;

/// An application whose modules are all loaded into its engine.
#[derive(Debug, Clone)]
pub struct LoadedApplication {
    pub engine: EngineHandle,
    pub manifest: Manifest,
    pub fresh_at_epoch_ms: i64,
}

/// Outcome of one load attempt.
#[derive(Debug)]
pub enum LoadResult {
    Success(LoadedApplication),
    Failure(Error),
}

impl LoadResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, LoadResult::Success(_))
    }

    /// # Errors
    /// Returns the load's error for [`LoadResult::Failure`].
    pub fn into_result(self) -> Result<LoadedApplication, Error> {
        match self {
            LoadResult::Success(app) => Ok(app),
            LoadResult::Failure(e) => Err(e),
        }
    }
}
