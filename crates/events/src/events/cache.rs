use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Content cache degradations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    /// A cache write was dropped; the caller proceeds without caching.
    StorageFailed {
        application: Option<String>,
        failure: FailureContext,
    },
}
