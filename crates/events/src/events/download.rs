use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Manifest and module downloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DownloadEvent {
    Started {
        application: String,
        url: String,
    },

    Completed {
        application: String,
        url: String,
        duration_ms: u64,
    },

    Failed {
        application: String,
        url: String,
        failure: FailureContext,
        duration_ms: u64,
    },
}
