use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Outcome of one application load attempt.
///
/// `url` is `None` when the load was served from the pinned cache or the
/// embedded directory without touching the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ApplicationEvent {
    LoadStarted {
        application: String,
        url: Option<String>,
    },

    LoadSucceeded {
        application: String,
        url: Option<String>,
        module_count: usize,
        duration_ms: u64,
    },

    LoadFailed {
        application: String,
        url: Option<String>,
        failure: FailureContext,
        duration_ms: u64,
    },

    /// The network manifest is identical to the one already running.
    LoadSkipped {
        application: String,
        url: String,
        duration_ms: u64,
    },

    /// A local manifest exists but the freshness policy rejected it.
    LoadSkippedNotFresh {
        application: String,
        url: Option<String>,
        duration_ms: u64,
    },
}
