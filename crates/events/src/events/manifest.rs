use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Manifest parsing and signature checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ManifestEvent {
    /// The manifest bytes could not be decoded or failed validation.
    ParseFailed {
        application: String,
        url: Option<String>,
        failure: FailureContext,
    },

    /// A trusted key accepted the manifest signature.
    Verified {
        application: String,
        url: Option<String>,
        key_id: String,
    },

    /// The manifest is verified and its modules are about to load.
    Ready {
        application: String,
        url: Option<String>,
    },
}
