use serde::{Deserialize, Serialize};

/// Hand-off of module bytes to the execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModuleEvent {
    LoadStarted {
        application: String,
        module_id: String,
    },

    LoadCompleted {
        application: String,
        module_id: String,
        duration_ms: u64,
    },
}
