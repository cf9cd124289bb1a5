//! Execution engine error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("failed to start engine: {message}")]
    StartFailed { message: String },

    #[error("module {module_id} failed to load: {message}")]
    ModuleLoadFailed { module_id: String, message: String },

    #[error("main function {function} in {module_id} failed: {message}")]
    MainFunctionFailed {
        module_id: String,
        function: String,
        message: String,
    },

    #[error("engine worker has shut down")]
    WorkerGone,
}

impl UserFacingError for EngineError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::StartFailed { .. } => "engine.start_failed",
            Self::ModuleLoadFailed { .. } => "engine.module_load_failed",
            Self::MainFunctionFailed { .. } => "engine.main_function_failed",
            Self::WorkerGone => "engine.worker_gone",
        };
        Some(code)
    }
}
