//! Manifest model error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ManifestError {
    #[error("module {module_id} is listed before its dependency {dependency}")]
    NotTopologicallySorted { module_id: String, dependency: String },

    #[error("dependency cycle involving module {module_id}")]
    CyclicDependency { module_id: String },

    #[error("module {module_id} depends on unknown module {dependency}")]
    UnknownDependency { module_id: String, dependency: String },

    #[error("duplicate module id {module_id}")]
    DuplicateModule { module_id: String },

    #[error("manifest larger than {max} bytes: {size}")]
    TooLarge { size: usize, max: usize },

    #[error("manifest parse error: {message}")]
    ParseError { message: String },
}

impl UserFacingError for ManifestError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NotTopologicallySorted { .. } => "manifest.not_sorted",
            Self::CyclicDependency { .. } => "manifest.cycle",
            Self::UnknownDependency { .. } => "manifest.unknown_dependency",
            Self::DuplicateModule { .. } => "manifest.duplicate_module",
            Self::TooLarge { .. } => "manifest.too_large",
            Self::ParseError { .. } => "manifest.parse",
        };
        Some(code)
    }
}
