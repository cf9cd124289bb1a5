use serde::{Deserialize, Serialize};

use crate::{EventLevel, EventSource};
use hotload_errors::UserFacingError;

/// Structured failure information shared across domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    /// Stable error code from the error taxonomy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    /// Construct a new failure context.
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self::new(
            error.user_code(),
            error.user_message().into_owned(),
            error.user_hint(),
            error.is_retryable(),
        )
    }
}

pub mod application;
pub mod cache;
pub mod download;
pub mod manifest;
pub mod module;

pub use application::*;
pub use cache::*;
pub use download::*;
pub use manifest::*;
pub use module::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Manifest and module downloads
    Download(DownloadEvent),

    /// Manifest parsing and verification
    Manifest(ManifestEvent),

    /// Engine hand-off per module
    Module(ModuleEvent),

    /// Whole-application load lifecycle
    Application(ApplicationEvent),

    /// Content cache degradations
    Cache(CacheEvent),
}

impl AppEvent {
    /// Identify the source domain for this event (used for metadata/logging).
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::Download(_) => EventSource::Download,
            Self::Manifest(_) => EventSource::Manifest,
            Self::Module(_) => EventSource::Module,
            Self::Application(_) => EventSource::Application,
            Self::Cache(_) => EventSource::Cache,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> EventLevel {
        match self {
            Self::Download(DownloadEvent::Failed { .. })
            | Self::Manifest(ManifestEvent::ParseFailed { .. })
            | Self::Application(ApplicationEvent::LoadFailed { .. }) => EventLevel::Error,

            Self::Cache(CacheEvent::StorageFailed { .. }) => EventLevel::Warn,

            Self::Download(DownloadEvent::Started { .. } | DownloadEvent::Completed { .. })
            | Self::Module(_)
            | Self::Manifest(ManifestEvent::Ready { .. }) => EventLevel::Debug,

            _ => EventLevel::Info,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::Download(_) => "hotload::events::download",
            Self::Manifest(_) => "hotload::events::manifest",
            Self::Module(_) => "hotload::events::module",
            Self::Application(_) => "hotload::events::application",
            Self::Cache(_) => "hotload::events::cache",
        }
    }

    /// Application name carried by the event, if any.
    #[must_use]
    pub fn application(&self) -> Option<&str> {
        match self {
            Self::Download(
                DownloadEvent::Started { application, .. }
                | DownloadEvent::Completed { application, .. }
                | DownloadEvent::Failed { application, .. },
            )
            | Self::Manifest(
                ManifestEvent::ParseFailed { application, .. }
                | ManifestEvent::Verified { application, .. }
                | ManifestEvent::Ready { application, .. },
            )
            | Self::Module(
                ModuleEvent::LoadStarted { application, .. }
                | ModuleEvent::LoadCompleted { application, .. },
            )
            | Self::Application(
                ApplicationEvent::LoadStarted { application, .. }
                | ApplicationEvent::LoadSucceeded { application, .. }
                | ApplicationEvent::LoadFailed { application, .. }
                | ApplicationEvent::LoadSkipped { application, .. }
                | ApplicationEvent::LoadSkippedNotFresh { application, .. },
            ) => Some(application),
            Self::Cache(CacheEvent::StorageFailed { application, .. }) => application.as_deref(),
        }
    }
}
