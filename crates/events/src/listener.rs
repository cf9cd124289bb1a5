//! Callback surface the loader and cache report through

use std::sync::Arc;
use std::time::Instant;

use hotload_errors::Error;

use crate::{
    AppEvent, ApplicationEvent, CacheEvent, DownloadEvent, EventEmitter, EventSender,
    FailureContext, ManifestEvent, ModuleEvent,
};

/// Token returned by the `*_start` callbacks and handed back to the matching
/// end callback.
#[derive(Debug, Clone, Copy)]
pub struct CallStart(Instant);

impl CallStart {
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    /// Milliseconds since the call started, saturating.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.0.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Observer for load progress.
///
/// Every callback has a default body that turns the call into an [`AppEvent`]
/// and hands it to [`EventListener::on_event`]. Implementors usually override
/// `on_event` only. Callbacks must return quickly and must not panic.
///
/// `manifest_url` is `None` when the manifest came from the cache or the
/// embedded directory.
pub trait EventListener: Send + Sync {
    fn on_event(&self, _event: AppEvent) {}

    fn application_load_start(&self, application: &str, manifest_url: Option<&str>) -> CallStart {
        self.on_event(AppEvent::Application(ApplicationEvent::LoadStarted {
            application: application.to_string(),
            url: manifest_url.map(str::to_string),
        }));
        CallStart::now()
    }

    fn application_load_success(
        &self,
        application: &str,
        manifest_url: Option<&str>,
        module_count: usize,
        start: CallStart,
    ) {
        self.on_event(AppEvent::Application(ApplicationEvent::LoadSucceeded {
            application: application.to_string(),
            url: manifest_url.map(str::to_string),
            module_count,
            duration_ms: start.elapsed_ms(),
        }));
    }

    fn application_load_failed(
        &self,
        application: &str,
        manifest_url: Option<&str>,
        error: &Error,
        start: CallStart,
    ) {
        self.on_event(AppEvent::Application(ApplicationEvent::LoadFailed {
            application: application.to_string(),
            url: manifest_url.map(str::to_string),
            failure: FailureContext::from_error(error),
            duration_ms: start.elapsed_ms(),
        }));
    }

    fn application_load_skipped(&self, application: &str, manifest_url: &str, start: CallStart) {
        self.on_event(AppEvent::Application(ApplicationEvent::LoadSkipped {
            application: application.to_string(),
            url: manifest_url.to_string(),
            duration_ms: start.elapsed_ms(),
        }));
    }

    fn application_load_skipped_not_fresh(
        &self,
        application: &str,
        manifest_url: Option<&str>,
        start: CallStart,
    ) {
        self.on_event(AppEvent::Application(ApplicationEvent::LoadSkippedNotFresh {
            application: application.to_string(),
            url: manifest_url.map(str::to_string),
            duration_ms: start.elapsed_ms(),
        }));
    }

    fn download_start(&self, application: &str, url: &str) -> CallStart {
        self.on_event(AppEvent::Download(DownloadEvent::Started {
            application: application.to_string(),
            url: url.to_string(),
        }));
        CallStart::now()
    }

    fn download_end(&self, application: &str, url: &str, start: CallStart) {
        self.on_event(AppEvent::Download(DownloadEvent::Completed {
            application: application.to_string(),
            url: url.to_string(),
            duration_ms: start.elapsed_ms(),
        }));
    }

    fn download_failed(&self, application: &str, url: &str, error: &Error, start: CallStart) {
        self.on_event(AppEvent::Download(DownloadEvent::Failed {
            application: application.to_string(),
            url: url.to_string(),
            failure: FailureContext::from_error(error),
            duration_ms: start.elapsed_ms(),
        }));
    }

    fn manifest_parse_failed(&self, application: &str, url: Option<&str>, error: &Error) {
        self.on_event(AppEvent::Manifest(ManifestEvent::ParseFailed {
            application: application.to_string(),
            url: url.map(str::to_string),
            failure: FailureContext::from_error(error),
        }));
    }

    fn manifest_verified(&self, application: &str, manifest_url: Option<&str>, key_id: &str) {
        self.on_event(AppEvent::Manifest(ManifestEvent::Verified {
            application: application.to_string(),
            url: manifest_url.map(str::to_string),
            key_id: key_id.to_string(),
        }));
    }

    fn manifest_ready(&self, application: &str, manifest_url: Option<&str>) {
        self.on_event(AppEvent::Manifest(ManifestEvent::Ready {
            application: application.to_string(),
            url: manifest_url.map(str::to_string),
        }));
    }

    fn module_load_start(&self, application: &str, module_id: &str) -> CallStart {
        self.on_event(AppEvent::Module(ModuleEvent::LoadStarted {
            application: application.to_string(),
            module_id: module_id.to_string(),
        }));
        CallStart::now()
    }

    fn module_load_end(&self, application: &str, module_id: &str, start: CallStart) {
        self.on_event(AppEvent::Module(ModuleEvent::LoadCompleted {
            application: application.to_string(),
            module_id: module_id.to_string(),
            duration_ms: start.elapsed_ms(),
        }));
    }

    fn cache_storage_failed(&self, application: Option<&str>, error: &Error) {
        self.on_event(AppEvent::Cache(CacheEvent::StorageFailed {
            application: application.map(str::to_string),
            failure: FailureContext::from_error(error),
        }));
    }
}

pub type SharedEventListener = Arc<dyn EventListener>;

/// Discards every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventListener;

impl EventListener for NoopEventListener {}

/// Forwards every callback onto the channel.
impl EventListener for EventSender {
    fn on_event(&self, event: AppEvent) {
        self.emit(event);
    }
}
