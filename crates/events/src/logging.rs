//! Structured logging integration for events
//!
//! Converts domain events into tracing records with structured fields.

use tracing::{debug, error, info, warn};

use crate::{
    AppEvent, ApplicationEvent, CacheEvent, DownloadEvent, EventListener, EventMessage,
    ManifestEvent, ModuleEvent,
};

/// Log an event using the tracing infrastructure with structured fields
pub fn log_event_with_tracing(message: &EventMessage) {
    let event = &message.event;
    let meta = &message.meta;
    match event {
        AppEvent::Download(download) => match download {
            DownloadEvent::Started { application, url } => {
                debug!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    application = %application,
                    url = %url,
                    "Download started"
                );
            }
            DownloadEvent::Completed {
                application,
                url,
                duration_ms,
            } => {
                debug!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    application = %application,
                    url = %url,
                    duration_ms,
                    "Download completed"
                );
            }
            DownloadEvent::Failed {
                application,
                url,
                failure,
                duration_ms,
            } => {
                error!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    application = %application,
                    url = %url,
                    duration_ms,
                    retryable = failure.retryable,
                    code = ?failure.code,
                    reason = %failure.message,
                    "Download failed"
                );
            }
        },

        AppEvent::Manifest(manifest) => match manifest {
            ManifestEvent::ParseFailed {
                application,
                url,
                failure,
            } => {
                error!(
                    source = meta.source.as_str(),
                    application = %application,
                    url = ?url,
                    code = ?failure.code,
                    reason = %failure.message,
                    "Manifest parse failed"
                );
            }
            ManifestEvent::Verified {
                application,
                url,
                key_id,
            } => {
                info!(
                    source = meta.source.as_str(),
                    application = %application,
                    url = ?url,
                    key_id = %key_id,
                    "Manifest signature verified"
                );
            }
            ManifestEvent::Ready { application, url } => {
                debug!(
                    source = meta.source.as_str(),
                    application = %application,
                    url = ?url,
                    "Manifest ready"
                );
            }
        },

        AppEvent::Module(module) => match module {
            ModuleEvent::LoadStarted {
                application,
                module_id,
            } => {
                debug!(
                    source = meta.source.as_str(),
                    application = %application,
                    module_id = %module_id,
                    "Module load started"
                );
            }
            ModuleEvent::LoadCompleted {
                application,
                module_id,
                duration_ms,
            } => {
                debug!(
                    source = meta.source.as_str(),
                    application = %application,
                    module_id = %module_id,
                    duration_ms,
                    "Module loaded"
                );
            }
        },

        AppEvent::Application(application_event) => match application_event {
            ApplicationEvent::LoadStarted { application, url } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    application = %application,
                    url = ?url,
                    "Application load started"
                );
            }
            ApplicationEvent::LoadSucceeded {
                application,
                url,
                module_count,
                duration_ms,
            } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    application = %application,
                    url = ?url,
                    module_count,
                    duration_ms,
                    "Application loaded"
                );
            }
            ApplicationEvent::LoadFailed {
                application,
                url,
                failure,
                duration_ms,
            } => {
                error!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    application = %application,
                    url = ?url,
                    duration_ms,
                    retryable = failure.retryable,
                    code = ?failure.code,
                    reason = %failure.message,
                    hint = ?failure.hint,
                    "Application load failed"
                );
            }
            ApplicationEvent::LoadSkipped {
                application,
                url,
                duration_ms,
            } => {
                info!(
                    source = meta.source.as_str(),
                    application = %application,
                    url = %url,
                    duration_ms,
                    "Application unchanged, load skipped"
                );
            }
            ApplicationEvent::LoadSkippedNotFresh {
                application,
                url,
                duration_ms,
            } => {
                info!(
                    source = meta.source.as_str(),
                    application = %application,
                    url = ?url,
                    duration_ms,
                    "Local manifest not fresh, load skipped"
                );
            }
        },

        AppEvent::Cache(CacheEvent::StorageFailed {
            application,
            failure,
        }) => {
            warn!(
                source = meta.source.as_str(),
                application = ?application,
                code = ?failure.code,
                reason = %failure.message,
                "Cache write dropped"
            );
        }
    }
}

/// Listener that writes every callback to the active tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventListener;

impl EventListener for TracingEventListener {
    fn on_event(&self, event: crate::AppEvent) {
        log_event_with_tracing(&EventMessage::new(event));
    }
}
