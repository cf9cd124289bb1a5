#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for the hotload pipeline
//!
//! The loader and the cache report progress through the [`EventListener`]
//! callbacks. Callbacks never block and never fail; a listener decides whether
//! to forward them as [`AppEvent`] values over a channel, log them through
//! `tracing`, or drop them.
//!
//! ## Architecture
//!
//! - **Domain-driven events**: events grouped by functional domain (Download, Module, etc.)
//! - **`EventListener` trait**: callback surface used by the pipeline
//! - **`EventEmitter` trait**: uniform emission over an `EventSender`
//! - **Tracing integration**: [`TracingEventListener`] logs every event with structured fields

pub mod meta;
pub use meta::{EventLevel, EventMeta, EventSource};

pub mod events;
pub use events::{
    AppEvent, ApplicationEvent, CacheEvent, DownloadEvent, FailureContext, ManifestEvent,
    ModuleEvent,
};

pub mod listener;
pub use listener::{CallStart, EventListener, NoopEventListener, SharedEventListener};

pub mod logging;
pub use logging::{log_event_with_tracing, TracingEventListener};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// An event together with the metadata captured when it was emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub meta: EventMeta,
    pub event: AppEvent,
}

impl EventMessage {
    /// Wrap an event, deriving level, source and correlation from it.
    #[must_use]
    pub fn new(event: AppEvent) -> Self {
        let mut meta = EventMeta::new(event.log_level(), event.event_source());
        if let Some(application) = event.application() {
            meta = meta.with_correlation_id(application);
        }
        Self { meta, event }
    }
}

/// Type alias for event sender
pub type EventSender = UnboundedSender<EventMessage>;

/// Type alias for event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<EventMessage>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// The unified trait for emitting events
///
/// This trait provides a single, consistent API for emitting events regardless of
/// whether you have a raw `EventSender` or a struct that contains one.
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Emit an event through this emitter
    fn emit(&self, event: AppEvent) {
        if let Some(sender) = self.event_sender() {
            // Ignore send errors - if receiver is dropped, we just continue
            let _ = sender.send(EventMessage::new(event));
        }
    }
}

/// Implementation of `EventEmitter` for the raw `EventSender`
/// This allows `EventSender` to be used directly where `EventEmitter` is expected
impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}
