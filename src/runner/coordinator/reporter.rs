//! Host reporting seam.
//!
//! The coordinator reports every batch and lifecycle event through a [`HostReporter`]. [`EventReporter`] republishes
//! them as [`HostEvent`]s on a broadcast channel so remote transports and console reporters can consume the same
//! stream.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::runner::checker::CheckerCycle;
use crate::runner::tasks::{TaskError, TaskNode, TaskPack};

const EVENT_CAPACITY: usize = 256;

/// Message sent with a watcher-triggered rerun.
pub const RERUN_TRIGGER: &str = "File change detected. Triggering rerun.";

/// Where a reported error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorOrigin {
    #[serde(rename = "Unhandled Source Error")]
    UnhandledSourceError,
    #[serde(rename = "Typecheck Error")]
    TypecheckError,
    #[serde(rename = "Collection Error")]
    CollectionError,
}

impl ErrorOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorOrigin::UnhandledSourceError => "Unhandled Source Error",
            ErrorOrigin::TypecheckError => "Typecheck Error",
            ErrorOrigin::CollectionError => "Collection Error",
        }
    }
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives task batches and lifecycle events from the coordinator.
///
/// Implementations are shared between the coordinator and its per-project forwarders, so they take `&self`.
pub trait HostReporter: Send + Sync {
    /// Files are about to be checked.
    fn on_enqueued(&self, _files: &[TaskNode]) {}

    /// Collected task trees, before any results.
    fn on_collected(&self, files: &[TaskNode]);

    /// Results for previously collected tasks.
    fn on_updated(&self, packs: &[TaskPack]);

    fn on_parse_start(&self) {}

    fn on_parse_end(&self, _cycle: &CheckerCycle) {}

    fn on_error(&self, origin: ErrorOrigin, error: &TaskError);

    /// The checker's watcher started a cycle nobody requested.
    fn on_watcher_rerun(&self, _files: &[PathBuf], _trigger: &str) {}

    /// A watcher-started cycle finished.
    fn on_finished(&self, _files: &[TaskNode]) {}

    /// Watch mode is idle and waiting for changes.
    fn on_watcher_start(&self) {}
}

/// Serializable form of every [`HostReporter`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Enqueued { files: Vec<TaskNode> },
    Collected { files: Vec<TaskNode> },
    Updated { packs: Vec<TaskPack> },
    ParseStart,
    ParseEnd { cycle: CheckerCycle },
    Error { origin: ErrorOrigin, error: TaskError },
    WatcherRerun { files: Vec<PathBuf>, trigger: String },
    Finished { files: Vec<TaskNode> },
    WatcherStart,
}

/// Publishes every call as a [`HostEvent`].
#[derive(Debug, Clone)]
pub struct EventReporter {
    sender: broadcast::Sender<HostEvent>,
}

impl Default for EventReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventReporter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: HostEvent) {
        // No subscribers is fine: nobody is listening yet.
        let _ = self.sender.send(event);
    }
}

impl HostReporter for EventReporter {
    fn on_enqueued(&self, files: &[TaskNode]) {
        self.publish(HostEvent::Enqueued { files: files.to_vec() });
    }

    fn on_collected(&self, files: &[TaskNode]) {
        self.publish(HostEvent::Collected { files: files.to_vec() });
    }

    fn on_updated(&self, packs: &[TaskPack]) {
        self.publish(HostEvent::Updated { packs: packs.to_vec() });
    }

    fn on_parse_start(&self) {
        self.publish(HostEvent::ParseStart);
    }

    fn on_parse_end(&self, cycle: &CheckerCycle) {
        self.publish(HostEvent::ParseEnd { cycle: cycle.clone() });
    }

    fn on_error(&self, origin: ErrorOrigin, error: &TaskError) {
        self.publish(HostEvent::Error {
            origin,
            error: error.clone(),
        });
    }

    fn on_watcher_rerun(&self, files: &[PathBuf], trigger: &str) {
        self.publish(HostEvent::WatcherRerun {
            files: files.to_vec(),
            trigger: trigger.to_string(),
        });
    }

    fn on_finished(&self, files: &[TaskNode]) {
        self.publish(HostEvent::Finished { files: files.to_vec() });
    }

    fn on_watcher_start(&self) {
        self.publish(HostEvent::WatcherStart);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_a_tag() {
        let event = HostEvent::Error {
            origin: ErrorOrigin::UnhandledSourceError,
            error: TaskError::new("TypeCheckError", "boom"),
        };
        insta::assert_snapshot!(
            serde_json::to_string(&event).unwrap(),
            @r#"{"event":"error","origin":"Unhandled Source Error","error":{"name":"TypeCheckError","message":"boom"}}"#
        );
        assert_eq!(serde_json::to_string(&HostEvent::WatcherStart).unwrap(), r#"{"event":"watcher_start"}"#);
    }

    #[test]
    fn test_event_reporter_publishes_to_subscribers() {
        let reporter = EventReporter::new();
        let mut events = reporter.subscribe();
        reporter.on_parse_start();
        reporter.on_watcher_rerun(&[PathBuf::from("a.ts")], RERUN_TRIGGER);
        assert_eq!(events.try_recv().unwrap(), HostEvent::ParseStart);
        assert!(matches!(events.try_recv().unwrap(), HostEvent::WatcherRerun { .. }));
    }
}
