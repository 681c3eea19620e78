//! Work items, notification payloads and the notification sink

use serde::Serialize;
use tokio::sync::mpsc;

use crate::slots::SlotState;

/// Expected content checksum of a work item, exactly as stored.
/// Decoded when a request is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedDigest {
    pub algorithm: String,
    pub hex: String,
}

impl ExpectedDigest {
    pub fn new(algorithm: impl Into<String>, hex: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            hex: hex.into(),
        }
    }
}

/// One file to materialize under the install root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Unique key; also the relative destination path and the source URL suffix
    pub path: String,
    pub size: u64,
    pub digest: ExpectedDigest,
    /// Failed attempts so far in this run
    pub retry_count: u32,
}

impl WorkItem {
    pub fn new(path: impl Into<String>, size: u64, digest: ExpectedDigest) -> Self {
        Self {
            path: path.into(),
            size,
            digest,
            retry_count: 0,
        }
    }
}

/// Empty directory that must exist after the mirror completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyDir {
    pub path: String,
}

/// Immutable description of the mirrored set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overview {
    pub name: String,
    pub total_files: u64,
    pub total_size: u64,
    pub base_url: String,
}

/// Aggregate counters snapshot for the operator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunProgress {
    pub downloaded_size: u64,
    pub downloaded_files: u64,
    pub failed_files: u64,
    pub total_files: u64,
    pub total_size: u64,
    pub speed_bytes_per_sec: f64,
    pub overall_progress: f64,
}

/// Notifications emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    SlotChanged {
        index: usize,
        slot: SlotState,
    },
    Progress(RunProgress),
    Speed {
        bytes_per_sec: f64,
    },
    ItemFailed {
        path: String,
        error: String,
        permanent: bool,
    },
    StorageFailure {
        message: String,
    },
    StateChanged {
        running: bool,
    },
    Finished {
        failures: u64,
    },
}

/// Consumer of engine notifications
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: EngineEvent);
}

impl EventSink for mpsc::UnboundedSender<EngineEvent> {
    fn emit(&self, event: EngineEvent) {
        // A dropped receiver means nobody is listening any more
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_sender_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(EngineEvent::Finished { failures: 2 });
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Finished { failures: 2 });
    }

    #[test]
    fn emitting_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel::<EngineEvent>();
        drop(rx);
        tx.emit(EngineEvent::StateChanged { running: false });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(EngineEvent::Finished { failures: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "finished", "failures": 3}));

        let json = serde_json::to_value(EngineEvent::Speed {
            bytes_per_sec: 2048.0,
        })
        .unwrap();
        assert_eq!(json["type"], "speed");
        assert_eq!(json["bytes_per_sec"], 2048.0);
    }
}
