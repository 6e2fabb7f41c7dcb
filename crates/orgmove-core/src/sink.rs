//! Progress sink: ordered, timestamped event log with live fan-out.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::domain::{EventDraft, ProgressEvent, Severity};

/// Buffered events per subscriber before a slow reader starts lagging.
const SUBSCRIBER_CAPACITY: usize = 256;

/// Append-only progress log shared by the components of one run.
///
/// Cloning yields another handle to the same log. Each append is atomic:
/// `seq` assignment, storage and broadcast happen under one lock, so
/// subscribers observe events in log order.
#[derive(Clone)]
pub struct ProgressSink {
    inner: Arc<Inner>,
}

struct Inner {
    label: String,
    log: Mutex<Vec<ProgressEvent>>,
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressSink {
    /// `label` tags the tracing mirror of every event (usually the short plan digest).
    pub fn new(label: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                log: Mutex::new(Vec::new()),
                tx,
            }),
        }
    }

    /// Append an event and return the stored copy.
    pub fn emit(&self, draft: EventDraft) -> ProgressEvent {
        let mut log = self.inner.log.lock().unwrap_or_else(|e| e.into_inner());
        let event = ProgressEvent {
            seq: log.len() as u64,
            timestamp: Utc::now(),
            severity: draft.severity,
            message: draft.message,
            stage: draft.stage,
            serial: draft.serial,
            operator_override: draft.operator_override,
        };
        mirror(&self.inner.label, &event);
        log.push(event.clone());
        // No subscribers is fine.
        let _ = self.inner.tx.send(event.clone());
        event
    }

    pub fn info(&self, message: impl Into<String>) -> ProgressEvent {
        self.emit(EventDraft::info(message))
    }

    pub fn warn(&self, message: impl Into<String>) -> ProgressEvent {
        self.emit(EventDraft::warn(message))
    }

    pub fn error(&self, message: impl Into<String>) -> ProgressEvent {
        self.emit(EventDraft::error(message))
    }

    /// Snapshot of the log so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.inner
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.log.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every event appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.tx.subscribe()
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("label", &self.inner.label)
            .field("len", &self.len())
            .finish()
    }
}

fn mirror(label: &str, event: &ProgressEvent) {
    let stage = event.stage.map(|s| s.index());
    let serial = event.serial.as_deref();
    match event.severity {
        Severity::Info => tracing::info!(
            plan_id = label,
            seq = event.seq,
            stage,
            serial,
            operator_override = event.operator_override,
            "{}",
            event.message
        ),
        Severity::Warn => tracing::warn!(
            plan_id = label,
            seq = event.seq,
            stage,
            serial,
            operator_override = event.operator_override,
            "{}",
            event.message
        ),
        Severity::Error => tracing::error!(
            plan_id = label,
            seq = event.seq,
            stage,
            serial,
            operator_override = event.operator_override,
            "{}",
            event.message
        ),
    }
}
