use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Which pool a worker belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    Producer,
    Consumer,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Producer => write!(f, "producer"),
            WorkerRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// Why a run stopped before the source was drained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelReason {
    /// SIGINT or SIGTERM was delivered
    Interrupt,
    /// The configured run duration elapsed
    Deadline,
    /// Cancelled through a [`CancelHandle`](crate::coordinator::CancelHandle)
    /// or because a worker could not be started
    Requested,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Interrupt => write!(f, "interrupt"),
            CancelReason::Deadline => write!(f, "deadline"),
            CancelReason::Requested => write!(f, "requested"),
        }
    }
}

/// A consumed line that satisfied the length predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    /// Slot the line occupied in the ring buffer
    pub slot: usize,
    /// Consumer that removed the line
    pub consumer: usize,
    /// The matched text
    pub line: String,
}

/// Observable progress of a run.
///
/// Slot and lifecycle events are only emitted in full verbosity; matches and
/// cancellation are always emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    WorkerStarted { role: WorkerRole, id: usize },
    WorkerFinished { role: WorkerRole, id: usize },
    /// A producer is about to fill `slot`
    Produced { producer: usize, slot: usize },
    /// A consumer is about to empty `slot`
    Consuming { consumer: usize, slot: usize },
    Matched(MatchReport),
    Cancelled(CancelReason),
}

/// Receives events from every worker thread.
///
/// Slot events are emitted while the buffer lock is held, so implementations
/// must not block for long and must never call back into the pipeline.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ScanEvent);
}

impl<F> EventSink for F
where
    F: Fn(ScanEvent) + Send + Sync,
{
    fn emit(&self, event: ScanEvent) {
        self(event)
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ScanEvent) {}
}

/// Keeps every event in emission order
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ScanEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> Vec<ScanEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Matched reports, in the order consumers emitted them
    pub fn matches(&self) -> Vec<MatchReport> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|event| match event {
                ScanEvent::Matched(report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ScanEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
