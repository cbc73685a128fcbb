use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::errors::ScanResult;
use crate::events::{CancelReason, WorkerRole};
use crate::metrics::PipelineStats;

/// What a single worker did before it exited
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub role: WorkerRole,
    pub id: usize,
    /// Lines inserted (producers) or removed (consumers)
    pub items: u64,
    /// Lines that satisfied the predicate; always 0 for producers
    pub matches: u64,
}

impl WorkerReport {
    pub fn new(role: WorkerRole, id: usize) -> Self {
        Self {
            role,
            id,
            items: 0,
            matches: 0,
        }
    }
}

/// Outcome of a run that finished without an error.
///
/// Every line read was either consumed or is counted in `left_in_buffer`,
/// which can only be non-zero for a cancelled run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stats: PipelineStats,
    pub left_in_buffer: usize,
    /// Set when the run stopped before the source was drained
    pub cancelled: Option<CancelReason>,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    /// Producers first, then consumers, each in id order
    pub workers: Vec<WorkerReport>,
}

impl RunSummary {
    /// True when the source was read to its end and fully drained
    pub fn is_complete(&self) -> bool {
        self.cancelled.is_none()
    }

    pub fn producers(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers
            .iter()
            .filter(|w| w.role == WorkerRole::Producer)
    }

    pub fn consumers(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers
            .iter()
            .filter(|w| w.role == WorkerRole::Consumer)
    }

    pub fn to_json(&self) -> ScanResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Read {} lines, consumed {}, {} matched, {} left in buffer in {}",
            self.stats.lines_read,
            self.stats.items_consumed,
            self.stats.matches,
            self.left_in_buffer,
            humantime::format_duration(self.elapsed)
        )?;
        if let Some(reason) = self.cancelled {
            write!(f, " (cancelled: {})", reason)?;
        }
        Ok(())
    }
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*duration))
}
