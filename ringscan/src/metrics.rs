use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Counters shared by every worker of a run
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    lines_read: AtomicU64,
    items_consumed: AtomicU64,
    matches: AtomicU64,
    lines_truncated: AtomicU64,

    // Times a worker parked on a condition variable
    producer_waits: AtomicU64,
    consumer_waits: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a line taken from the source
    pub fn record_line_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a line removed from the buffer, and whether it matched
    pub fn record_consumed(&self, matched: bool) {
        self.items_consumed.fetch_add(1, Ordering::Relaxed);
        if matched {
            self.matches.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a line cut to the length limit. Returns the running total.
    pub fn record_truncation(&self) -> u64 {
        let total = self.lines_truncated.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Cut a line at the length limit, {} so far", total);
        total
    }

    /// Records a producer blocking on a full buffer
    pub fn record_producer_wait(&self) {
        self.producer_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a consumer blocking on an empty buffer
    pub fn record_consumer_wait(&self) {
        self.consumer_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> PipelineStats {
        PipelineStats {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            items_consumed: self.items_consumed.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            lines_truncated: self.lines_truncated.load(Ordering::Relaxed),
            producer_waits: self.producer_waits.load(Ordering::Relaxed),
            consumer_waits: self.consumer_waits.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Pipeline stats:\n\
             Lines read: {}\n\
             Items consumed: {}\n\
             Matches: {}\n\
             Lines truncated: {}\n\
             Waits (producer full/consumer empty): {}/{}",
            stats.lines_read,
            stats.items_consumed,
            stats.matches,
            stats.lines_truncated,
            stats.producer_waits,
            stats.consumer_waits
        );
    }
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub lines_read: u64,
    pub items_consumed: u64,
    pub matches: u64,
    pub lines_truncated: u64,
    pub producer_waits: u64,
    pub consumer_waits: u64,
}
