//! Blocking protocol around the shared ring buffer.
//!
//! One mutex guards the ring buffer and the line source. Two condition
//! variables carry the wakeups:
//!
//! - `space_available`: producers park here while every usable slot is taken
//! - `item_available`: consumers park here while the buffer is empty and the
//!   source is not yet exhausted
//!
//! Every wait re-checks its predicate in a loop, so spurious wakeups are
//! harmless. Cancellation is stored before the lock is taken to notify, so a
//! worker that checked the flag just before parking is still woken.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

use crate::events::{CancelReason, EventSink, ScanEvent};
use crate::metrics::PipelineMetrics;
use crate::ringbuf::RingBuffer;
use crate::source::LineSource;

/// State only touched while holding the monitor lock
pub struct Shared {
    pub ring: RingBuffer<String>,
    pub source: Box<dyn LineSource>,
}

pub struct Monitor {
    state: Mutex<Shared>,
    space_available: Condvar,
    item_available: Condvar,
    cancelled: Arc<AtomicBool>,
    cancel_reason: OnceCell<CancelReason>,
    sink: Arc<dyn EventSink>,
    metrics: PipelineMetrics,
}

impl Monitor {
    pub fn new(ring: RingBuffer<String>, source: Box<dyn LineSource>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(Shared { ring, source }),
            space_available: Condvar::new(),
            item_available: Condvar::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_reason: OnceCell::new(),
            sink,
            metrics: PipelineMetrics::new(),
        }
    }

    /// Locks the shared state.
    ///
    /// A poisoned lock is recovered: the ring buffer's invariants hold between
    /// primitive calls, and the panicking worker is reported through its join.
    pub fn lock(&self) -> MutexGuard<'_, Shared> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until a slot is free.
    ///
    /// Returns `None` when the producer should stop instead: the run was
    /// cancelled or some producer already reached the end of the source.
    pub fn acquire_space(&self) -> Option<MutexGuard<'_, Shared>> {
        let mut shared = self.lock();
        while shared.ring.is_full() && !shared.ring.is_exhausted() && !self.is_cancelled() {
            self.metrics.record_producer_wait();
            trace!("buffer full, producer waiting");
            shared = self
                .space_available
                .wait(shared)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if self.is_cancelled() || shared.ring.is_exhausted() {
            return None;
        }
        Some(shared)
    }

    /// Blocks until an item is buffered.
    ///
    /// Returns `None` when the consumer should stop: the run was cancelled,
    /// or the source is exhausted and the buffer drained.
    pub fn acquire_item(&self) -> Option<MutexGuard<'_, Shared>> {
        let mut shared = self.lock();
        while shared.ring.is_empty() && !shared.ring.is_exhausted() && !self.is_cancelled() {
            self.metrics.record_consumer_wait();
            trace!("buffer empty, consumer waiting");
            shared = self
                .item_available
                .wait(shared)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if self.is_cancelled() || shared.ring.is_drained_and_exhausted() {
            return None;
        }
        Some(shared)
    }

    /// Wakes one consumer after an insert
    pub fn notify_item_available(&self) {
        self.item_available.notify_one();
    }

    /// Wakes one producer after a removal
    pub fn notify_space_available(&self) {
        self.space_available.notify_one();
    }

    /// Wakes every waiter so they can observe exhaustion
    pub fn notify_exhausted(&self) {
        self.space_available.notify_all();
        self.item_available.notify_all();
    }

    /// Requests that every worker stop at its next check point.
    ///
    /// Only the first call has an effect; it returns true.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.cancel_reason.set(reason);
        info!("Cancelling all workers ({})", reason);
        self.sink.emit(ScanEvent::Cancelled(reason));

        // Taking the lock orders this notify after any waiter's flag check
        let _shared = self.lock();
        self.space_available.notify_all();
        self.item_available.notify_all();
        debug!("Woke all waiters for cancellation");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason.get().copied()
    }

    /// The raw flag, for signal handlers that must not take locks
    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn emit(&self, event: ScanEvent) {
        self.sink.emit(event);
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Items currently sitting in the buffer
    pub fn buffered(&self) -> usize {
        self.lock().ring.len()
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("cancelled", &self.is_cancelled())
            .field("cancel_reason", &self.cancel_reason())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}
