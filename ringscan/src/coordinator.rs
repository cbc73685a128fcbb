//! Spawns the worker pools around one shared buffer and collects the outcome.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ScanConfig;
use crate::errors::{ScanError, ScanResult};
use crate::events::{CancelReason, EventSink, WorkerRole};
use crate::monitor::Monitor;
use crate::results::{RunSummary, WorkerReport};
use crate::ringbuf::RingBuffer;
use crate::source::{self, LineSource};
use crate::trigger::Trigger;
use crate::worker::{run_consumer, run_producer, WorkerSettings};

/// Runs a scan over `config.source_path`.
///
/// The run is cancelled after `config.deadline()` if one is set, otherwise
/// on SIGINT or SIGTERM.
pub fn run(config: &ScanConfig, sink: Arc<dyn EventSink>) -> ScanResult<RunSummary> {
    config.validate()?;
    info!("Scanning {}", config.source_path.display());
    let reader = source::open(&config.source_path, config.encoding, config.max_line_length)?;
    run_with_source(config, Box::new(reader), sink, Trigger::from_deadline(config.deadline()))
}

/// Runs a scan over an arbitrary source, ignoring `config.source_path`
pub fn run_with_source(
    config: &ScanConfig,
    source: Box<dyn LineSource>,
    sink: Arc<dyn EventSink>,
    trigger: Trigger,
) -> ScanResult<RunSummary> {
    Pipeline::new(config, source, sink)?.run(trigger)
}

/// A configured run that has not started yet
#[derive(Debug)]
pub struct Pipeline {
    monitor: Arc<Monitor>,
    settings: WorkerSettings,
    producer_count: usize,
    consumer_count: usize,
}

/// Cancels a running [`Pipeline`] from any thread
#[derive(Debug, Clone)]
pub struct CancelHandle {
    monitor: Arc<Monitor>,
}

impl CancelHandle {
    /// Returns false if the run was already cancelled
    pub fn cancel(&self) -> bool {
        self.monitor.cancel(CancelReason::Requested)
    }

    pub fn is_cancelled(&self) -> bool {
        self.monitor.is_cancelled()
    }
}

struct Worker {
    role: WorkerRole,
    index: usize,
    handle: JoinHandle<ScanResult<WorkerReport>>,
}

/// Cancels the run if a worker unwinds, so its peers do not wait forever
struct CancelOnPanic<'a>(&'a Monitor);

impl Drop for CancelOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.cancel(CancelReason::Requested);
        }
    }
}

impl Pipeline {
    pub fn new(config: &ScanConfig, source: Box<dyn LineSource>, sink: Arc<dyn EventSink>) -> ScanResult<Self> {
        config.validate()?;
        let ring = RingBuffer::new(config.capacity)?;

        Ok(Self {
            monitor: Arc::new(Monitor::new(ring, source, sink)),
            settings: WorkerSettings::from_config(config),
            producer_count: config.producer_count.get(),
            consumer_count: config.consumer_count.get(),
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            monitor: Arc::clone(&self.monitor),
        }
    }

    /// Runs every worker to completion and reports what happened.
    ///
    /// Returns an error if a worker could not be spawned, failed to read
    /// the source, or panicked. Cancellation is not an error.
    pub fn run(self, trigger: Trigger) -> ScanResult<RunSummary> {
        let start = Instant::now();
        info!(
            "Starting {} producers and {} consumers, matching {}",
            self.producer_count, self.consumer_count, self.settings.predicate
        );

        let armed = trigger.arm(&self.monitor)?;
        let (workers, spawn_error) = self.spawn_workers();
        let (reports, worker_error) = join_workers(workers);
        armed.disarm();

        self.monitor.metrics().log_stats();
        if let Some(e) = spawn_error.or(worker_error) {
            return Err(e);
        }

        let summary = RunSummary {
            stats: self.monitor.metrics().get_stats(),
            left_in_buffer: self.monitor.buffered(),
            cancelled: self.monitor.cancel_reason(),
            elapsed: start.elapsed(),
            workers: reports,
        };
        info!(
            "Run finished in {}",
            humantime::format_duration(summary.elapsed)
        );
        Ok(summary)
    }

    /// Spawns producers then consumers. On the first failure the run is
    /// cancelled and the workers already running are returned for joining.
    fn spawn_workers(&self) -> (Vec<Worker>, Option<ScanError>) {
        let plan = (0..self.producer_count)
            .map(|index| (WorkerRole::Producer, index))
            .chain((0..self.consumer_count).map(|index| (WorkerRole::Consumer, index)));

        let mut workers = Vec::with_capacity(self.producer_count + self.consumer_count);
        for (role, index) in plan {
            match self.spawn_worker(role, index) {
                Ok(handle) => workers.push(Worker {
                    role,
                    index,
                    handle,
                }),
                Err(e) => {
                    error!("Failed to spawn {} {}: {}", role, index, e);
                    self.monitor.cancel(CancelReason::Requested);
                    return (workers, Some(ScanError::spawn(role, index, e)));
                }
            }
        }
        debug!("Spawned {} workers", workers.len());
        (workers, None)
    }

    fn spawn_worker(
        &self,
        role: WorkerRole,
        index: usize,
    ) -> std::io::Result<JoinHandle<ScanResult<WorkerReport>>> {
        let monitor = Arc::clone(&self.monitor);
        let settings = self.settings;

        thread::Builder::new()
            .name(format!("{}-{}", role, index))
            .spawn(move || {
                let _guard = CancelOnPanic(&monitor);
                match role {
                    WorkerRole::Producer => run_producer(&monitor, &settings, index),
                    WorkerRole::Consumer => run_consumer(&monitor, &settings, index),
                }
            })
    }
}

/// Joins every worker. The first failure in join order is returned;
/// later ones are only logged.
fn join_workers(workers: Vec<Worker>) -> (Vec<WorkerReport>, Option<ScanError>) {
    let mut reports = Vec::with_capacity(workers.len());
    let mut first_error = None;

    for worker in workers {
        let failure = match worker.handle.join() {
            Ok(Ok(report)) => {
                reports.push(report);
                continue;
            }
            Ok(Err(e)) => e,
            Err(_) => {
                error!("{} {} panicked", worker.role, worker.index);
                ScanError::worker_panicked(worker.role, worker.index)
            }
        };

        if first_error.is_none() {
            first_error = Some(failure);
        } else {
            warn!("Additional worker failure: {}", failure);
        }
    }
    (reports, first_error)
}
