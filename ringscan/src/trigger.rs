//! External events that cancel a run.
//!
//! A trigger is armed before any worker starts and disarmed after every
//! worker has been joined. Both kinds run on their own thread and only
//! ever call [`Monitor::cancel`].

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{ScanError, ScanResult};
use crate::events::CancelReason;
use crate::monitor::Monitor;

/// How a run may be cancelled besides a [`CancelHandle`](crate::coordinator::CancelHandle)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// SIGINT or SIGTERM. A second signal after cancellation exits the
    /// process with status 130.
    Interrupt,
    /// A timer started when the workers are spawned
    Deadline(Duration),
    /// Nothing is armed
    Manual,
}

impl Trigger {
    /// A deadline when one is set, otherwise the interrupt signals
    pub fn from_deadline(deadline: Option<Duration>) -> Self {
        match deadline {
            Some(duration) if !duration.is_zero() => Trigger::Deadline(duration),
            _ => Trigger::Interrupt,
        }
    }

    pub(crate) fn arm(self, monitor: &Arc<Monitor>) -> ScanResult<ArmedTrigger> {
        match self {
            Trigger::Interrupt => arm_interrupt(monitor),
            Trigger::Deadline(duration) => Ok(ArmedTrigger::Deadline(DeadlineTimer::arm(
                monitor, duration,
            )?)),
            Trigger::Manual => Ok(ArmedTrigger::Manual),
        }
    }
}

pub(crate) enum ArmedTrigger {
    #[cfg(unix)]
    Interrupt(InterruptWatcher),
    Deadline(DeadlineTimer),
    Manual,
}

impl ArmedTrigger {
    /// Stops the trigger thread and waits for it
    pub(crate) fn disarm(self) {
        match self {
            #[cfg(unix)]
            ArmedTrigger::Interrupt(watcher) => watcher.disarm(),
            ArmedTrigger::Deadline(timer) => timer.disarm(),
            ArmedTrigger::Manual => {}
        }
    }
}

#[cfg(unix)]
pub(crate) struct InterruptWatcher {
    handle: signal_hook::iterator::Handle,
    forced_exit: Vec<signal_hook::SigId>,
    thread: JoinHandle<()>,
}

#[cfg(unix)]
impl InterruptWatcher {
    const SIGNALS: [std::os::raw::c_int; 2] =
        [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM];

    /// Exit status for a second signal, as shells report for SIGINT
    const FORCED_EXIT_STATUS: std::os::raw::c_int = 130;

    fn arm(monitor: &Arc<Monitor>) -> ScanResult<Self> {
        // Registered first so it runs before the iterator's handler: the
        // first signal finds the flag clear, later ones find it set.
        let mut forced_exit = Vec::with_capacity(Self::SIGNALS.len());
        for signal in Self::SIGNALS {
            match signal_hook::flag::register_conditional_shutdown(
                signal,
                Self::FORCED_EXIT_STATUS,
                monitor.cancel_flag(),
            ) {
                Ok(id) => forced_exit.push(id),
                Err(e) => {
                    unregister_all(&forced_exit);
                    return Err(ScanError::Signal(e));
                }
            }
        }

        let mut signals = match signal_hook::iterator::Signals::new(Self::SIGNALS) {
            Ok(signals) => signals,
            Err(e) => {
                unregister_all(&forced_exit);
                return Err(ScanError::Signal(e));
            }
        };
        let handle = signals.handle();

        let watched = Arc::clone(monitor);
        let spawned = thread::Builder::new()
            .name("ringscan-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    info!("Received signal {}, stopping workers", signal);
                    watched.cancel(CancelReason::Interrupt);
                }
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                handle.close();
                unregister_all(&forced_exit);
                return Err(ScanError::Signal(e));
            }
        };

        debug!("Watching SIGINT and SIGTERM");
        Ok(Self {
            handle,
            forced_exit,
            thread,
        })
    }

    fn disarm(self) {
        unregister_all(&self.forced_exit);
        self.handle.close();
        if self.thread.join().is_err() {
            warn!("Signal watcher thread panicked");
        }
        debug!("Stopped watching signals");
    }
}

#[cfg(unix)]
fn unregister_all(ids: &[signal_hook::SigId]) {
    for id in ids {
        signal_hook::low_level::unregister(*id);
    }
}

#[cfg(unix)]
fn arm_interrupt(monitor: &Arc<Monitor>) -> ScanResult<ArmedTrigger> {
    InterruptWatcher::arm(monitor).map(ArmedTrigger::Interrupt)
}

#[cfg(not(unix))]
fn arm_interrupt(_monitor: &Arc<Monitor>) -> ScanResult<ArmedTrigger> {
    warn!("Interrupt cancellation is not supported on this platform");
    Ok(ArmedTrigger::Manual)
}

pub(crate) struct DeadlineTimer {
    // Dropping the sender wakes the timer thread early
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl DeadlineTimer {
    fn arm(monitor: &Arc<Monitor>, duration: Duration) -> ScanResult<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let watched = Arc::clone(monitor);

        let thread = thread::Builder::new()
            .name("ringscan-deadline".to_string())
            .spawn(move || match stopped.recv_timeout(duration) {
                Err(RecvTimeoutError::Timeout) => {
                    info!(
                        "Deadline of {} reached",
                        humantime::format_duration(duration)
                    );
                    watched.cancel(CancelReason::Deadline);
                }
                _ => debug!("Deadline timer disarmed"),
            })
            .map_err(ScanError::IoError)?;

        debug!("Deadline set to {}", humantime::format_duration(duration));
        Ok(Self { stop, thread })
    }

    fn disarm(self) {
        drop(self.stop);
        if self.thread.join().is_err() {
            warn!("Deadline timer thread panicked");
        }
    }
}
