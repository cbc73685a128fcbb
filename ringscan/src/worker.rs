use tracing::{debug, error, trace, warn};

use crate::config::{ScanConfig, Verbosity};
use crate::errors::{ScanError, ScanResult};
use crate::events::{CancelReason, MatchReport, ScanEvent, WorkerRole};
use crate::monitor::Monitor;
use crate::predicate::LengthPredicate;
use crate::results::WorkerReport;
use crate::source::truncate_line;

/// Read-only settings every worker needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub predicate: LengthPredicate,
    pub verbosity: Verbosity,
    pub max_line_length: usize,
}

impl WorkerSettings {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            predicate: config.predicate(),
            verbosity: config.verbosity,
            max_line_length: config.max_line_length,
        }
    }

    /// Emits an event that only full verbosity reports
    fn trace_event(&self, monitor: &Monitor, event: ScanEvent) {
        if self.verbosity.is_full() {
            monitor.emit(event);
        }
    }
}

/// Moves lines from the source into the buffer until the source runs dry
/// or the run is cancelled.
///
/// The source is read while the buffer lock is held, so reads from all
/// producers are serialized and each line is inserted by the producer that
/// read it.
pub fn run_producer(monitor: &Monitor, settings: &WorkerSettings, id: usize) -> ScanResult<WorkerReport> {
    let role = WorkerRole::Producer;
    let mut report = WorkerReport::new(role, id);
    settings.trace_event(monitor, ScanEvent::WorkerStarted { role, id });
    debug!("Producer {} started", id);

    let outcome = loop {
        let Some(mut shared) = monitor.acquire_space() else {
            break Ok(());
        };

        let mut line = match shared.source.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Producer {} reached the end of the source", id);
                shared.ring.mark_exhausted();
                drop(shared);
                monitor.notify_exhausted();
                break Ok(());
            }
            Err(e) => {
                error!("Producer {} failed to read the source: {}", id, e);
                // Stop the other producers and let consumers drain what is buffered
                shared.ring.mark_exhausted();
                drop(shared);
                monitor.notify_exhausted();
                break Err(e);
            }
        };
        monitor.metrics().record_line_read();

        let cut_by_source = shared.source.last_line_cut();
        if truncate_line(&mut line, settings.max_line_length) || cut_by_source {
            let total = monitor.metrics().record_truncation();
            if total == 1 {
                warn!(
                    "Lines longer than {} bytes are being truncated",
                    settings.max_line_length
                );
            }
        }

        settings.trace_event(
            monitor,
            ScanEvent::Produced {
                producer: id,
                slot: shared.ring.insert_cursor(),
            },
        );
        match shared.ring.try_insert(line) {
            Ok(slot) => trace!("Producer {} filled slot {}", id, slot),
            Err(_) => {
                drop(shared);
                error!("Producer {} was handed a full buffer, stopping the run", id);
                monitor.cancel(CancelReason::Requested);
                break Err(ScanError::invariant("producer acquired a full buffer"));
            }
        }
        report.items += 1;

        drop(shared);
        monitor.notify_item_available();
    };

    settings.trace_event(monitor, ScanEvent::WorkerFinished { role, id });
    debug!("Producer {} finished after {} lines", id, report.items);
    outcome.map(|()| report)
}

/// Removes lines from the buffer and reports the ones matching the predicate,
/// until the buffer is drained after exhaustion or the run is cancelled.
pub fn run_consumer(monitor: &Monitor, settings: &WorkerSettings, id: usize) -> ScanResult<WorkerReport> {
    let role = WorkerRole::Consumer;
    let mut report = WorkerReport::new(role, id);
    settings.trace_event(monitor, ScanEvent::WorkerStarted { role, id });
    debug!("Consumer {} started", id);

    let outcome = loop {
        let Some(mut shared) = monitor.acquire_item() else {
            break Ok(());
        };
        settings.trace_event(
            monitor,
            ScanEvent::Consuming {
                consumer: id,
                slot: shared.ring.remove_cursor(),
            },
        );
        let Ok((slot, line)) = shared.ring.try_remove() else {
            drop(shared);
            error!("Consumer {} was handed an empty buffer, stopping the run", id);
            monitor.cancel(CancelReason::Requested);
            break Err(ScanError::invariant("consumer acquired an empty buffer"));
        };

        let matched = settings.predicate.matches(&line);
        monitor.metrics().record_consumed(matched);
        report.items += 1;
        if matched {
            report.matches += 1;
            // Emitted under the lock so match output never interleaves
            monitor.emit(ScanEvent::Matched(MatchReport {
                slot,
                consumer: id,
                line,
            }));
        }

        drop(shared);
        monitor.notify_space_available();
    };

    settings.trace_event(monitor, ScanEvent::WorkerFinished { role, id });
    debug!(
        "Consumer {} finished after {} lines, {} matched",
        id, report.items, report.matches
    );
    outcome.map(|()| report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSink, NullSink, RecordingSink};
    use crate::predicate::ComparisonMode;
    use crate::ringbuf::RingBuffer;
    use crate::source::{IterSource, LineReader, LineSource};
    use std::sync::Arc;

    fn settings(threshold: usize, mode: ComparisonMode, verbosity: Verbosity) -> WorkerSettings {
        WorkerSettings {
            predicate: LengthPredicate::new(threshold, mode),
            verbosity,
            max_line_length: 512,
        }
    }

    fn monitor(capacity: usize, source: impl LineSource + 'static, sink: Arc<dyn EventSink>) -> Monitor {
        Monitor::new(RingBuffer::new(capacity).unwrap(), Box::new(source), sink)
    }

    fn lines(items: &[&str]) -> IterSource<std::vec::IntoIter<String>> {
        IterSource::new(items.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_producer_fills_until_full_then_consumer_drains() {
        // A lone producer blocks once the buffer is full, so leave room for
        // every line plus the read that finds the end of the source
        let sink = Arc::new(RecordingSink::new());
        let monitor = monitor(5, lines(&["ab", "abcdef", "abc"]), sink.clone());
        let settings = settings(3, ComparisonMode::GreaterThan, Verbosity::Simplified);

        let produced = run_producer(&monitor, &settings, 0).unwrap();
        assert_eq!(produced.items, 3);
        assert!(monitor.lock().ring.is_exhausted());

        let consumed = run_consumer(&monitor, &settings, 0).unwrap();
        assert_eq!(consumed.items, 3);
        assert_eq!(consumed.matches, 1);

        let matches = sink.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line, "abcdef");
        assert_eq!(matches[0].slot, 1);
    }

    #[test]
    fn test_full_verbosity_traces_slots() {
        let sink = Arc::new(RecordingSink::new());
        let monitor = monitor(3, lines(&["abc"]), sink.clone());
        let settings = settings(3, ComparisonMode::Equal, Verbosity::Full);

        run_producer(&monitor, &settings, 7).unwrap();
        run_consumer(&monitor, &settings, 2).unwrap();

        let events = sink.events();
        assert_eq!(
            events,
            vec![
                ScanEvent::WorkerStarted {
                    role: WorkerRole::Producer,
                    id: 7
                },
                ScanEvent::Produced { producer: 7, slot: 0 },
                ScanEvent::WorkerFinished {
                    role: WorkerRole::Producer,
                    id: 7
                },
                ScanEvent::WorkerStarted {
                    role: WorkerRole::Consumer,
                    id: 2
                },
                ScanEvent::Consuming { consumer: 2, slot: 0 },
                ScanEvent::Matched(MatchReport {
                    slot: 0,
                    consumer: 2,
                    line: "abc".to_string()
                }),
                ScanEvent::WorkerFinished {
                    role: WorkerRole::Consumer,
                    id: 2
                },
            ]
        );
    }

    #[test]
    fn test_simplified_verbosity_reports_only_matches() {
        let sink = Arc::new(RecordingSink::new());
        let monitor = monitor(4, lines(&["a", "abcd"]), sink.clone());
        let settings = settings(2, ComparisonMode::LessThan, Verbosity::Simplified);

        run_producer(&monitor, &settings, 0).unwrap();
        run_consumer(&monitor, &settings, 0).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ScanEvent::Matched(m) if m.line == "a"));
    }

    #[test]
    fn test_producer_truncates_long_lines() {
        let sink = Arc::new(RecordingSink::new());
        let monitor = monitor(3, lines(&["abcdefgh"]), sink.clone());
        let mut settings = settings(4, ComparisonMode::Equal, Verbosity::Simplified);
        settings.max_line_length = 4;

        run_producer(&monitor, &settings, 0).unwrap();
        run_consumer(&monitor, &settings, 0).unwrap();

        assert_eq!(sink.matches()[0].line, "abcd");
        assert_eq!(monitor.metrics().get_stats().lines_truncated, 1);
    }

    #[test]
    fn test_producer_counts_lines_cut_by_source() {
        let sink = Arc::new(RecordingSink::new());
        let reader = LineReader::new(
            std::io::Cursor::new(b"abcdefgh\n".to_vec()),
            crate::config::EncodingMode::FailFast,
        )
        .with_max_line_length(3);
        let monitor = monitor(5, reader, sink.clone());
        let settings = settings(0, ComparisonMode::GreaterThan, Verbosity::Simplified);

        assert_eq!(run_producer(&monitor, &settings, 0).unwrap().items, 3);
        run_consumer(&monitor, &settings, 0).unwrap();

        let seen: Vec<String> = sink.matches().into_iter().map(|m| m.line).collect();
        assert_eq!(seen, vec!["abc", "def", "gh"]);
        assert_eq!(monitor.metrics().get_stats().lines_truncated, 2);
    }

    #[test]
    fn test_producer_read_error_exhausts_buffer() {
        struct Failing {
            served: bool,
        }
        impl LineSource for Failing {
            fn next_line(&mut self) -> ScanResult<Option<String>> {
                if self.served {
                    Err(ScanError::config_error("disk went away"))
                } else {
                    self.served = true;
                    Ok(Some("first".to_string()))
                }
            }
        }

        let monitor = monitor(4, Failing { served: false }, Arc::new(NullSink));
        let settings = settings(5, ComparisonMode::Equal, Verbosity::Simplified);

        let err = run_producer(&monitor, &settings, 0).unwrap_err();
        assert!(matches!(err, ScanError::ConfigError(_)));
        assert!(monitor.lock().ring.is_exhausted());

        // The line read before the failure is still delivered
        let consumed = run_consumer(&monitor, &settings, 0).unwrap();
        assert_eq!(consumed.matches, 1);
    }

    #[test]
    fn test_cancelled_workers_exit_immediately() {
        let monitor = monitor(3, lines(&["abc", "abc"]), Arc::new(NullSink));
        let settings = settings(3, ComparisonMode::Equal, Verbosity::Simplified);
        monitor.cancel(crate::events::CancelReason::Requested);

        assert_eq!(run_producer(&monitor, &settings, 0).unwrap().items, 0);
        assert_eq!(run_consumer(&monitor, &settings, 0).unwrap().items, 0);
        assert_eq!(monitor.metrics().get_stats().lines_read, 0);
    }
}
