pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod monitor;
pub mod predicate;
pub mod results;
pub mod ringbuf;
pub mod source;
pub mod trigger;
pub mod worker;

pub use config::{ConfigOverrides, EncodingMode, ScanConfig, Verbosity};
pub use coordinator::{run, run_with_source, CancelHandle, Pipeline};
pub use errors::{ScanError, ScanResult};
pub use events::{CancelReason, EventSink, MatchReport, NullSink, RecordingSink, ScanEvent, WorkerRole};
pub use metrics::{PipelineMetrics, PipelineStats};
pub use predicate::{ComparisonMode, LengthPredicate};
pub use results::{RunSummary, WorkerReport};
pub use ringbuf::RingBuffer;
pub use source::{IterSource, LineReader, LineSource};
pub use trigger::Trigger;
