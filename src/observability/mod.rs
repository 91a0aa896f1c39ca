//! Metrics collection and structured session logging.

mod metrics;
mod session_log;

pub use metrics::{
    CommentEvent, CommentHandle, Counters, EventLog, MetricsExport, MetricsSummary, RealtimeStats,
    SpeakEvent, ViewerDelta, ViewerSample, DEFAULT_SALE_PHRASES,
};
pub use session_log::{LogCategory, SessionLog};

#[cfg(test)]
mod metrics_tests;
