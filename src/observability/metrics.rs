//! Event Log & Metrics
//!
//! Append-only bounded rings of speak/comment/viewer events plus monotonic
//! session counters. This is the only shared mutable state in the core: every
//! mutator takes the single internal lock for the duration of one append or
//! one snapshot, so background exporters see a consistent view of the hot
//! path's writes.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::clock::{Seconds, SharedClock};
use crate::models::{Intent, Reason};
use crate::state_machine::SalePhase;

const SPEAK_CAPACITY: usize = 1_000;
const COMMENT_CAPACITY: usize = 5_000;
const VIEWER_CAPACITY: usize = 1_000;

/// Default commercial keywords tracked as a quality metric. Configurable;
/// matching is case-insensitive substring.
pub const DEFAULT_SALE_PHRASES: &[&str] = &[
    "mua ngay",
    "đặt hàng",
    "giá",
    "khuyến mãi",
    "giảm giá",
    "flash sale",
    "số lượng có hạn",
    "link",
    "inbox",
    "dm",
];

/// Record of one host utterance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeakEvent {
    pub timestamp: Seconds,
    pub response_text: String,
    /// Audio duration, if the TTS stage reported one.
    pub duration: Seconds,
    pub intent: Intent,
    pub sale_phase: SalePhase,
    pub viewer_count: u64,
    pub priority: u8,
    pub reason: Reason,
    /// Interval since the previous speak; 0 for the session's first.
    pub time_since_last: Seconds,
}

/// Record of one inbound comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentEvent {
    pub seq: u64,
    pub timestamp: Seconds,
    pub username: String,
    pub text: String,
    pub intent: Intent,
    pub was_responded: bool,
    pub response_latency: Seconds,
}

/// Periodic viewer-count sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ViewerSample {
    pub timestamp: Seconds,
    pub count: u64,
}

/// Monotonic session counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Counters {
    pub total_speaks: u64,
    pub total_comments: u64,
    pub responded_comments: u64,
    pub sale_phrases: u64,
}

/// Handle returned by `record_comment`, used to mark the comment responded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentHandle(u64);

/// Windowed aggregation over recent events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub period_start: Seconds,
    pub period_end: Seconds,

    pub total_speaks: usize,
    pub avg_speak_interval: Seconds,
    pub min_speak_interval: Seconds,
    pub max_speak_interval: Seconds,
    pub std_speak_interval: Seconds,
    pub speak_interval_count: usize,

    pub total_comments: usize,
    pub responded_comments: usize,
    pub response_rate: f64,
    pub avg_response_latency: Seconds,

    pub sale_phrase_count: usize,
    pub sale_phrase_rate: f64,

    pub avg_viewer_count: f64,
    pub min_viewer_count: u64,
    pub max_viewer_count: u64,
}

/// Instantaneous counters for dashboards and the session-end summary.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeStats {
    pub uptime: Seconds,
    pub total_speaks: u64,
    pub total_comments: u64,
    pub response_rate: f64,
    pub sale_phrase_rate: f64,
    pub current_viewers: u64,
    pub time_since_speak: Seconds,
}

/// Viewer movement right after one speak.
#[derive(Debug, Clone, Serialize)]
pub struct ViewerDelta {
    pub speak_time: Seconds,
    pub intent: Intent,
    pub viewer_before: u64,
    pub viewer_after: u64,
    pub delta: i64,
}

/// On-disk snapshot shape; re-reading one yields the same counters and the
/// same event sequences in order.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsExport {
    pub session_start: Seconds,
    pub export_time: Seconds,
    pub counters: Counters,
    pub speak_events: Vec<SpeakEvent>,
    pub comment_events: Vec<CommentEvent>,
    pub viewer_history: Vec<ViewerSample>,
    pub summary: MetricsSummary,
}

#[derive(Default)]
struct Inner {
    speak_events: std::collections::VecDeque<SpeakEvent>,
    comment_events: std::collections::VecDeque<CommentEvent>,
    viewer_history: std::collections::VecDeque<ViewerSample>,
    counters: Counters,
    session_start: Seconds,
    /// 0.0 until the first speak; `time_since_last` is 0 for that one.
    last_speak_time: Seconds,
    next_comment_seq: u64,
}

pub struct EventLog {
    clock: SharedClock,
    sale_phrases: Vec<String>,
    inner: Mutex<Inner>,
}

impl EventLog {
    pub fn new(clock: SharedClock, sale_phrases: Vec<String>) -> Self {
        let session_start = clock.now();
        let sale_phrases = sale_phrases
            .into_iter()
            .map(|phrase| phrase.to_lowercase())
            .collect();
        Self {
            clock,
            sale_phrases,
            inner: Mutex::new(Inner {
                session_start,
                ..Inner::default()
            }),
        }
    }

    pub fn with_default_phrases(clock: SharedClock) -> Self {
        Self::new(
            clock,
            DEFAULT_SALE_PHRASES.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Append a comment event; the handle lets the orchestrator flip its
    /// responded flag later.
    pub fn record_comment(&self, username: &str, text: &str, intent: Intent) -> CommentHandle {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let seq = inner.next_comment_seq;
        inner.next_comment_seq += 1;
        push_bounded(
            &mut inner.comment_events,
            COMMENT_CAPACITY,
            CommentEvent {
                seq,
                timestamp: now,
                username: username.to_string(),
                text: text.to_string(),
                intent,
                was_responded: false,
                response_latency: 0.0,
            },
        );
        inner.counters.total_comments += 1;

        CommentHandle(seq)
    }

    /// Flip a comment to responded. A comment surfaces as responded at most
    /// once: repeats are ignored and never double-count the counter.
    pub fn mark_responded(&self, handle: CommentHandle, latency: Seconds) {
        let mut inner = self.inner.lock();

        let front_seq = match inner.comment_events.front() {
            Some(front) => front.seq,
            None => return,
        };
        let Some(index) = handle.0.checked_sub(front_seq) else {
            // Already evicted from the ring
            return;
        };
        let Some(event) = inner.comment_events.get_mut(index as usize) else {
            return;
        };
        if event.was_responded {
            return;
        }
        event.was_responded = true;
        event.response_latency = latency;
        inner.counters.responded_comments += 1;
    }

    /// Append a speak event and advance the speak counters.
    #[allow(clippy::too_many_arguments)]
    pub fn record_speak(
        &self,
        text: &str,
        duration: Seconds,
        intent: Intent,
        sale_phase: SalePhase,
        viewer_count: u64,
        priority: u8,
        reason: Reason,
    ) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let time_since_last = if inner.counters.total_speaks > 0 {
            now - inner.last_speak_time
        } else {
            0.0
        };

        push_bounded(
            &mut inner.speak_events,
            SPEAK_CAPACITY,
            SpeakEvent {
                timestamp: now,
                response_text: text.to_string(),
                duration,
                intent,
                sale_phase,
                viewer_count,
                priority,
                reason,
                time_since_last,
            },
        );
        inner.counters.total_speaks += 1;
        if self.is_sale_phrase(text) {
            inner.counters.sale_phrases += 1;
        }
        inner.last_speak_time = now;
        drop(inner);

        debug!(
            intent = intent.as_str(),
            phase = sale_phase.as_str(),
            viewers = viewer_count,
            interval_secs = time_since_last,
            "speak recorded"
        );
    }

    /// Append a viewer sample; a swing of more than 10% against the previous
    /// sample gets a log line of its own.
    pub fn record_viewer(&self, count: u64) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let previous = inner.viewer_history.back().map(|sample| sample.count);
        push_bounded(
            &mut inner.viewer_history,
            VIEWER_CAPACITY,
            ViewerSample {
                timestamp: now,
                count,
            },
        );
        drop(inner);

        if let Some(previous) = previous {
            if previous > 0 {
                let delta_pct = (count as f64 - previous as f64) / previous as f64;
                if delta_pct.abs() > 0.1 {
                    info!(
                        from = previous,
                        to = count,
                        delta_pct = delta_pct * 100.0,
                        "significant viewer change"
                    );
                }
            }
        }
    }

    /// Aggregate events within the trailing window.
    pub fn summary(&self, window_seconds: Seconds) -> MetricsSummary {
        let now = self.clock.now();
        let inner = self.inner.lock();
        self.summary_locked(&inner, window_seconds, now)
    }

    pub fn realtime_stats(&self) -> RealtimeStats {
        let now = self.clock.now();
        let inner = self.inner.lock();
        let counters = &inner.counters;

        RealtimeStats {
            uptime: now - inner.session_start,
            total_speaks: counters.total_speaks,
            total_comments: counters.total_comments,
            response_rate: if counters.total_comments > 0 {
                counters.responded_comments as f64 / counters.total_comments as f64
            } else {
                0.0
            },
            sale_phrase_rate: if counters.total_speaks > 0 {
                counters.sale_phrases as f64 / counters.total_speaks as f64
            } else {
                0.0
            },
            current_viewers: inner
                .viewer_history
                .back()
                .map(|sample| sample.count)
                .unwrap_or(0),
            time_since_speak: if counters.total_speaks > 0 {
                now - inner.last_speak_time
            } else {
                0.0
            },
        }
    }

    /// For each speak, the first viewer sample strictly inside
    /// `(speak_time, speak_time + window]`.
    pub fn viewer_delta_after_speak(&self, window_seconds: Seconds) -> Vec<ViewerDelta> {
        let inner = self.inner.lock();
        let mut deltas = Vec::new();

        for event in &inner.speak_events {
            let after = inner.viewer_history.iter().find(|sample| {
                sample.timestamp > event.timestamp
                    && sample.timestamp <= event.timestamp + window_seconds
            });
            if let Some(after) = after {
                deltas.push(ViewerDelta {
                    speak_time: event.timestamp,
                    intent: event.intent,
                    viewer_before: event.viewer_count,
                    viewer_after: after.count,
                    delta: after.count as i64 - event.viewer_count as i64,
                });
            }
        }

        deltas
    }

    pub fn counters(&self) -> Counters {
        self.inner.lock().counters.clone()
    }

    /// Serialize every raw event plus a five-minute summary to `path`.
    pub fn export(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let now = self.clock.now();
            let inner = self.inner.lock();
            MetricsExport {
                session_start: inner.session_start,
                export_time: now,
                counters: inner.counters.clone(),
                speak_events: inner.speak_events.iter().cloned().collect(),
                comment_events: inner.comment_events.iter().cloned().collect(),
                viewer_history: inner.viewer_history.iter().copied().collect(),
                summary: self.summary_locked(&inner, 300.0, now),
            }
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating metrics directory {}", parent.display()))?;
        }
        let file = fs::File::create(path)
            .with_context(|| format!("creating metrics export {}", path.display()))?;
        serde_json::to_writer_pretty(file, &snapshot)
            .with_context(|| format!("writing metrics export {}", path.display()))?;

        info!(path = %path.display(), "metrics exported");
        Ok(())
    }

    /// Clear all sequences and counters and restart the session clock origin.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        *inner = Inner {
            session_start: now,
            ..Inner::default()
        };
    }

    fn is_sale_phrase(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.sale_phrases
            .iter()
            .any(|phrase| lower.contains(phrase.as_str()))
    }

    // summary() but against an already-held lock, for export consistency
    fn summary_locked(&self, inner: &Inner, window_seconds: Seconds, now: Seconds) -> MetricsSummary {
        let cutoff = now - window_seconds;

        let speaks: Vec<&SpeakEvent> = inner
            .speak_events
            .iter()
            .filter(|event| event.timestamp >= cutoff)
            .collect();
        let comments: Vec<&CommentEvent> = inner
            .comment_events
            .iter()
            .filter(|event| event.timestamp >= cutoff)
            .collect();
        let viewers: Vec<f64> = inner
            .viewer_history
            .iter()
            .filter(|sample| sample.timestamp >= cutoff)
            .map(|sample| sample.count as f64)
            .collect();

        let intervals: Vec<f64> = speaks
            .iter()
            .map(|event| event.time_since_last)
            .filter(|interval| *interval > 0.0)
            .collect();
        let responded: Vec<&&CommentEvent> = comments
            .iter()
            .filter(|event| event.was_responded)
            .collect();
        let latencies: Vec<f64> = responded
            .iter()
            .map(|event| event.response_latency)
            .filter(|latency| *latency > 0.0)
            .collect();
        let sale_phrase_count = speaks
            .iter()
            .filter(|event| self.is_sale_phrase(&event.response_text))
            .count();

        MetricsSummary {
            period_start: cutoff,
            period_end: now,
            total_speaks: speaks.len(),
            avg_speak_interval: if intervals.is_empty() {
                0.0
            } else {
                (&intervals).mean()
            },
            min_speak_interval: if intervals.is_empty() {
                0.0
            } else {
                Statistics::min(&intervals)
            },
            max_speak_interval: if intervals.is_empty() {
                0.0
            } else {
                Statistics::max(&intervals)
            },
            std_speak_interval: if intervals.len() > 1 {
                (&intervals).std_dev()
            } else {
                0.0
            },
            speak_interval_count: intervals.len(),
            total_comments: comments.len(),
            responded_comments: responded.len(),
            response_rate: if comments.is_empty() {
                0.0
            } else {
                responded.len() as f64 / comments.len() as f64
            },
            avg_response_latency: if latencies.is_empty() {
                0.0
            } else {
                (&latencies).mean()
            },
            sale_phrase_count,
            sale_phrase_rate: if speaks.is_empty() {
                0.0
            } else {
                sale_phrase_count as f64 / speaks.len() as f64
            },
            avg_viewer_count: if viewers.is_empty() {
                0.0
            } else {
                (&viewers).mean()
            },
            min_viewer_count: if viewers.is_empty() {
                0
            } else {
                Statistics::min(&viewers) as u64
            },
            max_viewer_count: if viewers.is_empty() {
                0
            } else {
                Statistics::max(&viewers) as u64
            },
        }
    }
}

fn push_bounded<T>(ring: &mut std::collections::VecDeque<T>, capacity: usize, item: T) {
    if ring.len() == capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}
