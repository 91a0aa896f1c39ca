//! Orchestrator
//!
//! Binds the decision engine, the sale flow state machine and the event log
//! to the message bus. The hot path is strictly sequential: one inbound
//! comment is recorded, decided, published and committed before the next is
//! consumed, so all three subsystems observe the same order of events.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::brain::{BrainInput, DecisionEngine};
use crate::bus::CommentConsumer;
use crate::clock::{Seconds, SharedClock};
use crate::config::Config;
use crate::models::{Action, ClassifiedComment, Decision, Intent, SpeakRequest};
use crate::observability::{CommentHandle, EventLog, SessionLog};
use crate::state_machine::{SalePhase, SaleStateMachine};

/// Downstream publisher for committed SPEAK decisions. Production wires the
/// JetStream publisher here; tests wire a capture sink and drive the same
/// `handle_comment` entry point.
#[async_trait]
pub trait SpeakSink: Send + Sync {
    async fn publish(&self, request: &SpeakRequest) -> Result<()>;
}

/// Optional external source of live viewer counts.
#[async_trait]
pub trait ViewerFeed: Send + Sync {
    async fn fetch_viewer_count(&self) -> Result<u64>;
}

/// Session-level processing counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorCounters {
    pub processed: u64,
    pub spoken: u64,
    pub skipped: u64,
    pub waited: u64,
    pub queued: u64,
    pub expired_pending: u64,
    pub malformed: u64,
    pub publish_failures: u64,
}

struct PendingComment {
    enqueued_at: Seconds,
    comment: ClassifiedComment,
}

pub struct Orchestrator {
    config: Config,
    clock: SharedClock,
    brain: DecisionEngine,
    state: SaleStateMachine,
    metrics: Arc<EventLog>,
    session_log: SessionLog,
    sink: Arc<dyn SpeakSink>,
    viewer_feed: Option<Arc<dyn ViewerFeed>>,
    pending: VecDeque<PendingComment>,
    current_viewers: u64,
    counters: OrchestratorCounters,
    started_at: Seconds,
}

impl Orchestrator {
    pub fn new(config: Config, clock: SharedClock, sink: Arc<dyn SpeakSink>) -> Self {
        let brain = DecisionEngine::new(config.brain.clone(), clock.clone());
        let state = SaleStateMachine::new(clock.clone());
        let metrics = Arc::new(EventLog::new(clock.clone(), config.sale_phrases.clone()));
        let session_log = SessionLog::new("orchestrator", &config.log_dir);
        let started_at = clock.now();

        Self {
            config,
            clock,
            brain,
            state,
            metrics,
            session_log,
            sink,
            viewer_feed: None,
            pending: VecDeque::new(),
            current_viewers: 0,
            counters: OrchestratorCounters::default(),
            started_at,
        }
    }

    pub fn with_viewer_feed(mut self, feed: Arc<dyn ViewerFeed>) -> Self {
        self.viewer_feed = Some(feed);
        self
    }

    pub fn metrics(&self) -> &Arc<EventLog> {
        &self.metrics
    }

    pub fn counters(&self) -> OrchestratorCounters {
        self.counters.clone()
    }

    pub fn phase(&self) -> SalePhase {
        self.state.phase()
    }

    pub fn pending_depth(&self) -> usize {
        self.pending.len()
    }

    /// Parse one raw bus payload and process it. A malformed message is
    /// counted and dropped; the pipeline never stalls on one bad payload.
    pub async fn handle_payload(&mut self, payload: &[u8]) -> Option<Decision> {
        match serde_json::from_slice::<ClassifiedComment>(payload) {
            Ok(comment) => Some(self.handle_comment(comment).await),
            Err(error) => {
                self.counters.malformed += 1;
                warn!(%error, "dropping malformed classified comment");
                self.session_log
                    .error("malformed classified comment", json!({ "error": error.to_string() }));
                None
            }
        }
    }

    /// Process one classified comment through the full sequence:
    /// record → timeout check → decide → act.
    pub async fn handle_comment(&mut self, comment: ClassifiedComment) -> Decision {
        self.counters.processed += 1;
        self.expire_pending();

        let handle =
            self.metrics
                .record_comment(&comment.username, comment.text(), comment.intent);
        self.session_log
            .comment(&comment.username, comment.text(), comment.intent.as_str());

        if self.config.enable_state_machine && self.config.auto_state_transition {
            let before = self.state.phase();
            if self.state.check_timeout() {
                self.session_log
                    .transition(before.as_str(), self.state.phase().as_str(), "timeout");
            }
        }

        let input = BrainInput {
            comment_id: comment.id(),
            username: comment.username.clone(),
            comment_text: comment.text().to_string(),
            intent: comment.intent,
            viewer_count: self.current_viewers,
            sale_phase: self.state.phase(),
            is_follower: comment.is_follower,
            is_subscriber: comment.is_subscriber,
            gift_value: comment.gift_value,
            queue_depth: self.pending.len(),
        };
        let decision = self.brain.decide(&input);

        debug!(
            action = decision.action.as_str(),
            reason = decision.reason.as_str(),
            priority = decision.priority,
            intent = comment.intent.as_str(),
            phase = self.state.phase().as_str(),
            "decision"
        );
        self.session_log.decision(
            decision.action.as_str(),
            decision.reason.as_str(),
            decision.priority,
            comment.intent.as_str(),
            self.state.phase().as_str(),
        );

        match decision.action {
            Action::Speak => self.commit_speak(comment, handle, &decision).await,
            Action::Queue => {
                self.counters.queued += 1;
                self.enqueue_pending(comment);
            }
            Action::Skip => self.counters.skipped += 1,
            Action::Wait => self.counters.waited += 1,
        }

        decision
    }

    /// Feed a fresh viewer count into metrics and the state machine.
    pub fn update_viewer_count(&mut self, count: u64) {
        let previous = self.current_viewers;
        self.current_viewers = count;
        self.metrics.record_viewer(count);
        self.state.update_viewer_count(count);

        if previous > 0 {
            let delta = count as i64 - previous as i64;
            if delta.unsigned_abs() * 10 > previous {
                self.session_log.viewer(count, delta);
            }
        }
    }

    /// Park a comment in the bounded pending queue; full queue drops it.
    pub fn enqueue_pending(&mut self, comment: ClassifiedComment) {
        if self.pending.len() >= self.config.brain.max_queue_size {
            debug!(username = %comment.username, "pending queue full, dropping comment");
            return;
        }
        self.pending.push_back(PendingComment {
            enqueued_at: self.clock.now(),
            comment,
        });
    }

    async fn commit_speak(
        &mut self,
        comment: ClassifiedComment,
        handle: CommentHandle,
        decision: &Decision,
    ) {
        let phase = self.state.phase();
        let request = SpeakRequest {
            brain_decision: decision.into(),
            sale_state: phase,
            response_style: self.state.response_style().to_string(),
            orchestrator_timestamp: chrono::Utc::now().timestamp_micros() as f64 / 1e6,
            comment,
        };

        if let Err(error) = self.sink.publish(&request).await {
            self.counters.publish_failures += 1;
            warn!(%error, "speak publish failed, parking comment");
            self.session_log
                .error("speak publish failed", json!({ "error": error.to_string() }));
            // Park it so queue pressure becomes visible to the brain
            self.enqueue_pending(request.comment);
            return;
        }

        self.counters.spoken += 1;
        self.metrics.mark_responded(handle, 0.0);
        self.brain.mark_spoken();
        self.state.notify_speak();
        self.metrics.record_speak(
            request.comment.text(),
            0.0,
            request.comment.intent,
            phase,
            self.current_viewers,
            decision.priority,
            decision.reason,
        );
        self.session_log.speak(
            request.comment.text(),
            request.comment.intent.as_str(),
            decision.priority,
            self.current_viewers,
        );

        if self.config.enable_state_machine && self.config.auto_state_transition {
            self.auto_transition(request.comment.intent);
        }

        info!(
            reason = decision.reason.as_str(),
            priority = decision.priority,
            phase = self.state.phase().as_str(),
            "speak committed"
        );
    }

    /// Intent-driven phase advance after a committed speak. Forced: having
    /// just answered a price question, the flow is in price territory no
    /// matter how briefly the previous phase held.
    fn auto_transition(&mut self, intent: Intent) {
        let trigger = match intent {
            Intent::Greeting => "greeting_received",
            Intent::ProductQuestion => "product_mention",
            Intent::PriceQuestion => "price_question",
            Intent::PurchaseIntent => "purchase_intent",
            Intent::Complaint => "complaint_received",
            _ => return,
        };

        let before = self.state.phase();
        if self.state.transition(trigger, true) {
            self.session_log
                .transition(before.as_str(), self.state.phase().as_str(), trigger);
        }
    }

    fn expire_pending(&mut self) {
        let cutoff = self.clock.now() - self.config.brain.queue_timeout;
        while let Some(front) = self.pending.front() {
            if front.enqueued_at > cutoff {
                break;
            }
            let expired = self.pending.pop_front();
            self.counters.expired_pending += 1;
            if let Some(expired) = expired {
                debug!(username = %expired.comment.username, "pending comment expired");
            }
        }
    }

    fn export_metrics(&self) {
        let filename = format!(
            "metrics_{}.json",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.config.metrics_export_path.join(filename);
        if let Err(error) = self.metrics.export(&path) {
            // Rings retain the data until the next successful export
            warn!(%error, "metrics export failed");
            self.session_log
                .error("metrics export failed", json!({ "error": error.to_string() }));
        }
    }

    /// Consume the bus until `shutdown` resolves, exporting metrics and
    /// polling the viewer feed on their configured intervals.
    pub async fn run(
        mut self,
        mut consumer: CommentConsumer,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        info!(
            input = %self.config.input_subject,
            output = %self.config.output_subject,
            state_machine = self.config.enable_state_machine,
            "orchestrator started"
        );
        self.session_log.session_start(json!({
            "input_subject": self.config.input_subject,
            "output_subject": self.config.output_subject,
            "state_machine": self.config.enable_state_machine,
        }));

        let mut export_timer = interval(Duration::from_secs_f64(
            self.config.metrics_export_interval,
        ));
        let mut viewer_timer = interval(Duration::from_secs_f64(
            self.config.viewer_update_interval,
        ));
        // Both intervals fire immediately once; swallow those ticks
        export_timer.tick().await;
        viewer_timer.tick().await;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                inbound = consumer.next() => {
                    match inbound {
                        Some(Ok(message)) => {
                            self.handle_payload(message.payload()).await;
                            if let Err(error) = message.ack().await {
                                warn!(%error, "ack failed, message may redeliver");
                            }
                        }
                        Some(Err(error)) => {
                            warn!(%error, "inbound consumer error");
                        }
                        None => {
                            warn!("inbound subscription closed");
                            break;
                        }
                    }
                }
                _ = export_timer.tick() => {
                    self.export_metrics();
                }
                _ = viewer_timer.tick() => {
                    if let Some(feed) = self.viewer_feed.clone() {
                        match feed.fetch_viewer_count().await {
                            Ok(count) => self.update_viewer_count(count),
                            Err(error) => warn!(%error, "viewer feed poll failed"),
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.finish();
        Ok(())
    }

    /// Final export and the end-of-session summary.
    fn finish(&self) {
        self.export_metrics();

        let uptime = self.clock.now() - self.started_at;
        let counters = &self.counters;
        let speak_rate = if counters.processed > 0 {
            counters.spoken as f64 / counters.processed as f64
        } else {
            0.0
        };
        let summary = self.metrics.summary(300.0);

        info!(
            uptime_secs = uptime,
            processed = counters.processed,
            spoken = counters.spoken,
            skipped = counters.skipped,
            speak_rate_pct = speak_rate * 100.0,
            response_rate_pct = summary.response_rate * 100.0,
            avg_speak_interval = summary.avg_speak_interval,
            transitions = self.state.stats().transition_count,
            "session ended"
        );
        self.session_log.session_end(
            uptime,
            json!({
                "counters": counters,
                "speak_rate": speak_rate,
                "response_rate": summary.response_rate,
                "avg_speak_interval": summary.avg_speak_interval,
                "state_transitions": self.state.stats().transition_count,
            }),
        );
    }
}
