//! End-to-end sessions driven through the orchestrator on an injected clock,
//! exactly the way the production bus loop drives it.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use livehost_core::clock::ManualClock;
use livehost_core::config::Config;
use livehost_core::models::{Action, ClassifiedComment, Intent, Reason, SpeakRequest};
use livehost_core::orchestrator::{Orchestrator, SpeakSink};
use livehost_core::state_machine::SalePhase;

/// Collects published speak requests instead of touching a bus.
#[derive(Default)]
struct CaptureSink {
    published: Mutex<Vec<SpeakRequest>>,
}

#[async_trait]
impl SpeakSink for CaptureSink {
    async fn publish(&self, request: &SpeakRequest) -> Result<()> {
        self.published.lock().push(request.clone());
        Ok(())
    }
}

/// Simulates a broken downstream so speaks get parked in the pending queue.
struct FailingSink;

#[async_trait]
impl SpeakSink for FailingSink {
    async fn publish(&self, _request: &SpeakRequest) -> Result<()> {
        bail!("downstream unavailable")
    }
}

struct Session {
    orchestrator: Orchestrator,
    clock: ManualClock,
    sink: Arc<CaptureSink>,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

fn test_config(logs: &tempfile::TempDir, metrics: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.log_dir = logs.path().to_path_buf();
    config.metrics_export_path = metrics.path().to_path_buf();
    config
}

fn session() -> Session {
    session_with(Config::default())
}

fn session_with(mut config: Config) -> Session {
    let logs = tempfile::tempdir().unwrap();
    let metrics = tempfile::tempdir().unwrap();
    config.log_dir = logs.path().to_path_buf();
    config.metrics_export_path = metrics.path().to_path_buf();

    let clock = ManualClock::new(0.0);
    let sink = Arc::new(CaptureSink::default());
    let orchestrator = Orchestrator::new(config, Arc::new(clock.clone()), sink.clone());

    Session {
        orchestrator,
        clock,
        sink,
        _dirs: (logs, metrics),
    }
}

fn comment(intent: Intent, username: &str, text: &str) -> ClassifiedComment {
    ClassifiedComment {
        comment_id: None,
        user_id: None,
        username: username.to_string(),
        nickname: None,
        original_comment: text.to_string(),
        content: None,
        intent,
        intent_confidence: Some(0.9),
        priority: None,
        is_follower: false,
        is_subscriber: false,
        gift_value: 0.0,
        timestamp: 1_704_067_200.0,
    }
}

#[tokio::test]
async fn s1_cooldown_blocks_rapid_followup() {
    let mut session = session();
    session.orchestrator.update_viewer_count(100);

    let first = session
        .orchestrator
        .handle_comment(comment(Intent::Greeting, "an", "xin chào shop"))
        .await;
    assert_eq!(first.action, Action::Speak);
    assert!(first.priority >= 6);
    assert_eq!(session.sink.published.lock().len(), 1);

    session.clock.set(1.0);
    let second = session
        .orchestrator
        .handle_comment(comment(Intent::PriceQuestion, "binh", "giá bao nhiêu?"))
        .await;
    assert_eq!(second.action, Action::Wait);
    assert_eq!(second.reason, Reason::TooFast);
    assert!((second.cooldown - 2.0).abs() < 1e-9);
    assert_eq!(session.sink.published.lock().len(), 1);
}

#[tokio::test]
async fn s2_starvation_lifts_chitchat_to_speak() {
    let mut session = session();

    session
        .orchestrator
        .handle_comment(comment(Intent::Greeting, "an", "chào mọi người"))
        .await;

    session.clock.set(16.0);
    let decision = session
        .orchestrator
        .handle_comment(comment(Intent::Chitchat, "chi", "hôm nay trời đẹp ghê"))
        .await;
    assert_eq!(decision.action, Action::Speak);
    assert!(decision.priority >= 9);
}

#[tokio::test]
async fn s3_duplicate_text_is_suppressed() {
    let mut session = session();

    let first = session
        .orchestrator
        .handle_comment(comment(Intent::Greeting, "an", "Xin chào mọi người"))
        .await;
    assert_eq!(first.action, Action::Speak);

    session.clock.set(5.0);
    let second = session
        .orchestrator
        .handle_comment(comment(Intent::Greeting, "binh", "Xin chào mọi người"))
        .await;
    assert_eq!(second.action, Action::Skip);
    assert_eq!(second.reason, Reason::Duplicate);
    assert_eq!(session.sink.published.lock().len(), 1);
}

#[tokio::test]
async fn s4_auto_transitions_walk_the_sale_flow() {
    let mut session = session();
    assert_eq!(session.orchestrator.phase(), SalePhase::Idle);

    session
        .orchestrator
        .handle_comment(comment(Intent::Greeting, "an", "chào shop nha"))
        .await;
    assert_eq!(session.orchestrator.phase(), SalePhase::WarmUp);

    session.clock.set(35.0);
    session
        .orchestrator
        .handle_comment(comment(
            Intent::ProductQuestion,
            "binh",
            "áo này chất liệu gì vậy?",
        ))
        .await;
    assert_eq!(session.orchestrator.phase(), SalePhase::Interest);

    session.clock.set(50.0);
    session
        .orchestrator
        .handle_comment(comment(Intent::PriceQuestion, "chi", "giá sao shop?"))
        .await;
    assert_eq!(session.orchestrator.phase(), SalePhase::Price);

    // The published requests carry the phase active when each speak committed
    let published = session.sink.published.lock();
    assert_eq!(published.len(), 3);
    assert_eq!(published[0].sale_state, SalePhase::Idle);
    assert_eq!(published[1].sale_state, SalePhase::WarmUp);
    assert_eq!(published[2].sale_state, SalePhase::Interest);
    assert_eq!(published[2].response_style, "informative");
}

#[tokio::test]
async fn s5_complaint_interrupts_price_phase_into_crisis() {
    let mut session = session();

    session
        .orchestrator
        .handle_comment(comment(Intent::Greeting, "an", "chào shop nha"))
        .await;
    session.clock.set(35.0);
    session
        .orchestrator
        .handle_comment(comment(
            Intent::ProductQuestion,
            "binh",
            "có màu đen không shop?",
        ))
        .await;
    session.clock.set(50.0);
    session
        .orchestrator
        .handle_comment(comment(Intent::PriceQuestion, "chi", "nhiêu tiền vậy?"))
        .await;
    assert_eq!(session.orchestrator.phase(), SalePhase::Price);

    session.clock.set(75.0);
    let decision = session
        .orchestrator
        .handle_comment(comment(
            Intent::Complaint,
            "dung",
            "đơn trước giao thiếu hàng nha shop",
        ))
        .await;
    assert_eq!(decision.action, Action::Speak);
    assert!(decision.priority >= 7);
    assert_eq!(session.orchestrator.phase(), SalePhase::Crisis);
}

#[tokio::test]
async fn s6_full_pending_queue_yields_queue_full() {
    let logs = tempfile::tempdir().unwrap();
    let metrics = tempfile::tempdir().unwrap();
    let mut config = test_config(&logs, &metrics);
    config.brain.max_queue_size = 2;

    let clock = ManualClock::new(0.0);
    let mut orchestrator =
        Orchestrator::new(config, Arc::new(clock.clone()), Arc::new(FailingSink));
    orchestrator.update_viewer_count(100);

    // Two priority-7 complaints try to speak, fail to publish, and get parked
    for (i, text) in ["giao hàng trễ quá", "sản phẩm khác hình nha"]
        .into_iter()
        .enumerate()
    {
        clock.set(i as f64);
        let decision = orchestrator
            .handle_comment(comment(Intent::Complaint, &format!("user{i}"), text))
            .await;
        assert_eq!(decision.action, Action::Speak);
        assert_eq!(decision.priority, 7);
    }
    assert_eq!(orchestrator.pending_depth(), 2);
    assert_eq!(orchestrator.counters().publish_failures, 2);

    clock.set(2.0);
    let decision = orchestrator
        .handle_comment(comment(Intent::Complaint, "user3", "chưa nhận được hàng"))
        .await;
    assert_eq!(decision.action, Action::Queue);
    assert_eq!(decision.reason, Reason::QueueFull);
    assert_eq!(decision.priority, 7);
    assert_eq!(orchestrator.counters().queued, 1);
}

#[tokio::test]
async fn pending_comments_expire_after_queue_timeout() {
    let logs = tempfile::tempdir().unwrap();
    let metrics = tempfile::tempdir().unwrap();
    let mut config = test_config(&logs, &metrics);
    config.brain.max_queue_size = 2;

    let clock = ManualClock::new(0.0);
    let mut orchestrator =
        Orchestrator::new(config, Arc::new(clock.clone()), Arc::new(FailingSink));

    orchestrator
        .handle_comment(comment(Intent::Complaint, "an", "đơn bị móp hộp"))
        .await;
    assert_eq!(orchestrator.pending_depth(), 1);

    // Past the 30s queue timeout the parked comment is dropped
    clock.set(31.0);
    orchestrator
        .handle_comment(comment(Intent::Chitchat, "binh", "đang xem nè"))
        .await;
    assert_eq!(orchestrator.pending_depth(), 0);
    assert_eq!(orchestrator.counters().expired_pending, 1);
}

#[tokio::test]
async fn malformed_payloads_are_counted_and_dropped() {
    let mut session = session();

    assert!(session.orchestrator.handle_payload(b"{not json").await.is_none());
    assert!(
        session
            .orchestrator
            .handle_payload(b"{\"username\": \"an\"}")
            .await
            .is_none()
    );

    let counters = session.orchestrator.counters();
    assert_eq!(counters.malformed, 2);
    assert_eq!(counters.processed, 0);

    // A valid payload with an unrecognized intent still goes through
    let raw = br#"{
        "username": "an",
        "original_comment": "???",
        "intent": "interpretive_dance",
        "timestamp": 1704067200.0
    }"#;
    let decision = session.orchestrator.handle_payload(raw).await.unwrap();
    assert_ne!(decision.action, Action::Wait);
}

#[tokio::test]
async fn speak_commits_are_recorded_before_the_next_decision() {
    let mut session = session();
    session.orchestrator.update_viewer_count(80);

    let decision = session
        .orchestrator
        .handle_comment(comment(Intent::PriceQuestion, "an", "giá nhiêu shop?"))
        .await;
    assert_eq!(decision.action, Action::Speak);

    let counters = session.orchestrator.metrics().counters();
    assert_eq!(counters.total_speaks, 1);
    assert_eq!(counters.total_comments, 1);
    assert_eq!(counters.responded_comments, 1);
    // "giá" is on the sale-phrase list
    assert_eq!(counters.sale_phrases, 1);

    let summary = session.orchestrator.metrics().summary(300.0);
    assert!((summary.response_rate - 1.0).abs() < 1e-9);
}

/// Minimal deterministic generator for the randomized invariant run.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[tokio::test]
async fn randomized_session_holds_pacing_invariants() {
    let mut session = session();
    let mut rng = Lcg(0x5eed);

    let intents = [
        Intent::Greeting,
        Intent::PriceQuestion,
        Intent::ProductQuestion,
        Intent::PurchaseIntent,
        Intent::Thanks,
        Intent::Complaint,
        Intent::Request,
        Intent::Chitchat,
        Intent::Spam,
        Intent::Unknown,
    ];

    let mut now = 0.0_f64;
    let mut last_speak_at: Option<f64> = None;

    for i in 0..500 {
        now += (rng.next() % 40) as f64 / 2.0; // 0.0 to 19.5s steps
        session.clock.set(now);

        let intent = intents[(rng.next() % intents.len() as u64) as usize];
        let silence = now - last_speak_at.unwrap_or(0.0);
        let text = format!("bình luận số {i} nội dung {}", rng.next());

        let decision = session
            .orchestrator
            .handle_comment(comment(intent, &format!("user{}", rng.next() % 7), &text))
            .await;

        // Invariant 2: spam never speaks
        if intent == Intent::Spam {
            assert_ne!(decision.action, Action::Speak, "spam spoke at t={now}");
        }

        if decision.action == Action::Speak {
            // Invariant 1: committed speaks are at least min_speak_interval apart
            if let Some(last) = last_speak_at {
                assert!(
                    now - last >= 3.0 - 1e-9,
                    "speaks {last} and {now} violate the cooldown"
                );
            }
            last_speak_at = Some(now);
        } else if intent != Intent::Spam
            && decision.reason != Reason::Duplicate
            && silence > 15.0
        {
            // Invariant 4: prolonged silence forces the next eligible speak
            panic!("starved non-spam comment not spoken at t={now} ({:?})", decision);
        }
    }

    // Invariant 6 spot check on the way out
    let counters = session.orchestrator.metrics().counters();
    assert!(counters.total_comments >= counters.responded_comments);
    assert_eq!(counters.total_comments, 500);
}
