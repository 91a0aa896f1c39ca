use std::sync::Arc;

use crate::clock::ManualClock;
use crate::models::{Intent, Reason};
use crate::observability::{EventLog, MetricsExport};
use crate::state_machine::SalePhase;

fn log_at(clock: &ManualClock) -> EventLog {
    EventLog::with_default_phrases(Arc::new(clock.clone()))
}

fn speak(log: &EventLog, text: &str, intent: Intent, viewers: u64) {
    log.record_speak(text, 1.2, intent, SalePhase::WarmUp, viewers, 8, Reason::Engagement);
}

#[test]
fn first_speak_has_zero_interval() {
    let clock = ManualClock::new(0.0);
    let log = log_at(&clock);

    clock.set(4.0);
    speak(&log, "chào cả nhà", Intent::Greeting, 50);

    let summary = log.summary(300.0);
    assert_eq!(summary.total_speaks, 1);
    assert_eq!(summary.speak_interval_count, 0);
    assert_eq!(summary.avg_speak_interval, 0.0);
}

#[test]
fn time_since_last_tracks_prior_speak() {
    let clock = ManualClock::new(0.0);
    let log = log_at(&clock);

    speak(&log, "một", Intent::Chitchat, 50);
    clock.set(6.0);
    speak(&log, "hai", Intent::Chitchat, 50);
    clock.set(10.0);
    speak(&log, "ba", Intent::Chitchat, 50);

    let summary = log.summary(300.0);
    assert_eq!(summary.speak_interval_count, 2);
    assert!((summary.avg_speak_interval - 5.0).abs() < 1e-9);
    assert!((summary.min_speak_interval - 4.0).abs() < 1e-9);
    assert!((summary.max_speak_interval - 6.0).abs() < 1e-9);
}

#[test]
fn mark_responded_is_idempotent_on_counter() {
    let clock = ManualClock::new(0.0);
    let log = log_at(&clock);

    let handle = log.record_comment("mai", "giá nhiêu?", Intent::PriceQuestion);
    log.mark_responded(handle, 0.8);
    log.mark_responded(handle, 0.8);
    log.mark_responded(handle, 2.5);

    let counters = log.counters();
    assert_eq!(counters.total_comments, 1);
    assert_eq!(counters.responded_comments, 1);

    let summary = log.summary(300.0);
    assert_eq!(summary.responded_comments, 1);
    assert!((summary.avg_response_latency - 0.8).abs() < 1e-9);
}

#[test]
fn response_rate_is_exact_within_window() {
    let clock = ManualClock::new(0.0);
    let log = log_at(&clock);

    // Two comments outside the window
    log.record_comment("a", "cũ một", Intent::Chitchat);
    log.record_comment("b", "cũ hai", Intent::Chitchat);

    clock.set(500.0);
    let h1 = log.record_comment("c", "mới một", Intent::Greeting);
    log.record_comment("d", "mới hai", Intent::Chitchat);
    let h3 = log.record_comment("e", "mới ba", Intent::PriceQuestion);
    log.mark_responded(h1, 0.5);
    log.mark_responded(h3, 0.5);

    clock.set(600.0);
    let summary = log.summary(300.0);
    assert_eq!(summary.total_comments, 3);
    assert_eq!(summary.responded_comments, 2);
    assert!((summary.response_rate - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn sale_phrases_counted_case_insensitively() {
    let clock = ManualClock::new(0.0);
    let log = log_at(&clock);

    speak(&log, "MUA NGAY kẻo hết nhé!", Intent::PurchaseIntent, 80);
    clock.set(5.0);
    speak(&log, "cảm ơn bạn đã ghé", Intent::Thanks, 80);

    let counters = log.counters();
    assert_eq!(counters.sale_phrases, 1);

    let summary = log.summary(300.0);
    assert_eq!(summary.sale_phrase_count, 1);
    assert!((summary.sale_phrase_rate - 0.5).abs() < 1e-9);
}

#[test]
fn viewer_delta_finds_first_sample_after_speak() {
    let clock = ManualClock::new(0.0);
    let log = log_at(&clock);

    log.record_viewer(100);
    clock.set(10.0);
    speak(&log, "xin chào", Intent::Greeting, 100);

    clock.set(12.0);
    log.record_viewer(130);
    clock.set(20.0);
    log.record_viewer(90);

    let deltas = log.viewer_delta_after_speak(30.0);
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].viewer_before, 100);
    assert_eq!(deltas[0].viewer_after, 130);
    assert_eq!(deltas[0].delta, 30);

    // A sample outside (speak, speak + window] is not matched
    let tight = log.viewer_delta_after_speak(1.0);
    assert!(tight.is_empty());
}

#[test]
fn counters_are_monotone() {
    let clock = ManualClock::new(0.0);
    let log = log_at(&clock);
    let mut previous = log.counters();

    for i in 0..20 {
        clock.advance(1.0);
        let handle = log.record_comment("u", &format!("câu {i}"), Intent::Chitchat);
        if i % 3 == 0 {
            speak(&log, &format!("đáp {i}"), Intent::Chitchat, 10);
            log.mark_responded(handle, 0.2);
        }

        let current = log.counters();
        assert!(current.total_comments >= previous.total_comments);
        assert!(current.total_speaks >= previous.total_speaks);
        assert!(current.responded_comments >= previous.responded_comments);
        assert!(current.sale_phrases >= previous.sale_phrases);
        previous = current;
    }
}

#[test]
fn export_round_trips_counters_and_event_order() {
    let clock = ManualClock::new(0.0);
    let log = log_at(&clock);

    let handle = log.record_comment("lan", "áo này còn size M không?", Intent::ProductQuestion);
    clock.set(2.0);
    speak(&log, "còn đủ size nhé, đặt hàng ở link dưới", Intent::ProductQuestion, 60);
    log.mark_responded(handle, 2.0);
    log.record_viewer(60);
    clock.set(9.0);
    speak(&log, "giá chỉ 199k thôi ạ", Intent::PriceQuestion, 66);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics_test.json");
    log.export(&path).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let restored: MetricsExport = serde_json::from_str(&raw).unwrap();

    assert_eq!(restored.counters, log.counters());
    assert_eq!(restored.speak_events.len(), 2);
    assert_eq!(restored.comment_events.len(), 1);
    assert_eq!(restored.viewer_history.len(), 1);
    assert_eq!(restored.speak_events[0].response_text, "còn đủ size nhé, đặt hàng ở link dưới");
    assert!((restored.speak_events[1].time_since_last - 7.0).abs() < 1e-9);
    assert!(restored.comment_events[0].was_responded);
    assert_eq!(restored.counters.sale_phrases, 2);
}

#[test]
fn reset_clears_events_and_restarts_session() {
    let clock = ManualClock::new(0.0);
    let log = log_at(&clock);

    log.record_comment("a", "hello", Intent::Greeting);
    speak(&log, "chào bạn", Intent::Greeting, 5);
    clock.set(50.0);
    log.reset();

    let stats = log.realtime_stats();
    assert_eq!(stats.total_comments, 0);
    assert_eq!(stats.total_speaks, 0);
    assert_eq!(stats.uptime, 0.0);

    let summary = log.summary(300.0);
    assert_eq!(summary.total_speaks, 0);
    assert_eq!(summary.total_comments, 0);
}

#[test]
fn realtime_stats_reflect_counters() {
    let clock = ManualClock::new(0.0);
    let log = log_at(&clock);

    let handle = log.record_comment("hoa", "mua ngay được chưa?", Intent::PurchaseIntent);
    clock.set(3.0);
    speak(&log, "được nhé, mua ngay thôi!", Intent::PurchaseIntent, 120);
    log.mark_responded(handle, 3.0);
    log.record_viewer(120);
    clock.set(10.0);

    let stats = log.realtime_stats();
    assert_eq!(stats.uptime, 10.0);
    assert_eq!(stats.total_speaks, 1);
    assert_eq!(stats.total_comments, 1);
    assert!((stats.response_rate - 1.0).abs() < 1e-9);
    assert!((stats.sale_phrase_rate - 1.0).abs() < 1e-9);
    assert_eq!(stats.current_viewers, 120);
    assert!((stats.time_since_speak - 7.0).abs() < 1e-9);
}
