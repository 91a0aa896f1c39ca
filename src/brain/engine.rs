//! Decision Engine
//!
//! Decides SPEAK / SKIP / WAIT / QUEUE for each classified comment, under the
//! pacing constraints (min/max speak interval), duplicate suppression and
//! phase-biased priority scoring. Deterministic given its inputs and internal
//! state; it never fails on valid input.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use serde_json::json;

use crate::clock::{Seconds, SharedClock};
use crate::models::{Action, Decision, Intent, Reason};
use crate::state_machine::SalePhase;

/// Tunable decision policy. Priority and modifier tables are data, not code
/// branches, so deployments can reweight intents without a rebuild.
#[derive(Debug, Clone)]
pub struct BrainConfig {
    /// Minimum seconds between speaks.
    pub min_speak_interval: Seconds,
    /// Force a speak once silence exceeds this.
    pub max_speak_interval: Seconds,
    /// Base post-speak cooldown before priority scaling.
    pub default_cooldown: Seconds,
    pub high_priority_threshold: u8,
    pub auto_speak_priority: u8,
    pub max_queue_size: usize,
    /// Pending-queue entries older than this are dropped.
    pub queue_timeout: Seconds,
    /// Recent-comment ring size for duplicate detection.
    pub duplicate_window: usize,
    /// Word-Jaccard similarity at or above this is a duplicate.
    pub duplicate_similarity: f64,
    pub intent_priority: HashMap<Intent, u8>,
    pub state_modifiers: HashMap<SalePhase, HashMap<Intent, f64>>,
    pub viewer_low_threshold: u64,
    pub viewer_low_multiplier: f64,
    pub viewer_high_threshold: u64,
    pub viewer_high_multiplier: f64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        let intent_priority = HashMap::from([
            (Intent::PurchaseIntent, 10),
            (Intent::PriceQuestion, 9),
            (Intent::ProductQuestion, 8),
            (Intent::Complaint, 7),
            (Intent::Greeting, 6),
            (Intent::Request, 6),
            (Intent::Thanks, 5),
            (Intent::Chitchat, 4),
            (Intent::Unknown, 3),
            (Intent::Spam, 1),
        ]);

        let state_modifiers = HashMap::from([
            (
                SalePhase::Idle,
                HashMap::from([(Intent::Greeting, 1.5), (Intent::Chitchat, 1.2)]),
            ),
            (
                SalePhase::WarmUp,
                HashMap::from([(Intent::ProductQuestion, 1.3)]),
            ),
            (
                SalePhase::Interest,
                HashMap::from([(Intent::PriceQuestion, 1.5)]),
            ),
            (
                SalePhase::Price,
                HashMap::from([(Intent::PurchaseIntent, 2.0)]),
            ),
            (
                SalePhase::Cta,
                HashMap::from([(Intent::PurchaseIntent, 1.5)]),
            ),
            // No bias during COOLDOWN
            (SalePhase::Cooldown, HashMap::new()),
        ]);

        Self {
            min_speak_interval: 3.0,
            max_speak_interval: 15.0,
            default_cooldown: 4.0,
            high_priority_threshold: 7,
            auto_speak_priority: 9,
            max_queue_size: 10,
            queue_timeout: 30.0,
            duplicate_window: 10,
            duplicate_similarity: 0.8,
            intent_priority,
            state_modifiers,
            viewer_low_threshold: 50,
            viewer_low_multiplier: 1.2,
            viewer_high_threshold: 500,
            viewer_high_multiplier: 0.8,
        }
    }
}

/// Everything the engine needs to judge one comment.
#[derive(Debug, Clone)]
pub struct BrainInput {
    pub comment_id: String,
    pub username: String,
    pub comment_text: String,
    pub intent: Intent,
    pub viewer_count: u64,
    pub sale_phase: SalePhase,
    pub is_follower: bool,
    pub is_subscriber: bool,
    pub gift_value: f64,
    /// Depth of the orchestrator's pending queue.
    pub queue_depth: usize,
}

/// Engine statistics surface.
#[derive(Debug, Clone, Serialize)]
pub struct BrainStats {
    pub speak_count: u64,
    pub last_speak_time: Option<Seconds>,
    pub time_since_speak: Seconds,
    pub recent_comments: usize,
}

pub struct DecisionEngine {
    config: BrainConfig,
    clock: SharedClock,
    /// Unset until the first committed speak; the cooldown gate is inactive
    /// before that so a session's first comment can always be spoken.
    last_speak_time: Option<Seconds>,
    speak_count: u64,
    /// Normalized text of recently judged comments, oldest first.
    recent_comments: VecDeque<String>,
}

impl DecisionEngine {
    pub fn new(config: BrainConfig, clock: SharedClock) -> Self {
        let window = config.duplicate_window;
        Self {
            config,
            clock,
            last_speak_time: None,
            speak_count: 0,
            recent_comments: VecDeque::with_capacity(window),
        }
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    /// Judge one comment. Gate order: cooldown, spam, duplicate, then scoring.
    pub fn decide(&mut self, input: &BrainInput) -> Decision {
        let now = self.clock.now();

        // 1. Cooldown gate
        if let Some(last) = self.last_speak_time {
            let elapsed = now - last;
            if elapsed < self.config.min_speak_interval {
                let wait = self.config.min_speak_interval - elapsed;
                let mut decision = Decision::gate(Action::Wait, Reason::TooFast);
                decision.cooldown = wait;
                decision
                    .metadata
                    .insert("wait_time".into(), json!(wait));
                return decision;
            }
        }

        // 2. Spam gate
        if input.intent == Intent::Spam {
            return Decision::gate(Action::Skip, Reason::Spam);
        }

        // 3. Duplicate gate
        let normalized = normalize(&input.comment_text);
        if self.is_duplicate(&normalized) {
            return Decision::gate(Action::Skip, Reason::Duplicate);
        }

        // 4. Priority score
        let mut priority = self.score(input);

        // 5. Starvation boost: lift priority once silence exceeds the max
        // interval so the host never goes quiet indefinitely
        let time_since_speak = now - self.last_speak_time.unwrap_or(0.0);
        if time_since_speak > self.config.max_speak_interval {
            priority = priority.max(self.config.auto_speak_priority);
        }

        // 6. Action choice
        let decision = if priority >= self.config.auto_speak_priority {
            self.speak_decision(input, priority)
        } else if priority >= self.config.high_priority_threshold {
            if input.queue_depth < self.config.max_queue_size {
                self.speak_decision(input, priority)
            } else {
                let mut decision = Decision::gate(Action::Queue, Reason::QueueFull);
                decision.priority = priority;
                decision
            }
        } else {
            let mut decision = Decision::gate(Action::Skip, Reason::LowPriority);
            decision.priority = priority;
            decision
        };

        // 7. Post-hoc: remember the candidate for duplicate detection
        self.track_comment(normalized);

        decision
    }

    /// Commit a speak: the orchestrator calls this after the downstream
    /// publish succeeds.
    pub fn mark_spoken(&mut self) {
        self.last_speak_time = Some(self.clock.now());
        self.speak_count += 1;
    }

    pub fn stats(&self) -> BrainStats {
        let now = self.clock.now();
        BrainStats {
            speak_count: self.speak_count,
            last_speak_time: self.last_speak_time,
            time_since_speak: now - self.last_speak_time.unwrap_or(0.0),
            recent_comments: self.recent_comments.len(),
        }
    }

    fn score(&self, input: &BrainInput) -> u8 {
        let base = *self.config.intent_priority.get(&input.intent).unwrap_or(&3) as f64;

        let state_multiplier = self
            .config
            .state_modifiers
            .get(&input.sale_phase)
            .and_then(|modifiers| modifiers.get(&input.intent))
            .copied()
            .unwrap_or(1.0);

        let viewer_multiplier = if input.viewer_count < self.config.viewer_low_threshold {
            self.config.viewer_low_multiplier
        } else if input.viewer_count > self.config.viewer_high_threshold {
            self.config.viewer_high_multiplier
        } else {
            1.0
        };

        let mut bonus = if input.is_subscriber {
            2.0
        } else if input.is_follower {
            1.0
        } else {
            0.0
        };
        if input.gift_value > 0.0 {
            bonus += (input.gift_value / 100.0).floor().min(3.0);
        }

        let priority = (base * state_multiplier * viewer_multiplier + bonus).floor() as i64;
        priority.clamp(1, 10) as u8
    }

    fn speak_decision(&self, input: &BrainInput, priority: u8) -> Decision {
        let reason = match input.intent {
            Intent::Greeting => Reason::Greeting,
            Intent::PriceQuestion => Reason::PriceQuestion,
            Intent::ProductQuestion => Reason::ProductQuestion,
            Intent::PurchaseIntent => Reason::SaleCta,
            Intent::Thanks | Intent::Chitchat => Reason::Engagement,
            _ => Reason::HighPriority,
        };

        // Higher priority earns a shorter cooldown, clamped to [2, 8]
        let cooldown = (self.config.default_cooldown
            * (1.0 - (priority as f64 - 5.0) * 0.1))
            .clamp(2.0, 8.0);

        let mut metadata = serde_json::Map::new();
        metadata.insert("intent".into(), json!(input.intent.as_str()));
        metadata.insert("sale_state".into(), json!(input.sale_phase.as_str()));
        metadata.insert("viewer_count".into(), json!(input.viewer_count));

        Decision {
            action: Action::Speak,
            reason,
            priority,
            cooldown,
            confidence: 0.8 + priority as f64 / 50.0,
            metadata,
        }
    }

    fn is_duplicate(&self, normalized: &str) -> bool {
        self.recent_comments
            .iter()
            .any(|recent| similarity(normalized, recent) >= self.config.duplicate_similarity)
    }

    fn track_comment(&mut self, normalized: String) {
        if self.recent_comments.len() >= self.config.duplicate_window {
            self.recent_comments.pop_front();
        }
        self.recent_comments.push_back(normalized);
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Word-level Jaccard similarity over whitespace tokens. Equality
/// short-circuits to 1.0.
pub(crate) fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let overlap = words_a.intersection(&words_b).count() as f64;
    let total = words_a.union(&words_b).count() as f64;
    overlap / total
}
