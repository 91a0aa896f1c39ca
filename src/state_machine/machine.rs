//! Sale Flow State Machine
//!
//! Evolves the commercial phase of the conversation through a priority-ordered
//! transition-rule table. Min dwell prevents phase thrash; max dwell (via
//! `check_timeout`) guarantees forward progress; higher-priority rules model
//! interrupts (questions, complaints) that preempt the normal flow.

use std::collections::HashMap;
use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{Seconds, SharedClock};
use crate::models::Intent;
use crate::state_machine::SalePhase;

/// Bounded snapshot history so a long session never grows without limit.
const HISTORY_CAPACITY: usize = 256;

/// Guard predicate evaluated against the machine's current snapshot.
pub type Guard = fn(&PhaseSnapshot) -> bool;

/// One row of the transition table.
#[derive(Clone)]
pub struct TransitionRule {
    pub from: SalePhase,
    pub to: SalePhase,
    pub trigger: &'static str,
    pub guard: Option<Guard>,
    /// Higher priority rules are matched first.
    pub priority: u8,
}

impl TransitionRule {
    const fn new(from: SalePhase, to: SalePhase, trigger: &'static str, priority: u8) -> Self {
        Self {
            from,
            to,
            trigger,
            guard: None,
            priority,
        }
    }
}

fn build_rules() -> Vec<TransitionRule> {
    use SalePhase::*;

    let mut rules = vec![
        // Normal flow
        TransitionRule::new(Idle, WarmUp, "start_warmup", 5),
        TransitionRule::new(Idle, WarmUp, "greeting_received", 5),
        TransitionRule::new(Idle, WarmUp, "timeout", 5),
        TransitionRule::new(WarmUp, Interest, "product_mention", 5),
        TransitionRule::new(WarmUp, Interest, "product_question", 5),
        TransitionRule::new(WarmUp, Interest, "timeout", 5),
        TransitionRule::new(Interest, Price, "price_question", 5),
        TransitionRule::new(Interest, Price, "reveal_price", 5),
        TransitionRule::new(Interest, Price, "timeout", 5),
        TransitionRule::new(Price, Cta, "start_cta", 5),
        TransitionRule::new(Price, Cta, "purchase_intent", 5),
        TransitionRule::new(Price, Cta, "timeout", 5),
        TransitionRule::new(Cta, Cooldown, "cta_complete", 5),
        TransitionRule::new(Cta, Cooldown, "timeout", 5),
        TransitionRule::new(Cooldown, Idle, "cooldown_complete", 5),
        TransitionRule::new(Cooldown, Idle, "timeout", 5),
        TransitionRule::new(Cooldown, WarmUp, "restart_flow", 5),
        // Interrupts: open question preempts the pitch
        TransitionRule::new(WarmUp, HandlingQuestion, "question_received", 8),
        TransitionRule::new(Interest, HandlingQuestion, "question_received", 8),
        TransitionRule::new(Price, HandlingQuestion, "question_received", 8),
        // Complaints preempt everything commercial
        TransitionRule::new(WarmUp, Crisis, "complaint_received", 9),
        TransitionRule::new(Interest, Crisis, "complaint_received", 9),
        TransitionRule::new(Price, Crisis, "complaint_received", 9),
        TransitionRule::new(Cta, Crisis, "complaint_received", 9),
        // Return paths
        TransitionRule::new(HandlingQuestion, Interest, "question_answered", 5),
        TransitionRule::new(Crisis, Cooldown, "crisis_resolved", 5),
    ];

    // Stable sort keeps table order within a priority band
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    rules
}

/// Point-in-time view of the machine.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSnapshot {
    pub phase: SalePhase,
    pub entered_at: Seconds,
    pub dwell: Seconds,
    pub previous_phase: Option<SalePhase>,
    pub transition_count: u64,
    /// Viewer change since this phase was entered.
    pub viewer_delta: i64,
}

/// Accumulated per-phase activity for the session.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PhaseAccum {
    pub speak_count: u64,
    pub total_dwell: Seconds,
}

/// Session-level statistics surface.
#[derive(Debug, Clone, Serialize)]
pub struct MachineStats {
    pub current_phase: SalePhase,
    pub dwell: Seconds,
    pub transition_count: u64,
    pub phase_stats: HashMap<SalePhase, PhaseAccum>,
    pub history_len: usize,
}

pub struct SaleStateMachine {
    clock: SharedClock,
    current: SalePhase,
    entered_at: Seconds,
    previous: Option<SalePhase>,
    transition_count: u64,
    history: VecDeque<PhaseSnapshot>,
    phase_stats: HashMap<SalePhase, PhaseAccum>,
    current_viewers: u64,
    viewers_at_entry: u64,
    rules: Vec<TransitionRule>,
}

impl SaleStateMachine {
    pub fn new(clock: SharedClock) -> Self {
        let entered_at = clock.now();
        Self {
            clock,
            current: SalePhase::Idle,
            entered_at,
            previous: None,
            transition_count: 0,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            phase_stats: SalePhase::ALL
                .iter()
                .map(|phase| (*phase, PhaseAccum::default()))
                .collect(),
            current_viewers: 0,
            viewers_at_entry: 0,
            rules: build_rules(),
        }
    }

    #[inline]
    pub fn phase(&self) -> SalePhase {
        self.current
    }

    /// Seconds spent in the current phase.
    #[inline]
    pub fn dwell(&self) -> Seconds {
        self.clock.now() - self.entered_at
    }

    pub fn response_style(&self) -> &'static str {
        self.current.config().response_style
    }

    /// Intents the current phase gives preferential treatment.
    pub fn priority_intents(&self) -> &'static [Intent] {
        self.current.config().priority_intents
    }

    /// Whether any rule would fire for this trigger from the current phase.
    pub fn can_transition(&self, trigger: &str) -> bool {
        let snapshot = self.snapshot();
        self.rules.iter().any(|rule| {
            rule.from == self.current
                && rule.trigger == trigger
                && rule.guard.map_or(true, |guard| guard(&snapshot))
        })
    }

    /// Attempt a transition. Picks the highest-priority matching rule; refuses
    /// when the current dwell is below the phase's minimum unless forced.
    pub fn transition(&mut self, trigger: &str, force: bool) -> bool {
        let snapshot = self.snapshot();
        let target = self
            .rules
            .iter()
            .find(|rule| {
                rule.from == self.current
                    && rule.trigger == trigger
                    && (force || rule.guard.map_or(true, |guard| guard(&snapshot)))
            })
            .map(|rule| rule.to);

        let Some(target) = target else {
            return false;
        };

        if !force && snapshot.dwell < self.current.config().min_dwell {
            debug!(
                phase = self.current.as_str(),
                trigger,
                dwell = snapshot.dwell,
                min_dwell = self.current.config().min_dwell,
                "transition refused: min dwell not reached"
            );
            return false;
        }

        self.execute_transition(target, trigger);
        true
    }

    /// Fire the timeout trigger once the phase has exhausted its max dwell.
    pub fn check_timeout(&mut self) -> bool {
        if self.dwell() >= self.current.config().max_dwell {
            return self.transition("timeout", false);
        }
        false
    }

    /// Unconditionally set a phase, bypassing the rule table.
    pub fn force_phase(&mut self, phase: SalePhase, reason: &str) {
        self.execute_transition(phase, reason);
    }

    fn execute_transition(&mut self, target: SalePhase, trigger: &str) {
        let now = self.clock.now();
        let old = self.current;

        // Finalize the leaving phase before the new entered_at is set
        let snapshot = PhaseSnapshot {
            phase: old,
            entered_at: self.entered_at,
            dwell: now - self.entered_at,
            previous_phase: self.previous,
            transition_count: self.transition_count,
            viewer_delta: self.current_viewers as i64 - self.viewers_at_entry as i64,
        };
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        if let Some(accum) = self.phase_stats.get_mut(&old) {
            accum.total_dwell += snapshot.dwell;
        }
        self.history.push_back(snapshot);

        self.previous = Some(old);
        self.current = target;
        self.entered_at = now;
        self.transition_count += 1;
        self.viewers_at_entry = self.current_viewers;

        info!(
            from = old.as_str(),
            to = target.as_str(),
            trigger,
            "phase transition"
        );
    }

    pub fn update_viewer_count(&mut self, count: u64) {
        self.current_viewers = count;
    }

    pub fn notify_speak(&mut self) {
        if let Some(accum) = self.phase_stats.get_mut(&self.current) {
            accum.speak_count += 1;
        }
    }

    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            phase: self.current,
            entered_at: self.entered_at,
            dwell: self.dwell(),
            previous_phase: self.previous,
            transition_count: self.transition_count,
            viewer_delta: self.current_viewers as i64 - self.viewers_at_entry as i64,
        }
    }

    pub fn stats(&self) -> MachineStats {
        MachineStats {
            current_phase: self.current,
            dwell: self.dwell(),
            transition_count: self.transition_count,
            phase_stats: self.phase_stats.clone(),
            history_len: self.history.len(),
        }
    }

    pub fn reset(&mut self) {
        self.current = SalePhase::Idle;
        self.entered_at = self.clock.now();
        self.previous = None;
        self.transition_count = 0;
        self.history.clear();
        for accum in self.phase_stats.values_mut() {
            *accum = PhaseAccum::default();
        }
        self.viewers_at_entry = self.current_viewers;
    }
}
