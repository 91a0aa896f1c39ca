//! Sale phase definitions and per-phase configuration.
//!
//! Basic flow: IDLE → WARM_UP → INTEREST → PRICE → CTA → COOLDOWN → IDLE,
//! with HANDLING_QUESTION and CRISIS as interrupt phases.

use serde::{Deserialize, Serialize};

use crate::clock::Seconds;
use crate::models::Intent;

/// Current commercial phase of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalePhase {
    Idle,
    WarmUp,
    Interest,
    Price,
    Cta,
    Cooldown,
    HandlingQuestion,
    Crisis,
}

impl SalePhase {
    pub const ALL: [SalePhase; 8] = [
        SalePhase::Idle,
        SalePhase::WarmUp,
        SalePhase::Interest,
        SalePhase::Price,
        SalePhase::Cta,
        SalePhase::Cooldown,
        SalePhase::HandlingQuestion,
        SalePhase::Crisis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SalePhase::Idle => "IDLE",
            SalePhase::WarmUp => "WARM_UP",
            SalePhase::Interest => "INTEREST",
            SalePhase::Price => "PRICE",
            SalePhase::Cta => "CTA",
            SalePhase::Cooldown => "COOLDOWN",
            SalePhase::HandlingQuestion => "HANDLING_QUESTION",
            SalePhase::Crisis => "CRISIS",
        }
    }

    /// Dwell-time bounds and response style for this phase.
    pub fn config(&self) -> &'static PhaseConfig {
        match self {
            SalePhase::Idle => &IDLE,
            SalePhase::WarmUp => &WARM_UP,
            SalePhase::Interest => &INTEREST,
            SalePhase::Price => &PRICE,
            SalePhase::Cta => &CTA,
            SalePhase::Cooldown => &COOLDOWN,
            SalePhase::HandlingQuestion => &HANDLING_QUESTION,
            SalePhase::Crisis => &CRISIS,
        }
    }
}

/// Static configuration for one phase.
#[derive(Debug, Clone)]
pub struct PhaseConfig {
    /// Minimum dwell before a non-forced transition out is allowed.
    pub min_dwell: Seconds,
    /// Maximum dwell before a timeout transition fires.
    pub max_dwell: Seconds,
    /// Intents that carry extra weight while in this phase.
    pub priority_intents: &'static [Intent],
    /// Style tag handed to the response generator.
    pub response_style: &'static str,
}

static IDLE: PhaseConfig = PhaseConfig {
    min_dwell: 0.0,
    max_dwell: 60.0,
    priority_intents: &[Intent::Greeting, Intent::Chitchat],
    response_style: "friendly",
};

static WARM_UP: PhaseConfig = PhaseConfig {
    min_dwell: 30.0,
    max_dwell: 120.0,
    priority_intents: &[Intent::Greeting, Intent::Chitchat],
    response_style: "enthusiastic",
};

static INTEREST: PhaseConfig = PhaseConfig {
    min_dwell: 45.0,
    max_dwell: 180.0,
    priority_intents: &[Intent::ProductQuestion],
    response_style: "informative",
};

static PRICE: PhaseConfig = PhaseConfig {
    min_dwell: 20.0,
    max_dwell: 90.0,
    priority_intents: &[Intent::PriceQuestion, Intent::PurchaseIntent],
    response_style: "value_focused",
};

static CTA: PhaseConfig = PhaseConfig {
    min_dwell: 15.0,
    max_dwell: 45.0,
    priority_intents: &[Intent::PurchaseIntent],
    response_style: "urgent",
};

static COOLDOWN: PhaseConfig = PhaseConfig {
    min_dwell: 60.0,
    max_dwell: 120.0,
    priority_intents: &[Intent::Thanks, Intent::Chitchat],
    response_style: "calm",
};

static HANDLING_QUESTION: PhaseConfig = PhaseConfig {
    min_dwell: 0.0,
    max_dwell: 60.0,
    priority_intents: &[Intent::ProductQuestion, Intent::PriceQuestion],
    response_style: "helpful",
};

static CRISIS: PhaseConfig = PhaseConfig {
    min_dwell: 0.0,
    max_dwell: 120.0,
    priority_intents: &[Intent::Complaint],
    response_style: "empathetic",
};
