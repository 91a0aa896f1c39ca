//! Central decision engine.

mod engine;

pub use engine::{BrainConfig, BrainInput, BrainStats, DecisionEngine};

pub(crate) use engine::similarity;
