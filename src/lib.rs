//! Livehost Core
//!
//! Real-time decision and orchestration core for an autonomous livestream
//! virtual host: classified comments come in over a durable work queue, the
//! decision engine chooses whether the host speaks and with what priority,
//! the sale flow state machine biases decisions toward the current
//! commercial phase, and the event log records everything for quality
//! metrics.

pub mod brain;
pub mod bus;
pub mod clock;
pub mod config;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod state_machine;

pub use brain::{BrainConfig, BrainInput, DecisionEngine};
pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock};
pub use config::Config;
pub use models::{Action, ClassifiedComment, Decision, Intent, Reason, SpeakRequest};
pub use observability::{EventLog, MetricsSummary, SessionLog};
pub use orchestrator::{Orchestrator, SpeakSink, ViewerFeed};
pub use state_machine::{SalePhase, SaleStateMachine};
