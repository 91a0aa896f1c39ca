//! Sale flow phase controller.

mod machine;
mod phases;

pub use machine::{MachineStats, PhaseAccum, PhaseSnapshot, SaleStateMachine, TransitionRule};
pub use phases::{PhaseConfig, SalePhase};
