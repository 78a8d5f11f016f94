//! Sterilization phase-timer core
//! 
//! This module contains the phase table, the timer engine and the policy
//! pieces it applies on completion (compliance gate, over-exposure monitor).

pub mod compliance;
pub mod engine;
pub mod events;
pub mod overexposure;
pub mod phase;
pub mod progress;

// Re-export main types
pub use engine::{Mounted, TickOutcome, TimerEngine};
pub use events::{EventBus, TimerEvent};
pub use phase::{PhaseConfig, PhaseKind, PhaseReading, PhaseTable, Target};
