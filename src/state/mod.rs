//! State management module
//! 
//! This module contains the per-phase timer state and the application state
//! that ties the engine to its tick sources.

pub mod app_state;
pub mod timer_state;

// Re-export main types
pub use app_state::AppState;
pub use timer_state::{ComplianceFlag, TimerState, TimerStatus};
