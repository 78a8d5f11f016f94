//! Background tasks module
//! 
//! This module contains the tick sources that drive running timers and the
//! background tasks that run alongside the HTTP server.

pub mod event_log;
pub mod tick_registry;
pub mod tick_source;

// Re-export main types and functions
pub use event_log::event_log_task;
pub use tick_registry::TickRegistry;
pub use tick_source::{accuracy_score, Capability, TickDiagnostics, TickSource, TickSourceKind};
