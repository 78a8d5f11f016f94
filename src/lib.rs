//! Steri Timer - Sterilization phase timers with compliance checkpoints
//! 
//! This library tracks multi-stage tool sterilization (bath soak, drying,
//! autoclave), persists timer checkpoints so progress survives restarts,
//! raises compliance advisories for unconfirmed indicator checks, and warns
//! when bath-phase tools are over-exposed.

pub mod config;
pub mod error;
pub mod state;
pub mod timer;
pub mod api;
pub mod services;
pub mod tasks;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, TimerError};
pub use state::AppState;
pub use timer::TimerEngine;
pub use api::create_router;
pub use utils::signals::shutdown_signal;
