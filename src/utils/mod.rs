//! Utility functions module
//! 
//! This module contains utility functions used throughout the application.

pub mod clock;
pub mod signals;

// Re-export main functions
pub use clock::{ManualClock, SystemClock, WallClock};
pub use signals::shutdown_signal;
