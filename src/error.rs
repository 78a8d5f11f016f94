//! Error types for the sterilization timer service

use thiserror::Error;

/// Result type used by timer operations
pub type Result<T> = std::result::Result<T, TimerError>;

/// Errors surfaced by user intents and startup.
///
/// The tick path never produces one of these; see `TickOutcome`.
#[derive(Error, Debug)]
pub enum TimerError {
    /// No phase with this id exists in the phase table
    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// I/O error from the durable store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
