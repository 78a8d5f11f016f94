//! Configuration and CLI argument handling

use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    error::{Result, TimerError},
    timer::PhaseTable,
};

/// CLI argument parsing structure
#[derive(Parser, Debug, Clone)]
#[command(name = "steri-timer")]
#[command(about = "Sterilization phase-timer service with compliance checkpoints")]
#[command(version)]
pub struct Config {
    /// Port to bind the server to
    #[arg(short, long, env = "STERI_PORT", default_value = "20560")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, env = "STERI_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Tick source cadence in milliseconds
    #[arg(long, env = "STERI_TICK_INTERVAL_MS", default_value = "100")]
    pub tick_interval_ms: u64,

    /// File holding timer checkpoints across restarts
    #[arg(long, env = "STERI_CHECKPOINT_FILE", default_value = "steri-checkpoints.json")]
    pub checkpoint_file: PathBuf,

    /// JSON file overriding or extending the default phase table
    #[arg(long, env = "STERI_PHASES")]
    pub phases: Option<PathBuf>,

    /// Tick on the async runtime instead of dedicated worker threads
    #[arg(long, env = "STERI_NO_WORKER")]
    pub no_worker: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// Reject values the timer core cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(10..=1000).contains(&self.tick_interval_ms) {
            return Err(TimerError::InvalidConfig(format!(
                "tick interval must be between 10 and 1000 ms, got {}",
                self.tick_interval_ms
            )));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Load the phase table, applying overrides when a file was given
    pub fn phase_table(&self) -> Result<PhaseTable> {
        match &self.phases {
            Some(path) => PhaseTable::load_with_overrides(path),
            None => Ok(PhaseTable::default()),
        }
    }

    /// Get the server address as a formatted string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the appropriate log level based on verbose flag
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}
