//! Main application state management

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{ComplianceFlag, TimerState, TimerStatus};
use crate::{
    error::Result,
    tasks::TickRegistry,
    timer::TimerEngine,
};

/// Main application state: one sterilization session's engine and tick sources
///
/// This is the only mutation entry point exposed to the API. Every intent
/// goes to the engine first and then brings the tick registry in line.
#[derive(Debug)]
pub struct AppState {
    pub engine: Arc<TimerEngine>,
    pub ticks: TickRegistry,
    /// Server metadata
    pub start_time: Instant,
    pub port: u16,
    pub host: String,
    /// Last action tracking
    pub last_action: Arc<Mutex<Option<String>>>,
    pub last_action_time: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl AppState {
    /// Create a new AppState around an engine and its tick registry
    pub fn new(engine: Arc<TimerEngine>, ticks: TickRegistry, port: u16, host: String) -> Self {
        Self {
            engine,
            ticks,
            start_time: Instant::now(),
            port,
            host,
            last_action: Arc::new(Mutex::new(None)),
            last_action_time: Arc::new(Mutex::new(None)),
        }
    }

    fn record_action(&self, action: String) {
        if let Ok(mut last_action) = self.last_action.lock() {
            *last_action = Some(action);
        }
        if let Ok(mut last_time) = self.last_action_time.lock() {
            *last_time = Some(Utc::now());
        }
    }

    /// Mount one timer, resuming background ticking if its checkpoint says so
    pub fn mount(&self, phase_id: &str) -> Result<TimerState> {
        let mounted = self.engine.mount(phase_id)?;
        if mounted.resume {
            self.ticks.engage(phase_id, mounted.state.epoch());
        } else if mounted.state.status == TimerStatus::OverExposed {
            self.ticks.watch_over_exposure(phase_id, mounted.state.epoch());
        }
        Ok(mounted.state)
    }

    /// Mount every configured phase. Returns how many timers resumed running.
    pub fn restore_timers(&self) -> usize {
        let ids: Vec<String> = self.engine.phases().ids().map(str::to_string).collect();
        let mut resumed = 0;
        for id in ids {
            match self.mount(&id) {
                Ok(state) if state.is_running => resumed += 1,
                Ok(_) => {}
                Err(e) => warn!("Failed to restore timer {}: {}", id, e),
            }
        }
        info!("Restored timers, {} resumed running", resumed);
        resumed
    }

    /// Start a phase timer
    pub fn start(&self, phase_id: &str) -> Result<TimerState> {
        if let Some(epoch) = self.engine.start(phase_id)? {
            self.ticks.engage(phase_id, epoch);
        }
        self.record_action(format!("start {}", phase_id));
        self.engine.state(phase_id)
    }

    /// Pause a phase timer; its tick source is gone by the time this returns
    pub fn pause(&self, phase_id: &str) -> Result<TimerState> {
        let state = self.engine.pause(phase_id)?;
        self.ticks.terminate(phase_id);
        self.record_action(format!("pause {}", phase_id));
        Ok(state)
    }

    /// Reset a phase timer and stop all of its background work
    pub fn reset(&self, phase_id: &str) -> Result<TimerState> {
        let state = self.engine.reset(phase_id)?;
        self.ticks.terminate(phase_id);
        self.record_action(format!("reset {}", phase_id));
        Ok(state)
    }

    /// Record an operator compliance confirmation
    pub fn confirm_compliance(
        &self,
        phase_id: &str,
        flag: ComplianceFlag,
        value: bool,
    ) -> Result<TimerState> {
        let state = self.engine.set_compliance_flag(phase_id, flag, value)?;
        self.record_action(format!("confirm {} {}={}", phase_id, flag, value));
        Ok(state)
    }

    /// Associate a batch with a phase timer
    pub fn assign_batch(&self, phase_id: &str, batch_id: Option<String>) -> Result<TimerState> {
        let state = self.engine.set_batch_id(phase_id, batch_id)?;
        self.record_action(format!("batch {}", phase_id));
        Ok(state)
    }

    /// Carry the batch from one phase to the next
    pub fn handoff(&self, from: &str, to: &str) -> Result<TimerState> {
        let state = self.engine.handoff(from, to)?;
        self.record_action(format!("handoff {} -> {}", from, to));
        Ok(state)
    }

    pub fn timer(&self, phase_id: &str) -> Result<TimerState> {
        self.engine.state(phase_id)
    }

    pub fn timers(&self) -> Vec<TimerState> {
        self.engine.snapshot()
    }

    /// Terminate every tick source and monitor as a batch
    pub fn shutdown(&self) -> usize {
        self.ticks.terminate_all()
    }

    /// Calculate server uptime as a formatted string
    pub fn get_uptime(&self) -> String {
        let duration = self.start_time.elapsed();
        let hours = duration.as_secs() / 3600;
        let minutes = (duration.as_secs() % 3600) / 60;
        let seconds = duration.as_secs() % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    /// Get last action information
    pub fn get_last_action(&self) -> (Option<String>, Option<DateTime<Utc>>) {
        let last_action = self.last_action.lock().ok().and_then(|a| a.clone());
        let last_action_time = self.last_action_time.lock().ok().and_then(|t| *t);
        (last_action, last_action_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{CheckpointStore, MemoryStore},
        tasks::Capability,
        timer::{EventBus, PhaseTable},
        utils::SystemClock,
    };
    use std::time::Duration;

    fn app() -> AppState {
        let checkpoints = CheckpointStore::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock));
        let engine = Arc::new(TimerEngine::new(PhaseTable::default(), checkpoints, EventBus::new(32)));
        let ticks = TickRegistry::new(Arc::clone(&engine), Duration::from_millis(100), Capability::interval_only());
        AppState::new(engine, ticks, 0, "127.0.0.1".to_string())
    }

    #[tokio::test]
    async fn start_engages_and_reset_terminates() {
        let app = app();
        let state = app.start("drying").unwrap();
        assert!(state.is_running);
        assert_eq!(app.ticks.active_count(), 1);

        let state = app.reset("drying").unwrap();
        assert!(!state.is_running);
        assert_eq!(state.time_remaining, 900);
        assert_eq!(app.ticks.active_count(), 0);
        assert_eq!(app.get_last_action().0.as_deref(), Some("reset drying"));
    }

    #[tokio::test]
    async fn restore_mounts_every_phase() {
        let app = app();
        assert_eq!(app.restore_timers(), 0);
        assert_eq!(app.timers().len(), 3);
    }

    #[tokio::test]
    async fn shutdown_stops_all_sources() {
        let app = app();
        app.start("bath").unwrap();
        app.start("autoclave").unwrap();
        assert_eq!(app.shutdown(), 2);
        assert_eq!(app.ticks.active_count(), 0);
    }

    #[tokio::test]
    async fn restored_over_exposure_is_watched() {
        let checkpoints = CheckpointStore::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock));
        checkpoints.save_over_exposure("bath");
        let engine = Arc::new(TimerEngine::new(PhaseTable::default(), checkpoints, EventBus::new(32)));
        let ticks = TickRegistry::new(Arc::clone(&engine), Duration::from_millis(100), Capability::interval_only());
        let app = AppState::new(engine, ticks, 0, "127.0.0.1".to_string());

        let bath = app.mount("bath").unwrap();
        assert!(bath.overexposed);
        assert_eq!(bath.status, TimerStatus::OverExposed);
        assert_eq!(app.ticks.active_count(), 1);

        app.reset("bath").unwrap();
        assert_eq!(app.ticks.active_count(), 0);
    }

    #[test]
    fn unknown_phase_is_rejected() {
        let app = app();
        assert!(app.pause("rinse").is_err());
    }
}
