//! API request and response structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    state::{ComplianceFlag, TimerState},
    tasks::{Capability, TickDiagnostics},
    timer::{
        phase::ReadingDeviation,
        progress::{format_duration, progress_percent},
        PhaseConfig, PhaseKind,
    },
};

/// Timer state plus the display strings the UI renders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerView {
    #[serde(flatten)]
    pub state: TimerState,
    pub remaining_display: String,
    pub elapsed_display: String,
    pub over_exposure_display: String,
    pub progress_percent: f64,
}

impl From<TimerState> for TimerView {
    fn from(state: TimerState) -> Self {
        Self {
            remaining_display: format_duration(state.time_remaining),
            elapsed_display: format_duration(state.elapsed_time),
            over_exposure_display: format_duration(state.over_exposure_time),
            progress_percent: progress_percent(state.elapsed_time, state.nominal_duration),
            state,
        }
    }
}

/// Body of POST /timers/:phase_id/compliance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRequest {
    pub flag: ComplianceFlag,
    pub value: bool,
}

/// Body of POST /timers/:phase_id/batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub batch_id: Option<String>,
}

/// One row of GET /phases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResponse {
    pub id: String,
    pub kind: PhaseKind,
    #[serde(flatten)]
    pub config: PhaseConfig,
    pub duration_display: String,
}

/// Result of POST /phases/:phase_id/validate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub phase_id: String,
    pub within_tolerance: bool,
    pub deviations: Vec<ReadingDeviation>,
}

/// Tick source health for an operations dashboard
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsResponse {
    pub uptime: String,
    pub tick_interval_ms: u64,
    pub capability: Capability,
    pub active_tick_sources: usize,
    pub tick_sources: Vec<TickDiagnostics>,
    pub last_action: Option<String>,
    pub last_action_time: Option<DateTime<Utc>>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    /// Create a new health response
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_view_formats_progress() {
        let mut state = TimerState::new("bath", 1800);
        state.time_remaining = 900;
        state.elapsed_time = 900;

        let view = TimerView::from(state);
        assert_eq!(view.remaining_display, "15:00");
        assert_eq!(view.elapsed_display, "15:00");
        assert_eq!(view.progress_percent, 50.0);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["phase_id"], "bath");
        assert_eq!(json["time_remaining"], 900);
        assert_eq!(json["status"], "idle");
    }
}
