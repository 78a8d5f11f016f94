//! HTTP endpoint handlers

use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::{error, info, warn};

use crate::{
    error::TimerError,
    state::{AppState, TimerState},
    timer::{phase::PhaseReading, progress::format_duration, PhaseKind},
};
use super::responses::{
    BatchRequest, ComplianceRequest, DiagnosticsResponse, HealthResponse, PhaseResponse,
    TimerView, ValidationResponse,
};

type TimerResult = Result<Json<TimerView>, StatusCode>;

/// Map an intent result onto an HTTP response
fn respond(action: &str, phase_id: &str, result: Result<TimerState, TimerError>) -> TimerResult {
    match result {
        Ok(state) => Ok(Json(TimerView::from(state))),
        Err(TimerError::UnknownPhase(id)) => {
            warn!("{} requested for unknown phase {}", action, id);
            Err(StatusCode::NOT_FOUND)
        }
        Err(e) => {
            error!("Failed to {} {}: {}", action, phase_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Handle GET /phases - List the configured phase table
pub async fn phases_handler(State(state): State<Arc<AppState>>) -> Json<Vec<PhaseResponse>> {
    let phases = state
        .engine
        .phases()
        .iter()
        .map(|(id, config)| PhaseResponse {
            id: id.to_string(),
            kind: PhaseKind::from_id(id),
            duration_display: format_duration(config.duration),
            config: config.clone(),
        })
        .collect();
    Json(phases)
}

/// Handle POST /phases/:phase_id/validate - Check a reading against tolerance bands
pub async fn validate_handler(
    State(state): State<Arc<AppState>>,
    Path(phase_id): Path<String>,
    Json(reading): Json<PhaseReading>,
) -> Result<Json<ValidationResponse>, StatusCode> {
    let config = state.engine.phases().get(&phase_id).ok_or(StatusCode::NOT_FOUND)?;
    let deviations = config.validate(&reading);

    if !deviations.is_empty() {
        warn!("Reading for {} outside tolerance: {:?}", phase_id, deviations);
    }

    Ok(Json(ValidationResponse {
        phase_id,
        within_tolerance: deviations.is_empty(),
        deviations,
    }))
}

/// Handle GET /timers - Return every tracked timer
pub async fn timers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<TimerView>> {
    Json(state.timers().into_iter().map(TimerView::from).collect())
}

/// Handle GET /timers/:phase_id - Return one timer
pub async fn timer_handler(
    State(state): State<Arc<AppState>>,
    Path(phase_id): Path<String>,
) -> TimerResult {
    respond("read", &phase_id, state.timer(&phase_id))
}

/// Handle POST /timers/:phase_id/start - Start or resume a timer
pub async fn start_handler(
    State(state): State<Arc<AppState>>,
    Path(phase_id): Path<String>,
) -> TimerResult {
    info!("Start requested for {}", phase_id);
    respond("start", &phase_id, state.start(&phase_id))
}

/// Handle POST /timers/:phase_id/pause - Pause a running timer
pub async fn pause_handler(
    State(state): State<Arc<AppState>>,
    Path(phase_id): Path<String>,
) -> TimerResult {
    info!("Pause requested for {}", phase_id);
    respond("pause", &phase_id, state.pause(&phase_id))
}

/// Handle POST /timers/:phase_id/reset - Reset a timer to its nominal duration
pub async fn reset_handler(
    State(state): State<Arc<AppState>>,
    Path(phase_id): Path<String>,
) -> TimerResult {
    info!("Reset requested for {}", phase_id);
    respond("reset", &phase_id, state.reset(&phase_id))
}

/// Handle POST /timers/:phase_id/compliance - Confirm a compliance checkpoint
pub async fn compliance_handler(
    State(state): State<Arc<AppState>>,
    Path(phase_id): Path<String>,
    Json(request): Json<ComplianceRequest>,
) -> TimerResult {
    respond(
        "confirm compliance for",
        &phase_id,
        state.confirm_compliance(&phase_id, request.flag, request.value),
    )
}

/// Handle POST /timers/:phase_id/batch - Assign or clear the batch id
pub async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Path(phase_id): Path<String>,
    Json(request): Json<BatchRequest>,
) -> TimerResult {
    respond("assign batch to", &phase_id, state.assign_batch(&phase_id, request.batch_id))
}

/// Handle POST /timers/:from/handoff/:to - Carry the batch id to the next phase
pub async fn handoff_handler(
    State(state): State<Arc<AppState>>,
    Path((from, to)): Path<(String, String)>,
) -> TimerResult {
    respond("hand off to", &to, state.handoff(&from, &to))
}

/// Handle GET /diagnostics - Tick source accuracy and worker support
pub async fn diagnostics_handler(State(state): State<Arc<AppState>>) -> Json<DiagnosticsResponse> {
    let (last_action, last_action_time) = state.get_last_action();

    Json(DiagnosticsResponse {
        uptime: state.get_uptime(),
        tick_interval_ms: state.ticks.period().as_millis() as u64,
        capability: state.ticks.capability(),
        active_tick_sources: state.ticks.active_count(),
        tick_sources: state.ticks.diagnostics(),
        last_action,
        last_action_time,
    })
}

/// Handle GET /health - Health check endpoint
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
