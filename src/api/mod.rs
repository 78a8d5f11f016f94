//! HTTP API module
//! 
//! This module contains all HTTP endpoint handlers and response structures.

pub mod handlers;
pub mod responses;

use std::sync::Arc;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use handlers::*;

/// Create the HTTP router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/phases", get(phases_handler))
        .route("/phases/:phase_id/validate", post(validate_handler))
        .route("/timers", get(timers_handler))
        .route("/timers/:phase_id", get(timer_handler))
        .route("/timers/:phase_id/start", post(start_handler))
        .route("/timers/:phase_id/pause", post(pause_handler))
        .route("/timers/:phase_id/reset", post(reset_handler))
        .route("/timers/:phase_id/compliance", post(compliance_handler))
        .route("/timers/:phase_id/batch", post(batch_handler))
        .route("/timers/:from/handoff/:to", post(handoff_handler))
        .route("/diagnostics", get(diagnostics_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
