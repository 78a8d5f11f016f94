//! Steri Timer - Sterilization phase-timer service
//! 
//! This is the main entry point for the steri-timer application.

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use steri_timer::{
    api::create_router,
    config::Config,
    services::{CheckpointStore, FileStore},
    state::AppState,
    tasks::{event_log_task, Capability, TickRegistry},
    timer::{EventBus, TimerEngine},
    utils::{shutdown_signal, SystemClock},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing with appropriate log level
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "steri_timer={level},audit={level},tower_http=info",
            level = config.log_level()
        ))
        .init();

    info!("Starting steri-timer server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: host={}, port={}, tick={}ms, checkpoints={}",
          config.host, config.port, config.tick_interval_ms, config.checkpoint_file.display());

    config.validate()?;
    let phases = config.phase_table()?;
    let store = Arc::new(FileStore::open(&config.checkpoint_file)?);
    let checkpoints = CheckpointStore::new(store, Arc::new(SystemClock));

    let events = EventBus::default();
    tokio::spawn(event_log_task(events.subscribe()));

    let engine = Arc::new(TimerEngine::new(phases, checkpoints, events));
    let ticks = TickRegistry::new(
        Arc::clone(&engine),
        config.tick_interval(),
        Capability::probe(!config.no_worker),
    );

    // Create application state and pick up timers that were running before the restart
    let state = Arc::new(AppState::new(engine, ticks, config.port, config.host.clone()));
    state.restore_timers();

    // Create HTTP router with all endpoints
    let app = create_router(Arc::clone(&state));

    // Bind to the specified address
    let addr = config.address();
    let listener = TcpListener::bind(&addr).await?;

    info!("Server running on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /phases                        - Phase table");
    info!("  POST /phases/:id/validate           - Check a temperature/pressure reading");
    info!("  GET  /timers, /timers/:id           - Timer state");
    info!("  POST /timers/:id/start|pause|reset  - Timer intents");
    info!("  POST /timers/:id/compliance         - Confirm ciStripIncluded / biTestPassed");
    info!("  POST /timers/:id/batch              - Assign batch id");
    info!("  POST /timers/:from/handoff/:to      - Carry batch to next phase");
    info!("  GET  /diagnostics                   - Tick source accuracy");
    info!("  GET  /health                        - Health check");

    // Setup graceful shutdown
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    let stopped = state.shutdown();
    info!("Server shutdown complete ({} tick source(s) stopped)", stopped);
    Ok(())
}
