//! Operational log for timer events

use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{info, warn};

use crate::timer::TimerEvent;

/// Background task that writes every engine event to the operational log
pub async fn event_log_task(mut events: Receiver<TimerEvent>) {
    info!("Starting timer event log task");

    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(missed)) => {
                warn!(target: "audit", "Event log fell behind, {} event(s) not recorded", missed);
            }
            Err(RecvError::Closed) => {
                info!("Event bus closed, stopping event log task");
                break;
            }
        }
    }
}

/// Write a single event to the `audit` log target
pub fn log_event(event: &TimerEvent) {
    match event {
        TimerEvent::PhaseComplete { phase_id, batch_id, timestamp } => {
            info!(target: "audit", %timestamp, ?batch_id, "phase {} complete", phase_id);
        }
        TimerEvent::ComplianceAdvisory { phase_id, flag, batch_id, timestamp } => {
            warn!(
                target: "audit",
                %timestamp,
                ?batch_id,
                "compliance advisory: phase {} completed without {}",
                phase_id,
                flag
            );
        }
        TimerEvent::OverExposureStarted { phase_id, timestamp } => {
            warn!(target: "audit", %timestamp, "over-exposure: tools still in bath {}", phase_id);
        }
        TimerEvent::CheckpointStale { phase_id, reason, timestamp } => {
            warn!(target: "audit", %timestamp, "stale checkpoint for {}: {}", phase_id, reason);
        }
        TimerEvent::TickSourceDegraded { phase_id, reason, timestamp } => {
            warn!(target: "audit", %timestamp, "tick source degraded for {}: {}", phase_id, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::EventBus;
    use std::time::Duration;

    #[tokio::test]
    async fn task_stops_when_bus_is_dropped() {
        let bus = EventBus::new(8);
        let task = tokio::spawn(event_log_task(bus.subscribe()));

        bus.emit(TimerEvent::phase_complete("bath", None));
        bus.emit(TimerEvent::checkpoint_stale("bath", "too old"));
        drop(bus);

        let finished = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(matches!(finished, Ok(Ok(()))));
    }
}
