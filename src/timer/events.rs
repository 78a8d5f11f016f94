//! Outward notifications from the timer engine
//!
//! Events fan out over a `tokio::broadcast` channel. A subscriber that falls
//! more than the channel capacity behind loses the oldest events and sees
//! `RecvError::Lagged`. Completions and compliance advisories are also
//! written to the log by the engine itself, which is the record that
//! survives a lagging subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::state::ComplianceFlag;

/// Events emitted by the engine and the tick registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEvent {
    /// Countdown reached zero
    PhaseComplete {
        phase_id: String,
        batch_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A compliance checkpoint was still unconfirmed when the phase completed
    ComplianceAdvisory {
        phase_id: String,
        flag: ComplianceFlag,
        batch_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Bath phase tools are now past their nominal soak time
    OverExposureStarted {
        phase_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A restored checkpoint was inconsistent with the phase duration
    CheckpointStale {
        phase_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A worker tick source failed and the timer fell back to interval ticking
    TickSourceDegraded {
        phase_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl TimerEvent {
    pub fn phase_id(&self) -> &str {
        match self {
            TimerEvent::PhaseComplete { phase_id, .. }
            | TimerEvent::ComplianceAdvisory { phase_id, .. }
            | TimerEvent::OverExposureStarted { phase_id, .. }
            | TimerEvent::CheckpointStale { phase_id, .. }
            | TimerEvent::TickSourceDegraded { phase_id, .. } => phase_id,
        }
    }

    pub fn phase_complete(phase_id: &str, batch_id: Option<String>) -> Self {
        TimerEvent::PhaseComplete {
            phase_id: phase_id.to_string(),
            batch_id,
            timestamp: Utc::now(),
        }
    }

    pub fn compliance_advisory(
        phase_id: &str,
        flag: ComplianceFlag,
        batch_id: Option<String>,
    ) -> Self {
        TimerEvent::ComplianceAdvisory {
            phase_id: phase_id.to_string(),
            flag,
            batch_id,
            timestamp: Utc::now(),
        }
    }

    pub fn over_exposure_started(phase_id: &str) -> Self {
        TimerEvent::OverExposureStarted {
            phase_id: phase_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn checkpoint_stale(phase_id: &str, reason: impl Into<String>) -> Self {
        TimerEvent::CheckpointStale {
            phase_id: phase_id.to_string(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn tick_source_degraded(phase_id: &str, reason: impl Into<String>) -> Self {
        TimerEvent::TickSourceDegraded {
            phase_id: phase_id.to_string(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast bus for `TimerEvent`s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TimerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: TimerEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("No subscribers for {} event: {:?}", e.0.phase_id(), e.0);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
