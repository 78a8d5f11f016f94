//! Checkpoint persistence
//!
//! All durability for the timer core lives here. Each phase has a
//! `timer-<phase>` key holding its remaining time and implied start
//! timestamp, plus the batch the timer was carrying. The batch id also sits
//! under a separate, longer-lived key that survives the drying → autoclave
//! handoff. A bath phase that ran past its soak time keeps an
//! `overexposed-<phase>` record until it is reset.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::storage::KeyValueStore;
use crate::{state::TimerState, timer::progress::remaining_seconds, utils::WallClock};

const BATCH_KEY: &str = "batch-id";

/// Persisted record, one per phase id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub remaining_seconds: u64,
    /// Wall-clock time at which the timer would have started had it run uninterrupted
    pub started_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
    pub running: bool,
    #[serde(default)]
    pub batch_id: Option<String>,
}

/// When a bath phase began counting over-exposure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverExposureRecord {
    pub started_at: DateTime<Utc>,
}

/// Timer position implied by a stored checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Restored {
    pub time_remaining: u64,
    pub elapsed_time: u64,
    /// The timer was running when saved and should be re-engaged
    pub running: bool,
    pub batch_id: Option<String>,
    /// Why the checkpoint could not be trusted, if it could not
    pub stale: Option<String>,
}

impl Restored {
    pub fn is_stale(&self) -> bool {
        self.stale.is_some()
    }
}

/// Save/restore/clear contract over a `KeyValueStore`
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn WallClock>,
}

impl fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("store", &self.store)
            .field("clock", &self.clock)
            .finish()
    }
}

fn timer_key(phase_id: &str) -> String {
    format!("timer-{}", phase_id)
}

fn over_exposure_key(phase_id: &str) -> String {
    format!("overexposed-{}", phase_id)
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn WallClock>) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record remaining time for a phase along with its implied start timestamp
    pub fn save(&self, phase_id: &str, remaining_seconds: u64, nominal_duration: u64, running: bool) {
        self.write(phase_id, remaining_seconds, nominal_duration, running, None);
    }

    /// Checkpoint a timer's current position and batch
    pub fn save_timer(&self, timer: &TimerState) {
        self.write(
            &timer.phase_id,
            timer.time_remaining,
            timer.nominal_duration,
            timer.is_running,
            timer.batch_id.clone(),
        );
    }

    fn write(
        &self,
        phase_id: &str,
        remaining_seconds: u64,
        nominal_duration: u64,
        running: bool,
        batch_id: Option<String>,
    ) {
        let saved_at = self.clock.now();
        let elapsed = nominal_duration.saturating_sub(remaining_seconds);
        let checkpoint = Checkpoint {
            remaining_seconds,
            started_at: saved_at - Duration::seconds(elapsed as i64),
            saved_at,
            running,
            batch_id,
        };

        match serde_json::to_string(&checkpoint) {
            Ok(value) => self.store.save(&timer_key(phase_id), &value),
            Err(e) => warn!("Failed to encode checkpoint for {}: {}", phase_id, e),
        }
    }

    /// Read the raw checkpoint for a phase
    pub fn load(&self, phase_id: &str) -> Option<Checkpoint> {
        let raw = self.store.load(&timer_key(phase_id))?;
        match serde_json::from_str(&raw) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!("Discarding unreadable checkpoint for {}: {}", phase_id, e);
                self.store.remove(&timer_key(phase_id));
                None
            }
        }
    }

    /// Work out where a phase timer stands from its checkpoint.
    ///
    /// A running checkpoint replays the wall-clock time since its implied
    /// start, capped at `nominal_duration`. A remaining value above the
    /// nominal duration, or an age beyond it, marks the result stale.
    pub fn restore(&self, phase_id: &str, nominal_duration: u64) -> Option<Restored> {
        let checkpoint = self.load(phase_id)?;
        let mut stale = None;

        let mut remaining = checkpoint.remaining_seconds;
        if remaining > nominal_duration {
            stale = Some(format!(
                "stored remaining time {}s exceeds nominal duration {}s",
                remaining, nominal_duration
            ));
            remaining = nominal_duration;
        }
        let recorded_elapsed = nominal_duration - remaining;

        let elapsed = if checkpoint.running && stale.is_none() {
            let since_start = (self.clock.now() - checkpoint.started_at).num_seconds().max(0) as u64;
            // a clock that went backwards must not hand back time already spent
            let since_start = since_start.max(recorded_elapsed);
            if since_start > nominal_duration {
                stale = Some(format!(
                    "checkpoint implies {}s elapsed, beyond nominal duration {}s",
                    since_start, nominal_duration
                ));
                nominal_duration
            } else {
                since_start
            }
        } else {
            recorded_elapsed
        };

        debug!(
            "Restored checkpoint for {}: elapsed={}s remaining={}s running={}",
            phase_id,
            elapsed,
            remaining_seconds(elapsed, nominal_duration),
            checkpoint.running
        );

        Some(Restored {
            time_remaining: remaining_seconds(elapsed, nominal_duration),
            elapsed_time: elapsed,
            running: checkpoint.running,
            batch_id: checkpoint.batch_id,
            stale,
        })
    }

    /// Remove a phase's checkpoint
    pub fn clear(&self, phase_id: &str) {
        self.store.remove(&timer_key(phase_id));
    }

    pub fn save_batch(&self, batch_id: &str) {
        self.store.save(BATCH_KEY, batch_id);
    }

    pub fn load_batch(&self) -> Option<String> {
        self.store.load(BATCH_KEY)
    }

    pub fn clear_batch(&self) {
        self.store.remove(BATCH_KEY);
    }

    /// Record that a phase started counting over-exposure now
    pub fn save_over_exposure(&self, phase_id: &str) {
        let record = OverExposureRecord {
            started_at: self.clock.now(),
        };
        match serde_json::to_string(&record) {
            Ok(value) => self.store.save(&over_exposure_key(phase_id), &value),
            Err(e) => warn!("Failed to encode over-exposure record for {}: {}", phase_id, e),
        }
    }

    /// Seconds of over-exposure accumulated since the record was written.
    ///
    /// A clock that went backwards yields zero rather than a negative count.
    pub fn over_exposure_seconds(&self, phase_id: &str) -> Option<u64> {
        let raw = self.store.load(&over_exposure_key(phase_id))?;
        match serde_json::from_str::<OverExposureRecord>(&raw) {
            Ok(record) => Some((self.clock.now() - record.started_at).num_seconds().max(0) as u64),
            Err(e) => {
                warn!("Discarding unreadable over-exposure record for {}: {}", phase_id, e);
                self.store.remove(&over_exposure_key(phase_id));
                None
            }
        }
    }

    pub fn clear_over_exposure(&self, phase_id: &str) {
        self.store.remove(&over_exposure_key(phase_id));
    }
}
