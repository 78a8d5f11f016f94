//! Over-exposure monitor
//!
//! Bath-phase tools left in solution past the nominal soak time are flagged
//! and the overshoot is counted once per second until the timer is reset.
//! This is a warning only; it never stops the operator from moving on.

use std::{sync::Arc, time::Duration};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::{engine::TimerEngine, phase::is_bath_phase};

/// Over-exposure counting cadence, independent of the tick source interval
pub const OVER_EXPOSURE_PERIOD: Duration = Duration::from_secs(1);

/// True when a phase has reached the point where over-exposure tracking applies.
///
/// Tracking begins at zero the moment the countdown ends, so the first counted
/// second is the first one strictly beyond the nominal duration.
pub fn activates(phase_id: &str, elapsed: u64, nominal_duration: u64) -> bool {
    is_bath_phase(phase_id) && elapsed >= nominal_duration
}

/// Count over-exposure seconds for one timer until it is reset.
///
/// `epoch` is the timer's run epoch at completion; a reset changes it and
/// the engine then refuses further counts, which ends the task.
pub async fn over_exposure_monitor(engine: Arc<TimerEngine>, phase_id: String, epoch: u64) {
    info!("Over-exposure monitor started for {}", phase_id);

    let mut ticker = interval(OVER_EXPOSURE_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    // the first tick of a tokio interval fires immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !engine.over_exposure_tick(&phase_id, epoch) {
            debug!("Over-exposure monitor for {} stopped", phase_id);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bath_phases_activate() {
        assert!(activates("bath", 1800, 1800));
        assert!(activates("enzyme-soak", 301, 300));
        assert!(!activates("drying", 5000, 900));
        assert!(!activates("autoclave", 5000, 1200));
    }

    #[test]
    fn inactive_before_nominal_duration() {
        assert!(!activates("bath", 1799, 1800));
        assert!(!activates("bath", 0, 1800));
    }
}
