//! Timer engine
//!
//! The single writer of `TimerState`. One engine is built per sterilization
//! session and shared by reference with the tick registry and the API; the
//! UI side only reads snapshots and dispatches intents.
//!
//! Events are collected while the timer map is locked and emitted after the
//! lock is released, so subscribers never observe a half-applied transition.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, info, warn};

use super::{
    compliance,
    events::{EventBus, TimerEvent},
    overexposure,
    phase::{PhaseKind, PhaseTable},
};
use crate::{
    error::Result,
    services::CheckpointStore,
    state::{ComplianceFlag, TimerState, TimerStatus},
};

const MILLIS_PER_TICK: u64 = 1000;

/// What a tick did to its timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Timer missing, not running, or the tick belongs to an older run epoch
    Ignored,
    /// Countdown advanced (or accumulated a partial second)
    Advanced { time_remaining: u64 },
    /// Countdown reached zero on this tick
    Completed { overexposed: bool, epoch: u64 },
}

/// Result of mounting a timer
#[derive(Debug, Clone, PartialEq)]
pub struct Mounted {
    pub state: TimerState,
    /// A running checkpoint was restored and a tick source must be engaged
    pub resume: bool,
}

/// Authoritative owner of every phase timer in a session
#[derive(Debug)]
pub struct TimerEngine {
    phases: PhaseTable,
    timers: Mutex<HashMap<String, TimerState>>,
    checkpoints: CheckpointStore,
    events: EventBus,
}

impl TimerEngine {
    pub fn new(phases: PhaseTable, checkpoints: CheckpointStore, events: EventBus) -> Self {
        Self {
            phases,
            timers: Mutex::new(HashMap::new()),
            checkpoints,
            events,
        }
    }

    pub fn phases(&self) -> &PhaseTable {
        &self.phases
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    // A poisoned map is still the best state we have; the tick path must not panic.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, TimerState>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_all(&self, events: Vec<TimerEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    /// Fetch a timer, creating a fresh idle one for a known phase
    fn timer_mut<'a>(
        &self,
        timers: &'a mut HashMap<String, TimerState>,
        phase_id: &str,
    ) -> Result<&'a mut TimerState> {
        let config = self.phases.require(phase_id)?;
        Ok(timers
            .entry(phase_id.to_string())
            .or_insert_with(|| TimerState::new(phase_id, config.duration)))
    }

    /// Load a timer, reading its checkpoint exactly once.
    ///
    /// Mounting an already tracked timer returns it untouched.
    pub fn mount(&self, phase_id: &str) -> Result<Mounted> {
        let config = self.phases.require(phase_id)?;
        let mut events = Vec::new();

        let mounted = {
            let mut timers = self.lock();
            if let Some(existing) = timers.get(phase_id) {
                return Ok(Mounted {
                    state: existing.clone(),
                    resume: false,
                });
            }

            let mut timer = TimerState::new(phase_id, config.duration);
            if timer.kind == PhaseKind::Autoclave {
                timer.batch_id = self.checkpoints.load_batch();
            }

            let mut resume = false;
            if let Some(over) = self.checkpoints.over_exposure_seconds(phase_id) {
                warn!("{} was over-exposed before restart, {}s so far", phase_id, over);
                timer.time_remaining = 0;
                timer.elapsed_time = config.duration + over;
                timer.status = TimerStatus::OverExposed;
                timer.overexposed = true;
                timer.over_exposure_time = over;
                self.checkpoints.clear(phase_id);
            } else if let Some(restored) = self.checkpoints.restore(phase_id, config.duration) {
                timer.time_remaining = restored.time_remaining;
                timer.elapsed_time = restored.elapsed_time;
                if restored.batch_id.is_some() {
                    timer.batch_id = restored.batch_id.clone();
                }

                if let Some(reason) = &restored.stale {
                    warn!("Stale checkpoint for {}: {}", phase_id, reason);
                    timer.stale_checkpoint = true;
                    events.push(TimerEvent::checkpoint_stale(phase_id, reason.clone()));
                }

                if timer.time_remaining == 0 {
                    if restored.is_stale() {
                        // finished at some unknown point; do not replay completion
                        timer.status = TimerStatus::Completed;
                        self.checkpoints.clear(phase_id);
                    } else {
                        info!("{} finished while unmounted", phase_id);
                        self.complete(&mut timer, &mut events);
                    }
                } else if restored.running && !restored.is_stale() {
                    timer.is_running = true;
                    timer.status = TimerStatus::Running;
                    timer.epoch += 1;
                    resume = true;
                    info!(
                        "Resuming {} with {}s remaining",
                        phase_id, timer.time_remaining
                    );
                } else if timer.elapsed_time > 0 {
                    timer.status = TimerStatus::Paused;
                    self.checkpoints.save_timer(&timer);
                }
            }

            timers.insert(phase_id.to_string(), timer.clone());
            Mounted {
                state: timer,
                resume,
            }
        };

        self.emit_all(events);
        Ok(mounted)
    }

    /// Current state of a phase timer (an idle one if never touched)
    pub fn state(&self, phase_id: &str) -> Result<TimerState> {
        let mut timers = self.lock();
        self.timer_mut(&mut timers, phase_id).map(|timer| timer.clone())
    }

    /// Every tracked timer, ordered by phase id
    pub fn snapshot(&self) -> Vec<TimerState> {
        let mut states: Vec<TimerState> = self.lock().values().cloned().collect();
        states.sort_by(|a, b| a.phase_id.cmp(&b.phase_id));
        states
    }

    /// Start a timer. Returns the run epoch a tick source must be engaged with,
    /// or `None` when the timer was already running or has no time left.
    pub fn start(&self, phase_id: &str) -> Result<Option<u64>> {
        let mut timers = self.lock();
        let timer = self.timer_mut(&mut timers, phase_id)?;

        if timer.is_running || timer.time_remaining == 0 {
            debug!("Start ignored for {} (running={}, remaining={})",
                   phase_id, timer.is_running, timer.time_remaining);
            return Ok(None);
        }

        timer.is_running = true;
        timer.status = TimerStatus::Running;
        timer.epoch += 1;
        self.checkpoints.save_timer(timer);

        info!("Timer {} started with {}s remaining", phase_id, timer.time_remaining);
        Ok(Some(timer.epoch))
    }

    /// Pause a running timer.
    ///
    /// Advancing the epoch here is what makes ticks already in flight miss.
    pub fn pause(&self, phase_id: &str) -> Result<TimerState> {
        let mut timers = self.lock();
        let timer = self.timer_mut(&mut timers, phase_id)?;

        if timer.is_running {
            timer.is_running = false;
            timer.status = TimerStatus::Paused;
            timer.epoch += 1;
            self.checkpoints.save_timer(timer);
            info!("Timer {} paused with {}s remaining", phase_id, timer.time_remaining);
        }

        Ok(timer.clone())
    }

    /// Return a timer to its fresh state and drop its checkpoints
    pub fn reset(&self, phase_id: &str) -> Result<TimerState> {
        let mut timers = self.lock();
        let timer = self.timer_mut(&mut timers, phase_id)?;

        if let Some(batch_id) = timer.batch_id.take() {
            if self.checkpoints.load_batch().as_deref() == Some(batch_id.as_str()) {
                self.checkpoints.clear_batch();
            }
        }
        timer.reset();
        self.checkpoints.clear(phase_id);
        self.checkpoints.clear_over_exposure(phase_id);

        info!("Timer {} reset", phase_id);
        Ok(timer.clone())
    }

    /// Advance a running timer by one second
    pub fn tick(&self, phase_id: &str) -> TickOutcome {
        let mut events = Vec::new();
        let outcome = {
            let mut timers = self.lock();
            match timers.get_mut(phase_id) {
                Some(timer) if timer.is_running => self.advance_one(timer, &mut events),
                _ => TickOutcome::Ignored,
            }
        };
        self.emit_all(events);
        outcome
    }

    /// Apply `elapsed_ms` of tick source time to a timer engaged at `epoch`.
    ///
    /// Milliseconds accumulate per timer; each whole second becomes one
    /// `tick`. Ticks for another epoch, or for a timer that is not running,
    /// are silently ignored.
    pub fn tick_from(&self, phase_id: &str, epoch: u64, elapsed_ms: u64) -> TickOutcome {
        let mut events = Vec::new();
        let outcome = {
            let mut timers = self.lock();
            let timer = match timers.get_mut(phase_id) {
                Some(timer) if timer.is_running && timer.epoch == epoch => timer,
                _ => return TickOutcome::Ignored,
            };

            timer.pending_ms += elapsed_ms;
            let mut outcome = TickOutcome::Advanced {
                time_remaining: timer.time_remaining,
            };
            while timer.pending_ms >= MILLIS_PER_TICK {
                timer.pending_ms -= MILLIS_PER_TICK;
                outcome = self.advance_one(timer, &mut events);
                if matches!(outcome, TickOutcome::Completed { .. }) {
                    break;
                }
            }
            outcome
        };
        self.emit_all(events);
        outcome
    }

    fn advance_one(&self, timer: &mut TimerState, events: &mut Vec<TimerEvent>) -> TickOutcome {
        timer.time_remaining = timer.time_remaining.saturating_sub(1);
        timer.elapsed_time += 1;

        if timer.time_remaining == 0 {
            self.complete(timer, events);
            return TickOutcome::Completed {
                overexposed: timer.overexposed,
                epoch: timer.epoch,
            };
        }

        self.checkpoints.save_timer(timer);
        TickOutcome::Advanced {
            time_remaining: timer.time_remaining,
        }
    }

    fn complete(&self, timer: &mut TimerState, events: &mut Vec<TimerEvent>) {
        let phase_id = timer.phase_id.clone();
        timer.time_remaining = 0;
        timer.is_running = false;
        timer.pending_ms = 0;
        timer.status = TimerStatus::Completed;
        self.checkpoints.clear(&phase_id);

        info!("Phase {} complete", phase_id);
        events.push(TimerEvent::phase_complete(&phase_id, timer.batch_id.clone()));

        if let Some(flag) = compliance::missing_confirmation(timer) {
            warn!(
                "Compliance advisory: {} completed without {} confirmation (batch {:?})",
                phase_id, flag, timer.batch_id
            );
            events.push(TimerEvent::compliance_advisory(
                &phase_id,
                flag,
                timer.batch_id.clone(),
            ));
        }

        if timer.kind == PhaseKind::Autoclave {
            // end of the sterilization cycle
            self.checkpoints.clear_batch();
        }

        if overexposure::activates(&phase_id, timer.elapsed_time, timer.nominal_duration) {
            warn!("Bath phase {} has reached its soak time; tracking over-exposure", phase_id);
            timer.overexposed = true;
            timer.over_exposure_time = 0;
            timer.status = TimerStatus::OverExposed;
            self.checkpoints.save_over_exposure(&phase_id);
            events.push(TimerEvent::over_exposure_started(&phase_id));
        }
    }

    /// Count one second of over-exposure. Returns `false` once the timer is
    /// no longer over-exposed under `epoch`, which stops the monitor.
    pub fn over_exposure_tick(&self, phase_id: &str, epoch: u64) -> bool {
        let mut timers = self.lock();
        match timers.get_mut(phase_id) {
            Some(timer) if timer.overexposed && timer.epoch == epoch => {
                timer.over_exposure_time += 1;
                timer.elapsed_time += 1;
                debug!("{} over-exposed for {}s", phase_id, timer.over_exposure_time);
                true
            }
            _ => false,
        }
    }

    /// Record an operator's compliance confirmation
    pub fn set_compliance_flag(
        &self,
        phase_id: &str,
        flag: ComplianceFlag,
        value: bool,
    ) -> Result<TimerState> {
        let mut timers = self.lock();
        let timer = self.timer_mut(&mut timers, phase_id)?;

        timer.set_flag(flag, value);
        if timer.is_finished() {
            info!("{} set to {} for {} after completion", flag, value, phase_id);
        } else {
            info!("{} set to {} for {}", flag, value, phase_id);
        }
        Ok(timer.clone())
    }

    /// Associate a batch with a phase timer and persist it for the handoff
    pub fn set_batch_id(&self, phase_id: &str, batch_id: Option<String>) -> Result<TimerState> {
        let mut timers = self.lock();
        let timer = self.timer_mut(&mut timers, phase_id)?;

        match &batch_id {
            Some(id) => self.checkpoints.save_batch(id),
            None => {
                if timer.batch_id.is_some() {
                    self.checkpoints.clear_batch();
                }
            }
        }
        timer.batch_id = batch_id;
        if timer.has_checkpoint() {
            self.checkpoints.save_timer(timer);
        }

        info!("Batch for {} set to {:?}", phase_id, timer.batch_id);
        Ok(timer.clone())
    }

    /// Carry the batch id from one phase to the next (e.g. drying → autoclave)
    pub fn handoff(&self, from: &str, to: &str) -> Result<TimerState> {
        let mut timers = self.lock();
        let batch_id = self
            .timer_mut(&mut timers, from)?
            .batch_id
            .clone()
            .or_else(|| self.checkpoints.load_batch());

        let target = self.timer_mut(&mut timers, to)?;
        if batch_id.is_some() {
            target.batch_id = batch_id;
            if target.has_checkpoint() {
                self.checkpoints.save_timer(target);
            }
        }

        info!("Handoff {} -> {} with batch {:?}", from, to, target.batch_id);
        Ok(target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{KeyValueStore, MemoryStore},
        timer::phase::PhaseConfig,
        utils::ManualClock,
    };
    use std::sync::Arc;

    fn engine() -> (TimerEngine, Arc<MemoryStore>, ManualClock) {
        let kv = Arc::new(MemoryStore::new());
        let clock = ManualClock::default();
        let checkpoints = CheckpointStore::new(kv.clone(), Arc::new(clock.clone()));
        let phases = PhaseTable::new([
            ("bath".to_string(), PhaseConfig::new(5)),
            ("drying".to_string(), PhaseConfig::new(3)),
            ("autoclave".to_string(), PhaseConfig::new(4)),
        ]);
        (
            TimerEngine::new(phases, checkpoints, EventBus::new(32)),
            kv,
            clock,
        )
    }

    #[test]
    fn start_is_idempotent() {
        let (engine, _, _) = engine();
        let first = engine.start("bath").unwrap();
        assert!(first.is_some());
        assert_eq!(engine.start("bath").unwrap(), None);
    }

    #[test]
    fn unknown_phase_is_an_error() {
        let (engine, _, _) = engine();
        assert!(engine.start("rinse").is_err());
        assert_eq!(engine.tick("rinse"), TickOutcome::Ignored);
    }

    #[test]
    fn tick_keeps_elapsed_plus_remaining_constant() {
        let (engine, _, _) = engine();
        engine.start("bath").unwrap();

        for _ in 0..4 {
            engine.tick("bath");
            let state = engine.state("bath").unwrap();
            assert_eq!(state.elapsed_time + state.time_remaining, 5);
        }
    }

    #[test]
    fn tick_writes_checkpoint_and_completion_clears_it() {
        let (engine, kv, _) = engine();
        engine.start("drying").unwrap();
        engine.tick("drying");
        assert!(kv.load("timer-drying").is_some());

        engine.tick("drying");
        engine.tick("drying");
        assert!(kv.load("timer-drying").is_none());
    }

    #[test]
    fn stale_epoch_ticks_are_ignored() {
        let (engine, _, _) = engine();
        let epoch = engine.start("bath").unwrap().unwrap();
        engine.pause("bath").unwrap();
        let resumed = engine.start("bath").unwrap().unwrap();
        assert_ne!(epoch, resumed);

        assert_eq!(engine.tick_from("bath", epoch, 1000), TickOutcome::Ignored);
        assert_eq!(engine.state("bath").unwrap().time_remaining, 5);
    }

    #[test]
    fn partial_seconds_accumulate_across_pause() {
        let (engine, _, _) = engine();
        let epoch = engine.start("bath").unwrap().unwrap();
        engine.tick_from("bath", epoch, 600);
        engine.pause("bath").unwrap();

        let epoch = engine.start("bath").unwrap().unwrap();
        let outcome = engine.tick_from("bath", epoch, 400);
        assert_eq!(outcome, TickOutcome::Advanced { time_remaining: 4 });
    }

    #[test]
    fn large_tick_stops_at_completion() {
        let (engine, _, _) = engine();
        let epoch = engine.start("drying").unwrap().unwrap();

        let outcome = engine.tick_from("drying", epoch, 10_000);
        assert!(matches!(outcome, TickOutcome::Completed { overexposed: false, .. }));

        let state = engine.state("drying").unwrap();
        assert_eq!(state.time_remaining, 0);
        assert_eq!(state.elapsed_time, 3);
    }

    #[test]
    fn over_exposure_tick_requires_bath_and_epoch() {
        let (engine, _, _) = engine();
        engine.start("drying").unwrap();
        for _ in 0..3 {
            engine.tick("drying");
        }
        let drying = engine.state("drying").unwrap();
        assert!(!drying.overexposed);
        assert!(!engine.over_exposure_tick("drying", drying.epoch()));

        engine.start("bath").unwrap();
        let mut outcome = TickOutcome::Ignored;
        for _ in 0..5 {
            outcome = engine.tick("bath");
        }
        let TickOutcome::Completed { overexposed, epoch } = outcome else {
            panic!("bath did not complete: {:?}", outcome);
        };
        assert!(overexposed);
        assert!(!engine.over_exposure_tick("bath", epoch + 1));
        assert!(engine.over_exposure_tick("bath", epoch));

        let bath = engine.state("bath").unwrap();
        assert_eq!(bath.over_exposure_time, 1);
        assert_eq!(bath.elapsed_time, 6);
        assert_eq!(bath.time_remaining, 0);
    }

    #[test]
    fn reset_clears_batch_key_it_owns() {
        let (engine, kv, _) = engine();
        engine.set_batch_id("drying", Some("B7".to_string())).unwrap();
        assert_eq!(kv.load("batch-id").as_deref(), Some("B7"));

        let state = engine.reset("drying").unwrap();
        assert!(state.batch_id.is_none());
        assert!(kv.load("batch-id").is_none());
    }

    #[test]
    fn over_exposure_record_lives_until_reset() {
        let (engine, kv, _) = engine();
        engine.start("bath").unwrap();
        for _ in 0..5 {
            engine.tick("bath");
        }
        assert!(kv.load("timer-bath").is_none());
        assert!(kv.load("overexposed-bath").is_some());

        engine.reset("bath").unwrap();
        assert!(kv.load("overexposed-bath").is_none());
    }

    #[test]
    fn batch_change_rewrites_live_checkpoint() {
        let (engine, _, _) = engine();
        engine.start("drying").unwrap();
        engine.tick("drying");
        engine.pause("drying").unwrap();

        engine.set_batch_id("drying", Some("B7".to_string())).unwrap();

        let checkpoint = engine.checkpoints().load("drying").unwrap();
        assert_eq!(checkpoint.batch_id.as_deref(), Some("B7"));
        assert!(!checkpoint.running);
        assert_eq!(checkpoint.remaining_seconds, 2);
    }

    #[test]
    fn mount_reads_checkpoint_once() {
        let (engine, _, clock) = engine();
        engine.checkpoints().save("bath", 3, 5, false);

        let mounted = engine.mount("bath").unwrap();
        assert_eq!(mounted.state.time_remaining, 3);
        assert_eq!(mounted.state.status, TimerStatus::Paused);
        assert!(!mounted.resume);

        engine.checkpoints().save("bath", 1, 5, false);
        clock.advance_secs(1);
        assert_eq!(engine.mount("bath").unwrap().state.time_remaining, 3);
    }

    #[test]
    fn mount_resumes_running_checkpoint() {
        let (engine, _, clock) = engine();
        engine.checkpoints().save("autoclave", 4, 4, true);
        clock.advance_secs(1);

        let mounted = engine.mount("autoclave").unwrap();
        assert!(mounted.resume);
        assert!(mounted.state.is_running);
        assert_eq!(mounted.state.time_remaining, 3);
        assert_eq!(engine.tick("autoclave"), TickOutcome::Advanced { time_remaining: 2 });
    }

    #[test]
    fn mount_adopts_persisted_batch_for_autoclave() {
        let (engine, _, _) = engine();
        engine.checkpoints().save_batch("B9");

        assert_eq!(
            engine.mount("autoclave").unwrap().state.batch_id.as_deref(),
            Some("B9")
        );
        assert!(engine.mount("drying").unwrap().state.batch_id.is_none());
    }
}
