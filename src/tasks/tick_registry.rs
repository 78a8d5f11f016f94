//! Per-timer tick source ownership
//!
//! Every running timer gets its own channel, tick source and pump task. The
//! pump is the only place tick messages turn into engine calls, so all state
//! mutation happens on the runtime rather than on a worker thread.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::tick_source::{Capability, TickDiagnostics, TickMessage, TickSource};
use crate::timer::{overexposure::over_exposure_monitor, TickOutcome, TimerEngine, TimerEvent};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background work attached to one timer, shared between the registry and its pump
#[derive(Debug, Default)]
struct TickSlot {
    source: Option<TickSource>,
    monitor: Option<JoinHandle<()>>,
    closed: bool,
}

impl TickSlot {
    fn shutdown(&mut self) {
        self.closed = true;
        if let Some(mut source) = self.source.take() {
            source.terminate();
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

#[derive(Debug)]
struct TickHandle {
    epoch: u64,
    slot: Arc<Mutex<TickSlot>>,
    pump: Option<JoinHandle<()>>,
    diagnostics: Option<Arc<Mutex<TickDiagnostics>>>,
}

impl TickHandle {
    fn terminate(mut self) {
        lock(&self.slot).shutdown();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Owns the tick sources and over-exposure monitors of every timer
#[derive(Debug)]
pub struct TickRegistry {
    engine: Arc<TimerEngine>,
    period: Duration,
    capability: Capability,
    handles: Mutex<HashMap<String, TickHandle>>,
}

impl TickRegistry {
    pub fn new(engine: Arc<TimerEngine>, period: Duration, capability: Capability) -> Self {
        info!(
            "Tick registry ready: period={:?}, worker threads {}",
            period,
            if capability.worker_threads { "available" } else { "unavailable" }
        );
        Self {
            engine,
            period,
            capability,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Start ticking a timer that the engine has put in the running state at `epoch`.
    ///
    /// Any previous source for the same timer is terminated first.
    pub fn engage(&self, phase_id: &str, epoch: u64) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = TickSource::spawn(phase_id, 1, self.period, self.capability, tx.clone());
        let diagnostics = Arc::new(Mutex::new(TickDiagnostics::new(
            phase_id,
            source.kind(),
            self.capability,
            self.period,
        )));
        let slot = Arc::new(Mutex::new(TickSlot {
            source: Some(source),
            ..TickSlot::default()
        }));

        let pump = TickPump {
            phase_id: phase_id.to_string(),
            epoch,
            engine: Arc::clone(&self.engine),
            period: self.period,
            slot: Arc::clone(&slot),
            diagnostics: Arc::clone(&diagnostics),
            tx,
            source: 1,
            last_seq: 0,
        };
        let pump = tokio::spawn(pump.run(rx));

        self.replace(
            phase_id,
            TickHandle {
                epoch,
                slot,
                pump: Some(pump),
                diagnostics: Some(diagnostics),
            },
        );
        debug!("Tick source engaged for {} at epoch {}", phase_id, epoch);
    }

    /// Count over-exposure for a timer that is already over-exposed (e.g. after a restore)
    pub fn watch_over_exposure(&self, phase_id: &str, epoch: u64) {
        let monitor = tokio::spawn(over_exposure_monitor(
            Arc::clone(&self.engine),
            phase_id.to_string(),
            epoch,
        ));
        let slot = TickSlot {
            monitor: Some(monitor),
            ..TickSlot::default()
        };

        self.replace(
            phase_id,
            TickHandle {
                epoch,
                slot: Arc::new(Mutex::new(slot)),
                pump: None,
                diagnostics: None,
            },
        );
    }

    fn replace(&self, phase_id: &str, handle: TickHandle) {
        if let Some(previous) = lock(&self.handles).insert(phase_id.to_string(), handle) {
            debug!("Replacing tick source for {} (epoch {})", phase_id, previous.epoch);
            previous.terminate();
        }
    }

    /// Stop a timer's tick source and over-exposure monitor
    pub fn terminate(&self, phase_id: &str) -> bool {
        match lock(&self.handles).remove(phase_id) {
            Some(handle) => {
                handle.terminate();
                debug!("Tick source terminated for {}", phase_id);
                true
            }
            None => false,
        }
    }

    /// Stop everything, e.g. on process shutdown. Returns how many timers were stopped.
    pub fn terminate_all(&self) -> usize {
        let handles: Vec<(String, TickHandle)> = lock(&self.handles).drain().collect();
        let count = handles.len();
        for (_, handle) in handles {
            handle.terminate();
        }
        if count > 0 {
            info!("Terminated {} tick source(s)", count);
        }
        count
    }

    /// Number of timers with live background work
    pub fn active_count(&self) -> usize {
        lock(&self.handles)
            .values()
            .filter(|handle| {
                let slot = lock(&handle.slot);
                slot.source.is_some() || slot.monitor.is_some()
            })
            .count()
    }

    pub fn diagnostics(&self) -> Vec<TickDiagnostics> {
        let mut all: Vec<TickDiagnostics> = lock(&self.handles)
            .values()
            .filter_map(|handle| handle.diagnostics.as_ref())
            .map(|diagnostics| lock(diagnostics).clone())
            .collect();
        all.sort_by(|a, b| a.phase_id.cmp(&b.phase_id));
        all
    }
}

impl Drop for TickRegistry {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

/// Turns tick messages for one timer into engine ticks
struct TickPump {
    phase_id: String,
    epoch: u64,
    engine: Arc<TimerEngine>,
    period: Duration,
    slot: Arc<Mutex<TickSlot>>,
    diagnostics: Arc<Mutex<TickDiagnostics>>,
    /// Kept so a fallback source can be attached to the same channel
    tx: UnboundedSender<TickMessage>,
    source: u32,
    last_seq: u64,
}

impl TickPump {
    async fn run(mut self, mut rx: UnboundedReceiver<TickMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                TickMessage::Tick { source, seq } if source == self.source => {
                    if seq <= self.last_seq {
                        debug!("Duplicate tick {} for {} dropped", seq, self.phase_id);
                        continue;
                    }
                    let intervals = seq - self.last_seq;
                    if intervals > 1 {
                        warn!(
                            "{} tick(s) missing for {}, crediting their time",
                            intervals - 1,
                            self.phase_id
                        );
                    }
                    self.last_seq = seq;
                    lock(&self.diagnostics).record_tick(Instant::now());

                    let elapsed_ms = self.period.as_millis() as u64 * intervals;
                    match self.engine.tick_from(&self.phase_id, self.epoch, elapsed_ms) {
                        TickOutcome::Advanced { .. } => {}
                        TickOutcome::Ignored => {
                            debug!("Timer {} no longer running at epoch {}", self.phase_id, self.epoch);
                            break;
                        }
                        TickOutcome::Completed { overexposed, epoch } => {
                            self.finish(overexposed, epoch);
                            return;
                        }
                    }
                }
                TickMessage::Tick { source, .. } => {
                    debug!("Tick from retired source {} for {} dropped", source, self.phase_id);
                }
                TickMessage::Fault { source, reason } if source == self.source => {
                    self.fall_back(&reason);
                }
                TickMessage::Fault { source, reason } => {
                    debug!("Fault from retired source {} ignored: {}", source, reason);
                }
            }
        }

        lock(&self.slot).source.take();
    }

    fn fall_back(&mut self, reason: &str) {
        warn!(
            "Tick source for {} failed ({}), falling back to interval ticking",
            self.phase_id, reason
        );

        let mut slot = lock(&self.slot);
        if slot.closed {
            return;
        }
        self.source += 1;
        self.last_seq = 0;
        // replacing the old source drops and terminates it
        slot.source = Some(TickSource::interval(self.source, self.period, self.tx.clone()));
        drop(slot);

        lock(&self.diagnostics).record_fallback();
        self.engine
            .events()
            .emit(TimerEvent::tick_source_degraded(&self.phase_id, reason));
    }

    fn finish(&self, overexposed: bool, epoch: u64) {
        let mut slot = lock(&self.slot);
        slot.source.take();
        if overexposed && !slot.closed {
            slot.monitor = Some(tokio::spawn(over_exposure_monitor(
                Arc::clone(&self.engine),
                self.phase_id.clone(),
                epoch,
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{CheckpointStore, MemoryStore},
        tasks::tick_source::TickSourceKind,
        timer::{EventBus, PhaseConfig, PhaseTable},
        utils::SystemClock,
    };

    fn engine() -> Arc<TimerEngine> {
        let checkpoints = CheckpointStore::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock));
        let phases = PhaseTable::new([
            ("bath".to_string(), PhaseConfig::new(1)),
            ("drying".to_string(), PhaseConfig::new(60)),
        ]);
        Arc::new(TimerEngine::new(phases, checkpoints, EventBus::new(32)))
    }

    #[tokio::test]
    async fn paused_timer_stops_ticking() {
        let engine = engine();
        let registry = TickRegistry::new(Arc::clone(&engine), Duration::from_millis(10), Capability::probe(true));

        let epoch = engine.start("drying").unwrap().unwrap();
        registry.engage("drying", epoch);
        tokio::time::sleep(Duration::from_millis(50)).await;

        engine.pause("drying").unwrap();
        registry.terminate("drying");
        let paused = engine.state("drying").unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let later = engine.state("drying").unwrap();
        assert_eq!(paused.time_remaining, later.time_remaining);
        assert_eq!(paused.pending_ms, later.pending_ms);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn fault_falls_back_to_interval_ticking() {
        let engine = engine();
        let mut events = engine.events().subscribe();
        let period = Duration::from_millis(10);
        let epoch = engine.start("drying").unwrap().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(Mutex::new(TickSlot::default()));
        let diagnostics = Arc::new(Mutex::new(TickDiagnostics::new(
            "drying",
            TickSourceKind::Worker,
            Capability::probe(true),
            period,
        )));
        let pump = TickPump {
            phase_id: "drying".to_string(),
            epoch,
            engine: Arc::clone(&engine),
            period,
            slot: Arc::clone(&slot),
            diagnostics: Arc::clone(&diagnostics),
            tx: tx.clone(),
            source: 1,
            last_seq: 0,
        };
        let task = tokio::spawn(pump.run(rx));

        tx.send(TickMessage::Fault {
            source: 1,
            reason: "worker tick thread panicked".to_string(),
        })
        .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TimerEvent::TickSourceDegraded { .. }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            let diagnostics = lock(&diagnostics);
            assert!(diagnostics.fell_back);
            assert_eq!(diagnostics.kind, TickSourceKind::Interval);
            assert!(diagnostics.ticks_received > 0);
        }
        assert!(lock(&slot).source.is_some());

        // late ticks from the crashed source must not be counted
        let before = lock(&diagnostics).ticks_received;
        tx.send(TickMessage::Tick { source: 1, seq: 99 }).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(lock(&diagnostics).ticks_received <= before + 1);

        lock(&slot).shutdown();
        task.abort();
    }

    #[tokio::test]
    async fn completed_bath_starts_over_exposure_monitor() {
        let engine = engine();
        let mut events = engine.events().subscribe();
        let registry = TickRegistry::new(Arc::clone(&engine), Duration::from_millis(20), Capability::probe(true));

        let epoch = engine.start("bath").unwrap().unwrap();
        registry.engage("bath", epoch);

        let complete = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                if let Ok(TimerEvent::PhaseComplete { phase_id, .. }) = events.recv().await {
                    break phase_id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(complete, "bath");

        tokio::time::sleep(Duration::from_millis(1300)).await;
        let bath = engine.state("bath").unwrap();
        assert!(bath.overexposed);
        assert!(bath.over_exposure_time >= 1);

        engine.reset("bath").unwrap();
        registry.terminate("bath");
        assert_eq!(registry.active_count(), 0);
    }
}
