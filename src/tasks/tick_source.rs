//! Tick sources
//!
//! A tick source is a pure clock: it emits numbered `TickMessage`s at a
//! fixed cadence into a channel and never touches timer state. Two variants
//! exist behind one type: a dedicated worker thread (preferred) and a tokio
//! interval task on the runtime (fallback). The variant is chosen once, at
//! construction, from a capability probe.

use std::{
    collections::VecDeque,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::{
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
    time::{interval_at, MissedTickBehavior},
};
use tracing::{debug, warn};

/// Number of interval samples averaged into the accuracy score
const ACCURACY_WINDOW: usize = 20;

/// Message from a tick source to its pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickMessage {
    /// One interval elapsed. `source` identifies the emitting source
    /// instance, `seq` counts from 1 per source.
    Tick { source: u32, seq: u64 },
    /// The source failed and will emit nothing further
    Fault { source: u32, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSourceKind {
    Worker,
    Interval,
}

/// What the environment supports, probed once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub worker_threads: bool,
}

impl Capability {
    /// Probe for background thread support. `allow_worker = false` forces the interval variant.
    pub fn probe(allow_worker: bool) -> Self {
        let worker_threads = allow_worker && thread::available_parallelism().is_ok();
        Self { worker_threads }
    }

    pub fn interval_only() -> Self {
        Self {
            worker_threads: false,
        }
    }
}

/// Score how closely an observed interval matched the expected one, 0–100
pub fn accuracy_score(expected: Duration, actual: Duration) -> f64 {
    if expected.is_zero() {
        return 0.0;
    }
    let expected_ns = expected.as_nanos() as f64;
    let actual_ns = actual.as_nanos() as f64;
    let deviation = (actual_ns - expected_ns).abs() / expected_ns;
    ((1.0 - deviation) * 100.0).clamp(0.0, 100.0)
}

/// Dashboard view of one timer's tick source
#[derive(Debug, Clone, Serialize)]
pub struct TickDiagnostics {
    pub phase_id: String,
    pub kind: TickSourceKind,
    pub worker_supported: bool,
    pub fell_back: bool,
    pub expected_interval_ms: u64,
    pub ticks_received: u64,
    /// Rolling mean of per-interval accuracy scores
    pub accuracy: f64,
    #[serde(skip)]
    samples: VecDeque<f64>,
    #[serde(skip)]
    last_tick: Option<Instant>,
}

impl TickDiagnostics {
    pub fn new(phase_id: &str, kind: TickSourceKind, capability: Capability, interval: Duration) -> Self {
        Self {
            phase_id: phase_id.to_string(),
            kind,
            worker_supported: capability.worker_threads,
            fell_back: false,
            expected_interval_ms: interval.as_millis() as u64,
            ticks_received: 0,
            accuracy: 100.0,
            samples: VecDeque::with_capacity(ACCURACY_WINDOW),
            last_tick: None,
        }
    }

    /// Record a tick received at `at`, scoring the gap since the previous one
    pub fn record_tick(&mut self, at: Instant) {
        if let Some(last) = self.last_tick {
            let expected = Duration::from_millis(self.expected_interval_ms);
            if self.samples.len() == ACCURACY_WINDOW {
                self.samples.pop_front();
            }
            self.samples
                .push_back(accuracy_score(expected, at.saturating_duration_since(last)));
            self.accuracy = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        }
        self.last_tick = Some(at);
        self.ticks_received += 1;
    }

    /// Note a switch to the interval variant; interval history restarts
    pub fn record_fallback(&mut self) {
        self.kind = TickSourceKind::Interval;
        self.fell_back = true;
        self.last_tick = None;
    }
}

/// Ticks from a dedicated OS thread
#[derive(Debug)]
pub struct WorkerTickSource {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

// Reports a panic in the worker loop to the pump before the thread dies.
struct FaultGuard {
    tx: UnboundedSender<TickMessage>,
    source: u32,
}

impl Drop for FaultGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            let _ = self.tx.send(TickMessage::Fault {
                source: self.source,
                reason: "worker tick thread panicked".to_string(),
            });
        }
    }
}

impl WorkerTickSource {
    pub fn spawn(
        name: &str,
        source: u32,
        period: Duration,
        tx: UnboundedSender<TickMessage>,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name(format!("tick-{}", name))
            .spawn(move || worker_loop(source, period, tx, flag))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop emitting. Does not wait for the thread; late ticks are dropped by epoch.
    pub fn terminate(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.handle.take();
    }
}

impl Drop for WorkerTickSource {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn worker_loop(source: u32, period: Duration, tx: UnboundedSender<TickMessage>, stop: Arc<AtomicBool>) {
    let _guard = FaultGuard {
        tx: tx.clone(),
        source,
    };

    // deadlines are absolute so sleep overshoot does not accumulate
    let mut deadline = Instant::now();
    let mut seq = 0u64;

    while !stop.load(Ordering::Acquire) {
        deadline += period;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        if stop.load(Ordering::Acquire) {
            break;
        }

        seq += 1;
        if tx.send(TickMessage::Tick { source, seq }).is_err() {
            break;
        }
    }
}

/// Ticks from a tokio interval task. Must be spawned inside a runtime.
#[derive(Debug)]
pub struct IntervalTickSource {
    task: JoinHandle<()>,
}

impl IntervalTickSource {
    pub fn spawn(source: u32, period: Duration, tx: UnboundedSender<TickMessage>) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            // late ticks are delivered, not merged, so no elapsed time is lost
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

            let mut seq = 0u64;
            loop {
                ticker.tick().await;
                seq += 1;
                if tx.send(TickMessage::Tick { source, seq }).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }

    pub fn terminate(&mut self) {
        self.task.abort();
    }
}

impl Drop for IntervalTickSource {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// A running tick source of either variant. Dropping it terminates it.
#[derive(Debug)]
pub enum TickSource {
    Worker(WorkerTickSource),
    Interval(IntervalTickSource),
}

impl TickSource {
    /// Start the best variant the capability allows, falling back to the
    /// interval variant when the worker thread cannot be created.
    pub fn spawn(
        name: &str,
        source: u32,
        period: Duration,
        capability: Capability,
        tx: UnboundedSender<TickMessage>,
    ) -> Self {
        if capability.worker_threads {
            match WorkerTickSource::spawn(name, source, period, tx.clone()) {
                Ok(worker) => {
                    debug!("Worker tick source started for {} ({:?})", name, period);
                    return TickSource::Worker(worker);
                }
                Err(e) => warn!(
                    "Worker tick source unavailable for {} ({}), using interval ticking",
                    name, e
                ),
            }
        } else {
            debug!("Interval ticking for {}", name);
        }
        Self::interval(source, period, tx)
    }

    pub fn interval(source: u32, period: Duration, tx: UnboundedSender<TickMessage>) -> Self {
        TickSource::Interval(IntervalTickSource::spawn(source, period, tx))
    }

    pub fn kind(&self) -> TickSourceKind {
        match self {
            TickSource::Worker(_) => TickSourceKind::Worker,
            TickSource::Interval(_) => TickSourceKind::Interval,
        }
    }

    pub fn terminate(&mut self) {
        match self {
            TickSource::Worker(worker) => worker.terminate(),
            TickSource::Interval(interval) => interval.terminate(),
        }
    }
}
