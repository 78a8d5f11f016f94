//! Timer state structure and management

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::timer::phase::PhaseKind;

/// Lifecycle of a single phase timer
///
/// `Idle → Running ⇄ Paused → Completed`; bath phases continue from
/// `Running` into `OverExposed` instead of `Completed`. Only `reset` leaves
/// `Completed` or `OverExposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Idle,
    Running,
    Paused,
    Completed,
    OverExposed,
}

/// Compliance checkpoints an operator confirms by hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplianceFlag {
    /// Chemical indicator strip placed in the packaging
    #[serde(rename = "ciStripIncluded", alias = "ci_strip_included")]
    CiStripIncluded,
    /// Biological indicator test passed
    #[serde(rename = "biTestPassed", alias = "bi_test_passed")]
    BiTestPassed,
}

impl ComplianceFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceFlag::CiStripIncluded => "ciStripIncluded",
            ComplianceFlag::BiTestPassed => "biTestPassed",
        }
    }
}

impl fmt::Display for ComplianceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplianceFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ciStripIncluded" | "ci_strip_included" => Ok(ComplianceFlag::CiStripIncluded),
            "biTestPassed" | "bi_test_passed" => Ok(ComplianceFlag::BiTestPassed),
            other => Err(format!("unknown compliance flag: {}", other)),
        }
    }
}

/// Timer state for one tracked phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerState {
    pub phase_id: String,
    pub kind: PhaseKind,
    /// Nominal phase duration in seconds
    pub nominal_duration: u64,
    pub time_remaining: u64,
    pub elapsed_time: u64,
    pub is_running: bool,
    pub status: TimerStatus,
    pub overexposed: bool,
    pub over_exposure_time: u64,
    pub ci_strip_included: bool,
    pub bi_test_passed: bool,
    pub batch_id: Option<String>,
    /// Set when the last restore found an untrustworthy checkpoint
    pub stale_checkpoint: bool,
    /// Bumped on start, pause and reset; ticks carrying an older epoch are dropped
    #[serde(skip)]
    pub(crate) epoch: u64,
    /// Milliseconds delivered by the tick source that have not yet made a whole second
    #[serde(skip)]
    pub(crate) pending_ms: u64,
}

impl TimerState {
    /// Create an idle timer at its full nominal duration
    pub fn new(phase_id: impl Into<String>, nominal_duration: u64) -> Self {
        let phase_id = phase_id.into();
        Self {
            kind: PhaseKind::from_id(&phase_id),
            phase_id,
            nominal_duration,
            time_remaining: nominal_duration,
            elapsed_time: 0,
            is_running: false,
            status: TimerStatus::Idle,
            overexposed: false,
            over_exposure_time: 0,
            ci_strip_included: false,
            bi_test_passed: false,
            batch_id: None,
            stale_checkpoint: false,
            epoch: 0,
            pending_ms: 0,
        }
    }

    /// Restore every field to the fresh state, keeping identity and advancing the epoch
    pub fn reset(&mut self) {
        let epoch = self.epoch + 1;
        *self = Self::new(std::mem::take(&mut self.phase_id), self.nominal_duration);
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// True once the countdown has reached zero
    pub fn is_finished(&self) -> bool {
        matches!(self.status, TimerStatus::Completed | TimerStatus::OverExposed)
    }

    /// True while a phase checkpoint should exist for this timer
    pub fn has_checkpoint(&self) -> bool {
        matches!(self.status, TimerStatus::Running | TimerStatus::Paused)
    }

    pub fn flag(&self, flag: ComplianceFlag) -> bool {
        match flag {
            ComplianceFlag::CiStripIncluded => self.ci_strip_included,
            ComplianceFlag::BiTestPassed => self.bi_test_passed,
        }
    }

    pub fn set_flag(&mut self, flag: ComplianceFlag, value: bool) {
        match flag {
            ComplianceFlag::CiStripIncluded => self.ci_strip_included = value,
            ComplianceFlag::BiTestPassed => self.bi_test_passed = value,
        }
    }
}
