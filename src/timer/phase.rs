//! Phase configuration table
//!
//! Static mapping from phase id to nominal duration and the
//! temperature/pressure targets shown alongside a running timer. Targets are
//! used for reading validation only; they never drive timer control.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TimerError};

/// Sterilization step category, derived from the phase id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Chemical soak; the only kind subject to over-exposure tracking
    Bath,
    /// Drying; carries the chemical-indicator checkpoint
    Drying,
    /// Autoclave cycle; carries the biological-indicator checkpoint
    Autoclave,
    Other,
}

impl PhaseKind {
    /// Classify a phase by its id or display name
    pub fn from_id(id: &str) -> Self {
        let id = id.to_lowercase();
        if is_bath_phase(&id) {
            PhaseKind::Bath
        } else if id.contains("dry") {
            PhaseKind::Drying
        } else if id.contains("autoclave") || id.contains("steril") {
            PhaseKind::Autoclave
        } else {
            PhaseKind::Other
        }
    }
}

/// True when the phase name identifies a bath/soak step
pub fn is_bath_phase(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("bath") || name.contains("soak")
}

/// A target value with a symmetric tolerance band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub value: f64,
    pub tolerance: f64,
}

impl Target {
    pub fn new(value: f64, tolerance: f64) -> Self {
        Self { value, tolerance }
    }

    pub fn contains(&self, reading: f64) -> bool {
        (reading - self.value).abs() <= self.tolerance
    }
}

/// A sensor reading taken during a phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseReading {
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
}

/// A reading outside its tolerance band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingDeviation {
    pub quantity: String,
    pub reading: f64,
    pub target: Target,
}

/// Static configuration for a single phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Nominal duration in seconds
    pub duration: u64,
    #[serde(default)]
    pub temperature: Option<Target>,
    #[serde(default)]
    pub pressure: Option<Target>,
}

impl PhaseConfig {
    pub fn new(duration: u64) -> Self {
        Self {
            duration,
            temperature: None,
            pressure: None,
        }
    }

    pub fn with_temperature(mut self, target: Target) -> Self {
        self.temperature = Some(target);
        self
    }

    pub fn with_pressure(mut self, target: Target) -> Self {
        self.pressure = Some(target);
        self
    }

    /// Report every reading that falls outside its target band.
    ///
    /// Quantities without a configured target, or missing from the reading,
    /// are not checked.
    pub fn validate(&self, reading: &PhaseReading) -> Vec<ReadingDeviation> {
        let checks = [
            ("temperature", self.temperature, reading.temperature),
            ("pressure", self.pressure, reading.pressure),
        ];

        checks
            .into_iter()
            .filter_map(|(quantity, target, value)| match (target, value) {
                (Some(target), Some(value)) if !target.contains(value) => Some(ReadingDeviation {
                    quantity: quantity.to_string(),
                    reading: value,
                    target,
                }),
                _ => None,
            })
            .collect()
    }
}

/// Read-only lookup from phase id to configuration, loaded once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTable {
    phases: BTreeMap<String, PhaseConfig>,
}

impl PhaseTable {
    /// Build a table from explicit entries
    pub fn new(phases: impl IntoIterator<Item = (String, PhaseConfig)>) -> Self {
        Self {
            phases: phases.into_iter().collect(),
        }
    }

    /// Load a JSON object of `{ "<id>": PhaseConfig }` and merge it over the defaults
    pub fn load_with_overrides(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let overrides: BTreeMap<String, PhaseConfig> = serde_json::from_str(&raw)?;

        let mut table = Self::default();
        for (id, config) in overrides {
            if config.duration == 0 {
                return Err(TimerError::InvalidConfig(format!(
                    "phase '{}' must have a non-zero duration",
                    id
                )));
            }
            info!("Phase override loaded: {} ({}s)", id, config.duration);
            table.phases.insert(id, config);
        }
        Ok(table)
    }

    pub fn get(&self, id: &str) -> Option<&PhaseConfig> {
        self.phases.get(id)
    }

    /// Look up a phase, failing with `UnknownPhase`
    pub fn require(&self, id: &str) -> Result<&PhaseConfig> {
        self.get(id)
            .ok_or_else(|| TimerError::UnknownPhase(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.phases.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PhaseConfig)> {
        self.phases.iter().map(|(id, config)| (id.as_str(), config))
    }
}

impl Default for PhaseTable {
    fn default() -> Self {
        Self::new([
            (
                "bath".to_string(),
                PhaseConfig::new(1800).with_temperature(Target::new(22.0, 3.0)),
            ),
            (
                "drying".to_string(),
                PhaseConfig::new(900).with_temperature(Target::new(60.0, 10.0)),
            ),
            (
                "autoclave".to_string(),
                PhaseConfig::new(1200)
                    .with_temperature(Target::new(134.0, 3.0))
                    .with_pressure(Target::new(206.0, 10.0)),
            ),
        ])
    }
}
