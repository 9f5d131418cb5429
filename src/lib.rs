//! aemtrace - verifiable simulation artifacts for AEM electrolyzer research
//!
//! Closed-form models (Tafel polarization, membrane degradation, stack
//! thermal balance, a synthetic pilot-plant trace, seeded production and
//! scaling scenarios) are turned into hashed, ledger-recorded artifacts and
//! rolled up into one validation report per phase.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub mod aggregator;
pub mod alert;
pub mod artifact;
pub mod error;
pub mod hardware;
pub mod ledger;
pub mod metrics;
pub mod optimizer;
pub mod phases;
pub mod physics;
pub mod render;
pub mod stochastic;

pub use error::{PipelineError, PipelineResult};
pub use metrics::{DerivedMetrics, MetricValue};

use crate::hardware::HardwareParams;
use crate::metrics::EdgeParams;
use crate::optimizer::OptimizerParams;
use crate::physics::{ArrheniusParams, DegradationParams, PolarizationParams, ThermalParams};
use crate::stochastic::{ProductionParams, ScalingParams};

/// Identifier of one simulation run, derived from its timestamp.
///
/// Safe to embed in file names: no `:` and no path separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Deterministic id for a timestamp.
    pub fn at(ts: DateTime<Utc>) -> Self {
        Self(ts.format("%Y%m%dT%H%M%S%.6fZ").to_string())
    }

    /// Timestamp id plus a random nonce, for invocations that may share a
    /// microsecond.
    pub fn unique(ts: DateTime<Utc>) -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", Self::at(ts).0, &nonce[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity and wall-clock time of a run. Passed explicitly into every
/// generator so that outputs are a function of their inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStamp {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
}

impl RunStamp {
    pub fn at(created_at: DateTime<Utc>) -> Self {
        Self {
            run_id: RunId::at(created_at),
            created_at,
        }
    }

    pub fn unique(created_at: DateTime<Utc>) -> Self {
        Self {
            run_id: RunId::unique(created_at),
            created_at,
        }
    }
}

/// ISO-8601 rendering used in ledgers, tables and reports.
pub fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Lower bound applied to log and division arguments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpsilonFloor(pub f64);

impl EpsilonFloor {
    pub const DEFAULT: EpsilonFloor = EpsilonFloor(1e-6);

    pub fn apply(self, x: f64) -> f64 {
        x.max(self.0)
    }

    pub fn validate(self) -> PipelineResult<()> {
        error::require_positive("epsilon", self.0)
    }
}

impl Default for EpsilonFloor {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// `n` evenly spaced samples over `[start, end]`, endpoints included.
pub fn linspace(start: f64, end: f64, n: usize) -> PipelineResult<Vec<f64>> {
    error::require_nonzero("samples", n)?;
    error::require_finite("start", start)?;
    error::require_finite("end", end)?;
    if n == 1 {
        return Ok(vec![start]);
    }
    let step = (end - start) / (n - 1) as f64;
    let mut out: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
    out[n - 1] = end;
    Ok(out)
}

/// Ordered primary signal of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<(f64, f64)>,
}

impl Signal {
    pub fn from_columns(
        x_label: &str,
        y_label: &str,
        xs: &[f64],
        ys: &[f64],
    ) -> PipelineResult<Self> {
        if xs.len() != ys.len() {
            return Err(PipelineError::validation(format!(
                "signal columns differ in length: {} vs {}",
                xs.len(),
                ys.len()
            )));
        }
        Ok(Self {
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            points: xs.iter().copied().zip(ys.iter().copied()).collect(),
        })
    }

    pub fn xs(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.0).collect()
    }

    pub fn ys(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.1).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// One execution of a generator with a fixed parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    /// Model/algorithm identifier, e.g. `AEM_Electrolyzer_Polarization_v1`
    pub model: String,
    /// Seed for stochastic generators; `None` for physical models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub parameters: BTreeMap<String, f64>,
    pub signal: Signal,
    /// Auxiliary sequences aligned index-for-index with `signal`
    #[serde(default)]
    pub channels: BTreeMap<String, Vec<f64>>,
}

impl SimulationRun {
    pub fn new(
        stamp: &RunStamp,
        model: &str,
        parameters: BTreeMap<String, f64>,
        signal: Signal,
    ) -> Self {
        Self {
            run_id: stamp.run_id.clone(),
            created_at: stamp.created_at,
            model: model.to_string(),
            seed: None,
            parameters,
            signal,
            channels: BTreeMap::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Attach an aligned channel. Length must match the primary signal.
    pub fn with_channel(mut self, name: &str, values: Vec<f64>) -> PipelineResult<Self> {
        if values.len() != self.signal.len() {
            return Err(PipelineError::validation(format!(
                "channel {name} has {} samples, signal has {}",
                values.len(),
                self.signal.len()
            )));
        }
        self.channels.insert(name.to_string(), values);
        Ok(self)
    }

    pub fn channel(&self, name: &str) -> PipelineResult<&[f64]> {
        self.channels
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| {
                PipelineError::validation(format!("run {} has no channel {name}", self.run_id))
            })
    }
}

/// Full configuration: output root, default seed and one block per generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output root; each phase writes below `<output_dir>/<phase id>/`
    pub output_dir: PathBuf,
    /// Seed for stochastic generators when no `--seed` is given
    pub seed: u64,
    pub polarization: PolarizationParams,
    pub degradation: DegradationParams,
    pub arrhenius: ArrheniusParams,
    pub thermal: ThermalParams,
    pub hardware: HardwareParams,
    pub edge: EdgeParams,
    pub production: ProductionParams,
    pub scaling: ScalingParams,
    pub optimizer: OptimizerParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./outputs"),
            seed: 42,
            polarization: PolarizationParams::default(),
            degradation: DegradationParams::default(),
            arrhenius: ArrheniusParams::default(),
            thermal: ThermalParams::default(),
            hardware: HardwareParams::default(),
            edge: EdgeParams::default(),
            production: ProductionParams::default(),
            scaling: ScalingParams::default(),
            optimizer: OptimizerParams::default(),
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_json(&json)
    }

    /// Validate every parameter block.
    pub fn validate(&self) -> PipelineResult<()> {
        self.polarization.validate()?;
        self.degradation.validate()?;
        self.arrhenius.validate()?;
        self.thermal.validate()?;
        self.hardware.validate()?;
        self.edge.validate()?;
        self.production.validate()?;
        self.scaling.validate()?;
        self.optimizer.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_id_is_path_safe() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 15).unwrap();
        let id = RunId::at(ts);
        assert_eq!(id.0, "20261018T093015.000000Z");
        assert!(!id.0.contains(':'));
        assert!(!id.0.contains('/'));

        let unique = RunId::unique(ts);
        assert!(unique.0.starts_with(&id.0));
        assert_ne!(RunId::unique(ts), unique);
    }

    #[test]
    fn test_linspace() {
        let xs = linspace(0.0, 2000.0, 50).unwrap();
        assert_eq!(xs.len(), 50);
        assert_eq!(xs[0], 0.0);
        assert_eq!(xs[49], 2000.0);
        assert_eq!(linspace(3.0, 9.0, 1).unwrap(), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_err());
    }

    #[test]
    fn test_channel_alignment_enforced() {
        let stamp = RunStamp::at(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let signal = Signal::from_columns("x", "y", &[0.0, 1.0], &[2.0, 3.0]).unwrap();
        let run = SimulationRun::new(&stamp, "test", BTreeMap::new(), signal);
        assert!(run.clone().with_channel("ok", vec![1.0, 2.0]).is_ok());
        assert!(run.with_channel("short", vec![1.0]).is_err());
    }

    #[test]
    fn test_config_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_config_partial_json() {
        let config = Config::from_json(r#"{"seed": 7, "polarization": {"samples": 10}}"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.polarization.samples, 10);
        assert_eq!(config.polarization.v0, 1.23);
    }

    #[test]
    fn test_config_rejects_bad_block() {
        let config = Config::from_json(r#"{"hardware": {"duration_hours": -1.0}}"#).unwrap();
        assert!(matches!(config.validate(), Err(PipelineError::Validation(_))));
    }
}
