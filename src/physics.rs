//! Deterministic physical models
//!
//! Tafel polarization, membrane degradation (two-phase and Arrhenius) and a
//! stack thermal balance. Every generator is a pure function of its
//! parameters and the run stamp.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{require_non_negative, require_nonzero, require_positive, require_finite};
use crate::{linspace, EpsilonFloor, PipelineError, PipelineResult, RunStamp, Signal, SimulationRun};

pub const POLARIZATION_MODEL: &str = "AEM_Electrolyzer_Polarization_v1";
pub const DEGRADATION_MODEL: &str = "AEM_Membrane_Degradation_v1";
pub const ARRHENIUS_MODEL: &str = "AEM_Membrane_Degradation_Arrhenius_v1";
pub const THERMAL_MODEL: &str = "AEM_Stack_Thermal_v1";

/// Absolute zero offset for Celsius to Kelvin.
const KELVIN_OFFSET: f64 = 273.15;

/// `V(j) = V0 + a·ln(max(j, ε)/j0) + r·j`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolarizationParams {
    /// Thermodynamic voltage (V)
    pub v0: f64,
    /// Tafel slope coefficient `a`
    pub tafel_slope: f64,
    /// Exchange current density (mA/cm²)
    pub j0: f64,
    /// Ohmic resistance `r`
    pub resistance: f64,
    /// Current density sweep start (mA/cm²)
    pub j_min: f64,
    /// Current density sweep end (mA/cm²)
    pub j_max: f64,
    pub samples: usize,
    /// Floor applied to `j` inside the logarithm
    pub epsilon: EpsilonFloor,
}

impl Default for PolarizationParams {
    fn default() -> Self {
        Self {
            v0: 1.23,
            tafel_slope: 0.03,
            j0: 0.1,
            resistance: 0.001,
            j_min: 0.0,
            j_max: 2000.0,
            samples: 50,
            epsilon: EpsilonFloor::DEFAULT,
        }
    }
}

impl PolarizationParams {
    pub fn validate(&self) -> PipelineResult<()> {
        require_finite("v0", self.v0)?;
        require_non_negative("tafel_slope", self.tafel_slope)?;
        require_positive("j0", self.j0)?;
        require_non_negative("resistance", self.resistance)?;
        require_non_negative("j_min", self.j_min)?;
        require_finite("j_max", self.j_max)?;
        if self.j_max < self.j_min {
            return Err(PipelineError::validation(format!(
                "j_max ({}) must be >= j_min ({})",
                self.j_max, self.j_min
            )));
        }
        require_nonzero("samples", self.samples)?;
        self.epsilon.validate()
    }

    /// Cell voltage at one current density.
    pub fn voltage_at(&self, j: f64) -> f64 {
        self.v0
            + self.tafel_slope * (self.epsilon.apply(j) / self.j0).ln()
            + self.resistance * j
    }

    pub fn parameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("V0".to_string(), self.v0),
            ("a".to_string(), self.tafel_slope),
            ("j0".to_string(), self.j0),
            ("r".to_string(), self.resistance),
            ("j_min".to_string(), self.j_min),
            ("j_max".to_string(), self.j_max),
            ("samples".to_string(), self.samples as f64),
            ("epsilon".to_string(), self.epsilon.0),
        ])
    }
}

/// Polarization curve: current density (mA/cm²) → cell voltage (V).
pub fn polarization_curve(
    params: &PolarizationParams,
    stamp: &RunStamp,
) -> PipelineResult<SimulationRun> {
    params.validate()?;
    let j = linspace(params.j_min, params.j_max, params.samples)?;
    let v: Vec<f64> = j.iter().map(|&j| params.voltage_at(j)).collect();
    let signal = Signal::from_columns("current_density_ma_cm2", "voltage_v", &j, &v)?;
    Ok(SimulationRun::new(stamp, POLARIZATION_MODEL, params.parameters(), signal))
}

/// Two-phase degradation: slow stabilization, then linear wear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationParams {
    pub operating_hours: f64,
    pub samples: usize,
    /// End of the stabilization phase (h)
    pub stabilization_hours: f64,
    /// %/h during stabilization
    pub initial_rate: f64,
    /// Degradation % at the start of the linear phase
    pub offset: f64,
    /// %/h during the linear phase
    pub linear_rate: f64,
    /// Beginning-of-life cell voltage (V)
    pub v0: f64,
}

impl Default for DegradationParams {
    fn default() -> Self {
        Self {
            operating_hours: 40000.0,
            samples: 100,
            stabilization_hours: 1000.0,
            initial_rate: 0.0001,
            offset: 0.1,
            linear_rate: 0.00015,
            v0: 1.23,
        }
    }
}

impl DegradationParams {
    pub fn validate(&self) -> PipelineResult<()> {
        require_positive("operating_hours", self.operating_hours)?;
        require_nonzero("samples", self.samples)?;
        require_non_negative("stabilization_hours", self.stabilization_hours)?;
        require_non_negative("initial_rate", self.initial_rate)?;
        require_non_negative("offset", self.offset)?;
        require_non_negative("linear_rate", self.linear_rate)?;
        require_positive("v0", self.v0)
    }

    /// Degradation percentage after `t` hours.
    pub fn degradation_at(&self, t: f64) -> f64 {
        if t < self.stabilization_hours {
            self.initial_rate * t
        } else {
            self.offset + self.linear_rate * (t - self.stabilization_hours)
        }
    }

    pub fn parameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("operating_hours".to_string(), self.operating_hours),
            ("samples".to_string(), self.samples as f64),
            ("stabilization_hours".to_string(), self.stabilization_hours),
            ("initial_degradation_rate".to_string(), self.initial_rate),
            ("degradation_offset".to_string(), self.offset),
            ("linear_degradation_rate".to_string(), self.linear_rate),
            ("V0".to_string(), self.v0),
        ])
    }
}

/// Degradation curve over `[0, operating_hours]` with a `voltage_v` channel.
pub fn degradation_curve(
    params: &DegradationParams,
    stamp: &RunStamp,
) -> PipelineResult<SimulationRun> {
    params.validate()?;
    let t = linspace(0.0, params.operating_hours, params.samples)?;
    let d: Vec<f64> = t.iter().map(|&t| params.degradation_at(t)).collect();
    let voltage: Vec<f64> = d.iter().map(|&d| params.v0 * (1.0 + d / 100.0)).collect();
    let signal = Signal::from_columns("time_hours", "degradation_percent", &t, &d)?;
    SimulationRun::new(stamp, DEGRADATION_MODEL, params.parameters(), signal)
        .with_channel("voltage_v", voltage)
}

/// `k = k0·exp(−Ea/(R·T))·√j`, `degradation = 1 − exp(−k·t)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrheniusParams {
    pub operating_hours: f64,
    pub samples: usize,
    pub temperature_c: f64,
    /// Current density (A/cm²)
    pub current_density: f64,
    /// Activation energy (J/mol)
    pub activation_energy: f64,
    /// Gas constant (J/(mol·K))
    pub gas_constant: f64,
    /// Pre-exponential rate (1/h)
    pub k0: f64,
}

impl Default for ArrheniusParams {
    fn default() -> Self {
        Self {
            operating_hours: 40000.0,
            samples: 100,
            temperature_c: 60.0,
            current_density: 1.0,
            activation_energy: 65000.0,
            gas_constant: 8.314,
            k0: 1e-5,
        }
    }
}

impl ArrheniusParams {
    pub fn validate(&self) -> PipelineResult<()> {
        require_positive("operating_hours", self.operating_hours)?;
        require_nonzero("samples", self.samples)?;
        require_positive("temperature_k", self.temperature_c + KELVIN_OFFSET)?;
        require_non_negative("current_density", self.current_density)?;
        require_non_negative("activation_energy", self.activation_energy)?;
        require_positive("gas_constant", self.gas_constant)?;
        require_non_negative("k0", self.k0)
    }

    /// Rate constant in 1/h.
    pub fn rate_constant(&self) -> f64 {
        let t_k = self.temperature_c + KELVIN_OFFSET;
        self.k0 * (-self.activation_energy / (self.gas_constant * t_k)).exp()
            * self.current_density.sqrt()
    }

    pub fn parameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("operating_hours".to_string(), self.operating_hours),
            ("samples".to_string(), self.samples as f64),
            ("temperature_c".to_string(), self.temperature_c),
            ("current_density".to_string(), self.current_density),
            ("E_a".to_string(), self.activation_energy),
            ("R".to_string(), self.gas_constant),
            ("k0".to_string(), self.k0),
        ])
    }
}

pub fn arrhenius_degradation(
    params: &ArrheniusParams,
    stamp: &RunStamp,
) -> PipelineResult<SimulationRun> {
    params.validate()?;
    let k = params.rate_constant();
    let t = linspace(0.0, params.operating_hours, params.samples)?;
    let d: Vec<f64> = t.iter().map(|&t| 100.0 * (1.0 - (-k * t).exp())).collect();
    let signal = Signal::from_columns("time_hours", "degradation_percent", &t, &d)?;
    Ok(SimulationRun::new(stamp, ARRHENIUS_MODEL, params.parameters(), signal))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalParams {
    pub ambient_c: f64,
    /// Thermal resistance (K·cm²/W)
    pub thermal_resistance: f64,
}

impl Default for ThermalParams {
    fn default() -> Self {
        Self {
            ambient_c: 25.0,
            thermal_resistance: 0.1,
        }
    }
}

impl ThermalParams {
    pub fn validate(&self) -> PipelineResult<()> {
        require_finite("ambient_c", self.ambient_c)?;
        require_non_negative("thermal_resistance", self.thermal_resistance)
    }
}

/// Stack temperature over the polarization sweep.
///
/// Heat is the electrical input above the thermodynamic voltage,
/// `(V − V0)·j`.
pub fn thermal_profile(
    polarization: &PolarizationParams,
    thermal: &ThermalParams,
    stamp: &RunStamp,
) -> PipelineResult<SimulationRun> {
    polarization.validate()?;
    thermal.validate()?;
    let j = linspace(polarization.j_min, polarization.j_max, polarization.samples)?;
    let v: Vec<f64> = j.iter().map(|&j| polarization.voltage_at(j)).collect();
    let heat: Vec<f64> = j
        .iter()
        .zip(&v)
        .map(|(&j, &v)| (v - polarization.v0) * j)
        .collect();
    let temp: Vec<f64> = heat
        .iter()
        .map(|&q| thermal.ambient_c + q * thermal.thermal_resistance)
        .collect();

    let mut parameters = polarization.parameters();
    parameters.insert("ambient_c".to_string(), thermal.ambient_c);
    parameters.insert("R_th".to_string(), thermal.thermal_resistance);

    let signal = Signal::from_columns("current_density_ma_cm2", "stack_temperature_c", &j, &temp)?;
    SimulationRun::new(stamp, THERMAL_MODEL, parameters, signal)
        .with_channel("heat_generation", heat)?
        .with_channel("cell_voltage_v", v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn stamp() -> RunStamp {
        RunStamp::at(Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_polarization_zero_current_is_finite() {
        let params = PolarizationParams::default();
        let run = polarization_curve(&params, &stamp()).unwrap();
        let (j, v) = run.signal.points[0];
        assert_eq!(j, 0.0);
        let expected = 1.23 + 0.03 * (1e-6f64 / 0.1).ln();
        assert!(v.is_finite());
        assert!((v - expected).abs() < 1e-12);
    }

    #[test]
    fn test_polarization_monotone() {
        let run = polarization_curve(&PolarizationParams::default(), &stamp()).unwrap();
        assert_eq!(run.signal.len(), 50);
        for w in run.signal.points.windows(2) {
            assert!(w[1].1 >= w[0].1, "voltage decreased: {:?}", w);
        }
    }

    #[test]
    fn test_polarization_rejects_bad_params() {
        let mut params = PolarizationParams::default();
        params.samples = 0;
        assert!(polarization_curve(&params, &stamp()).is_err());

        let mut params = PolarizationParams::default();
        params.j0 = 0.0;
        assert!(params.validate().is_err());

        let mut params = PolarizationParams::default();
        params.epsilon = EpsilonFloor(0.0);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_two_phase_degradation() {
        let params = DegradationParams::default();
        assert!((params.degradation_at(500.0) - 0.05).abs() < 1e-12);
        assert!((params.degradation_at(1000.0) - 0.1).abs() < 1e-12);
        assert!((params.degradation_at(40000.0) - (0.1 + 0.00015 * 39000.0)).abs() < 1e-9);

        let run = degradation_curve(&params, &stamp()).unwrap();
        assert_eq!(run.signal.len(), 100);
        let voltage = run.channel("voltage_v").unwrap();
        assert!((voltage[0] - 1.23).abs() < 1e-12);
    }

    #[test]
    fn test_arrhenius_bounded() {
        let run = arrhenius_degradation(&ArrheniusParams::default(), &stamp()).unwrap();
        let ys = run.signal.ys();
        assert_eq!(ys[0], 0.0);
        assert!(ys.iter().all(|&d| (0.0..=100.0).contains(&d)));
        assert!(ys.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_thermal_profile_channels() {
        let run = thermal_profile(
            &PolarizationParams::default(),
            &ThermalParams::default(),
            &stamp(),
        )
        .unwrap();
        assert_eq!(run.channel("heat_generation").unwrap().len(), 50);
        // No current, no heat
        assert_eq!(run.signal.points[0].1, 25.0);
    }

    #[test]
    fn test_physical_models_are_deterministic() {
        let a = polarization_curve(&PolarizationParams::default(), &stamp()).unwrap();
        let b = polarization_curve(&PolarizationParams::default(), &stamp()).unwrap();
        assert_eq!(a, b);
    }
}
