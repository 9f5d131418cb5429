//! Synthetic pilot-plant sensor trace
//!
//! Seven periodic/linear sensor channels sampled over a fixed duration.
//! Used as the input of the edge processor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{require_nonzero, require_positive};
use crate::metrics::Summary;
use crate::{linspace, PipelineResult, RunStamp, Signal, SimulationRun};

pub const HARDWARE_MODEL: &str = "AEM_Pilot_System_HIL_v1";

pub const TEMPERATURE: &str = "temperature_c";
pub const PRESSURE: &str = "pressure_bar";
pub const CURRENT: &str = "current_a";
pub const VOLTAGE: &str = "voltage_v";
pub const HYDROGEN: &str = "hydrogen_production_l_h";
pub const MEMBRANE_RESISTANCE: &str = "membrane_resistance_ohm";
pub const COOLANT_FLOW: &str = "coolant_flow_l_min";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// `offset + amplitude·sin(t/period)`
    Sin { period: f64 },
    /// `offset + amplitude·cos(t/period)`
    Cos { period: f64 },
    /// `offset + amplitude·t/scale`
    Linear { scale: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorChannel {
    pub name: &'static str,
    pub offset: f64,
    pub amplitude: f64,
    pub waveform: Waveform,
}

impl SensorChannel {
    pub fn sample(&self, t_hours: f64) -> f64 {
        let shape = match self.waveform {
            Waveform::Sin { period } => (t_hours / period).sin(),
            Waveform::Cos { period } => (t_hours / period).cos(),
            Waveform::Linear { scale } => t_hours / scale,
        };
        self.offset + self.amplitude * shape
    }
}

/// Sensor set of the pilot system, in CSV column order.
pub const PILOT_CHANNELS: [SensorChannel; 7] = [
    sensor(TEMPERATURE, 60.0, 5.0, Waveform::Sin { period: 6.0 }),
    sensor(PRESSURE, 30.0, 2.0, Waveform::Cos { period: 12.0 }),
    sensor(CURRENT, 100.0, 20.0, Waveform::Sin { period: 8.0 }),
    sensor(VOLTAGE, 1.8, 0.2, Waveform::Cos { period: 10.0 }),
    sensor(HYDROGEN, 10.0, 3.0, Waveform::Sin { period: 6.0 }),
    sensor(MEMBRANE_RESISTANCE, 0.1, 0.02, Waveform::Linear { scale: 100.0 }),
    sensor(COOLANT_FLOW, 2.0, 0.5, Waveform::Sin { period: 12.0 }),
];

const fn sensor(
    name: &'static str,
    offset: f64,
    amplitude: f64,
    waveform: Waveform,
) -> SensorChannel {
    SensorChannel { name, offset, amplitude, waveform }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareParams {
    pub duration_hours: f64,
    pub samples: usize,
}

impl Default for HardwareParams {
    fn default() -> Self {
        Self {
            duration_hours: 24.0,
            samples: 100,
        }
    }
}

impl HardwareParams {
    pub fn validate(&self) -> PipelineResult<()> {
        require_positive("duration_hours", self.duration_hours)?;
        require_nonzero("samples", self.samples)
    }

    pub fn parameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("duration_hours".to_string(), self.duration_hours),
            ("samples".to_string(), self.samples as f64),
        ])
    }
}

/// Simulate the pilot system. Primary signal is (hours, temperature); every
/// sensor is also attached as a channel.
pub fn pilot_trace(params: &HardwareParams, stamp: &RunStamp) -> PipelineResult<SimulationRun> {
    params.validate()?;
    let t = linspace(0.0, params.duration_hours, params.samples)?;
    let temperature: Vec<f64> = t.iter().map(|&t| PILOT_CHANNELS[0].sample(t)).collect();
    let signal = Signal::from_columns("time_hours", TEMPERATURE, &t, &temperature)?;

    let mut run = SimulationRun::new(stamp, HARDWARE_MODEL, params.parameters(), signal);
    for channel in PILOT_CHANNELS.iter() {
        let values = t.iter().map(|&t| channel.sample(t)).collect();
        run = run.with_channel(channel.name, values)?;
    }
    Ok(run)
}

/// Wall-clock time of every sample: `created_at + t hours`.
pub fn sample_timestamps(run: &SimulationRun) -> Vec<DateTime<Utc>> {
    run.signal
        .points
        .iter()
        .map(|&(hours, _)| run.created_at + Duration::microseconds((hours * 3.6e9).round() as i64))
        .collect()
}

/// Headline statistics of a pilot trace.
#[derive(Debug, Clone, Serialize)]
pub struct HardwareSummary {
    pub avg_temperature: f64,
    pub avg_pressure: f64,
    pub avg_hydrogen_production: f64,
    pub max_voltage: f64,
    pub min_voltage: f64,
}

impl HardwareSummary {
    pub fn of(run: &SimulationRun) -> PipelineResult<Self> {
        let mean = |name: &str| -> PipelineResult<f64> {
            Ok(Summary::of(run.channel(name)?).map(|s| s.mean).unwrap_or(0.0))
        };
        let voltage = Summary::of(run.channel(VOLTAGE)?);
        Ok(Self {
            avg_temperature: mean(TEMPERATURE)?,
            avg_pressure: mean(PRESSURE)?,
            avg_hydrogen_production: mean(HYDROGEN)?,
            max_voltage: voltage.as_ref().map(|s| s.max).unwrap_or(0.0),
            min_voltage: voltage.as_ref().map(|s| s.min).unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stamp() -> RunStamp {
        RunStamp::at(Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_pilot_trace_shape() {
        let run = pilot_trace(&HardwareParams::default(), &stamp()).unwrap();
        assert_eq!(run.signal.len(), 100);
        assert_eq!(run.channels.len(), PILOT_CHANNELS.len());
        assert_eq!(run.channel(TEMPERATURE).unwrap()[0], 60.0);
        assert_eq!(run.channel(PRESSURE).unwrap()[0], 32.0);
        let resistance = run.channel(MEMBRANE_RESISTANCE).unwrap();
        assert!((resistance[99] - (0.1 + 0.02 * 0.24)).abs() < 1e-12);
    }

    #[test]
    fn test_timestamps_follow_hours() {
        let run = pilot_trace(&HardwareParams::default(), &stamp()).unwrap();
        let ts = sample_timestamps(&run);
        assert_eq!(ts[0], run.created_at);
        assert_eq!(ts[99], run.created_at + Duration::hours(24));
    }

    #[test]
    fn test_non_positive_duration_rejected() {
        let params = HardwareParams {
            duration_hours: 0.0,
            samples: 10,
        };
        assert!(pilot_trace(&params, &stamp()).is_err());
    }

    #[test]
    fn test_summary() {
        let run = pilot_trace(&HardwareParams::default(), &stamp()).unwrap();
        let summary = HardwareSummary::of(&run).unwrap();
        assert!(summary.max_voltage <= 2.0 + 1e-12);
        assert!(summary.min_voltage >= 1.6 - 1e-12);
        assert!(summary.avg_temperature > 55.0 && summary.avg_temperature < 65.0);
    }
}
