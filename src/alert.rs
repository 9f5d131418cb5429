//! Predictive alert classification
//!
//! An ordered decision table; the first violated row wins, so simultaneous
//! violations always resolve to the same single code.

use serde::{Deserialize, Serialize};

use crate::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCode {
    Normal,
    OverTemperature,
    OverPressure,
    MembraneDegradation,
}

impl AlertCode {
    pub fn code(self) -> u8 {
        match self {
            AlertCode::Normal => 0,
            AlertCode::OverTemperature => 1,
            AlertCode::OverPressure => 2,
            AlertCode::MembraneDegradation => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AlertCode::Normal),
            1 => Some(AlertCode::OverTemperature),
            2 => Some(AlertCode::OverPressure),
            3 => Some(AlertCode::MembraneDegradation),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AlertCode::Normal => "Normal",
            AlertCode::OverTemperature => "Over-temperature",
            AlertCode::OverPressure => "Over-pressure",
            AlertCode::MembraneDegradation => "Membrane degradation",
        }
    }

    pub fn is_alert(self) -> bool {
        self != AlertCode::Normal
    }
}

impl std::fmt::Display for AlertCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub max_temperature_c: f64,
    pub max_pressure_bar: f64,
    pub max_membrane_resistance_ohm: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_temperature_c: 70.0,
            max_pressure_bar: 35.0,
            max_membrane_resistance_ohm: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub temperature_c: f64,
    pub pressure_bar: f64,
    pub membrane_resistance_ohm: f64,
}

/// One row of the decision table.
pub struct AlertRule {
    pub code: AlertCode,
    pub violated: fn(&SensorReading, &AlertThresholds) -> bool,
}

fn over_temperature(r: &SensorReading, t: &AlertThresholds) -> bool {
    r.temperature_c > t.max_temperature_c
}

fn over_pressure(r: &SensorReading, t: &AlertThresholds) -> bool {
    r.pressure_bar > t.max_pressure_bar
}

fn membrane_degraded(r: &SensorReading, t: &AlertThresholds) -> bool {
    r.membrane_resistance_ohm > t.max_membrane_resistance_ohm
}

/// Rows in priority order.
pub const ALERT_TABLE: [AlertRule; 3] = [
    AlertRule {
        code: AlertCode::OverTemperature,
        violated: over_temperature,
    },
    AlertRule {
        code: AlertCode::OverPressure,
        violated: over_pressure,
    },
    AlertRule {
        code: AlertCode::MembraneDegradation,
        violated: membrane_degraded,
    },
];

/// Classify one reading. Total: NaN comparisons are false, so a NaN reading
/// falls through to `Normal`.
pub fn classify(reading: &SensorReading, thresholds: &AlertThresholds) -> AlertCode {
    ALERT_TABLE
        .iter()
        .find(|rule| (rule.violated)(reading, thresholds))
        .map(|rule| rule.code)
        .unwrap_or(AlertCode::Normal)
}

/// Classify aligned temperature / pressure / resistance series.
pub fn classify_series(
    temperature: &[f64],
    pressure: &[f64],
    resistance: &[f64],
    thresholds: &AlertThresholds,
) -> PipelineResult<Vec<AlertCode>> {
    if temperature.len() != pressure.len() || pressure.len() != resistance.len() {
        return Err(PipelineError::validation(format!(
            "alert inputs differ in length: {}/{}/{}",
            temperature.len(),
            pressure.len(),
            resistance.len()
        )));
    }
    Ok(temperature
        .iter()
        .zip(pressure)
        .zip(resistance)
        .map(|((&t, &p), &r)| {
            classify(
                &SensorReading {
                    temperature_c: t,
                    pressure_bar: p,
                    membrane_resistance_ohm: r,
                },
                thresholds,
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reading(t: f64, p: f64, r: f64) -> SensorReading {
        SensorReading {
            temperature_c: t,
            pressure_bar: p,
            membrane_resistance_ohm: r,
        }
    }

    #[test]
    fn test_priority_order() {
        let th = AlertThresholds::default();
        assert_eq!(classify(&reading(60.0, 30.0, 0.1), &th), AlertCode::Normal);
        assert_eq!(classify(&reading(71.0, 36.0, 0.2), &th), AlertCode::OverTemperature);
        assert_eq!(classify(&reading(65.0, 36.0, 0.2), &th), AlertCode::OverPressure);
        assert_eq!(classify(&reading(65.0, 30.0, 0.2), &th), AlertCode::MembraneDegradation);
        // Threshold itself is not a violation
        assert_eq!(classify(&reading(70.0, 35.0, 0.15), &th), AlertCode::Normal);
    }

    #[test]
    fn test_code_round_trip() {
        for code in 0..4u8 {
            assert_eq!(AlertCode::from_code(code).unwrap().code(), code);
        }
        assert!(AlertCode::from_code(4).is_none());
    }

    #[test]
    fn test_nan_reading_is_normal() {
        let th = AlertThresholds::default();
        assert_eq!(classify(&reading(f64::NAN, f64::NAN, f64::NAN), &th), AlertCode::Normal);
    }

    #[test]
    fn test_series_length_mismatch() {
        let th = AlertThresholds::default();
        assert!(classify_series(&[1.0], &[1.0, 2.0], &[1.0], &th).is_err());
    }

    proptest! {
        #[test]
        fn prop_classification_matches_highest_priority(
            t in 0.0f64..100.0,
            p in 0.0f64..50.0,
            r in 0.0f64..0.3,
        ) {
            let th = AlertThresholds::default();
            let expected = if t > th.max_temperature_c {
                AlertCode::OverTemperature
            } else if p > th.max_pressure_bar {
                AlertCode::OverPressure
            } else if r > th.max_membrane_resistance_ohm {
                AlertCode::MembraneDegradation
            } else {
                AlertCode::Normal
            };
            let got = classify(&reading(t, p, r), &th);
            prop_assert_eq!(got, expected);
            prop_assert_eq!(got, classify(&reading(t, p, r), &th));
        }
    }
}
