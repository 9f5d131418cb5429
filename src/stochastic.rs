//! Seeded stochastic scenarios: pilot production days and scale-up months.
//!
//! Both generators take an explicit seed and draw from `ChaCha8Rng`, so a
//! seed fully determines the output.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{require_nonzero, require_positive};
use crate::{PipelineResult, RunStamp, Signal, SimulationRun};

pub const PRODUCTION_MODEL: &str = "AEM_Pilot_Production_v1";
pub const SCALING_MODEL: &str = "AEM_Full_Scale_Deployment_v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionParams {
    pub days: usize,
    pub production_rate_mw_year: f64,
}

impl Default for ProductionParams {
    fn default() -> Self {
        Self {
            days: 30,
            production_rate_mw_year: 10.0,
        }
    }
}

impl ProductionParams {
    pub fn validate(&self) -> PipelineResult<()> {
        require_nonzero("days", self.days)?;
        require_positive("production_rate_mw_year", self.production_rate_mw_year)
    }

    pub fn parameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("days".to_string(), self.days as f64),
            ("production_rate_mw_year".to_string(), self.production_rate_mw_year),
        ])
    }
}

/// One simulated production day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionDay {
    pub day: usize,
    pub units_produced: u32,
    pub defect_rate: f64,
    pub energy_consumption_mwh: f64,
    pub hydrogen_output_kg: f64,
    pub quality_score: f64,
    pub downtime_minutes: u32,
}

fn draw_production_day(rng: &mut ChaCha8Rng, day: usize) -> ProductionDay {
    ProductionDay {
        day,
        units_produced: rng.gen_range(90..110),
        defect_rate: rng.gen_range(0.01..0.05),
        energy_consumption_mwh: rng.gen_range(8.0..12.0),
        hydrogen_output_kg: rng.gen_range(180.0..220.0),
        quality_score: rng.gen_range(0.85..0.98),
        downtime_minutes: rng.gen_range(0..60),
    }
}

/// Simulate `days` of pilot production. Primary signal is
/// (day, hydrogen output in kg).
pub fn production_run(
    params: &ProductionParams,
    seed: u64,
    stamp: &RunStamp,
) -> PipelineResult<SimulationRun> {
    params.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let days: Vec<ProductionDay> = (0..params.days)
        .map(|day| draw_production_day(&mut rng, day))
        .collect();

    let x: Vec<f64> = days.iter().map(|d| d.day as f64).collect();
    let y: Vec<f64> = days.iter().map(|d| d.hydrogen_output_kg).collect();
    let signal = Signal::from_columns("day", "hydrogen_output_kg", &x, &y)?;

    let column = |f: fn(&ProductionDay) -> f64| days.iter().map(f).collect::<Vec<f64>>();
    SimulationRun::new(stamp, PRODUCTION_MODEL, params.parameters(), signal)
        .with_seed(seed)
        .with_channel("units_produced", column(|d| d.units_produced as f64))?
        .with_channel("defect_rate", column(|d| d.defect_rate))?
        .with_channel("energy_consumption_mwh", column(|d| d.energy_consumption_mwh))?
        .with_channel("quality_score", column(|d| d.quality_score))?
        .with_channel("downtime_minutes", column(|d| d.downtime_minutes as f64))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingParams {
    pub months: usize,
    pub target_capacity_mw_year: f64,
    /// Months needed to reach the target capacity
    pub ramp_months: f64,
}

impl Default for ScalingParams {
    fn default() -> Self {
        Self {
            months: 12,
            target_capacity_mw_year: 100.0,
            ramp_months: 6.0,
        }
    }
}

impl ScalingParams {
    pub fn validate(&self) -> PipelineResult<()> {
        require_nonzero("months", self.months)?;
        require_positive("target_capacity_mw_year", self.target_capacity_mw_year)?;
        require_positive("ramp_months", self.ramp_months)
    }

    pub fn parameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("months".to_string(), self.months as f64),
            ("target_capacity_mw_year".to_string(), self.target_capacity_mw_year),
            ("ramp_months".to_string(), self.ramp_months),
        ])
    }
}

/// Digital-twin accuracy bounds for month index `m`, ordered and capped at 1.
fn twin_accuracy_bounds(m: f64) -> (f64, f64) {
    let a = (0.85 + 0.01 * m).min(1.0);
    let b = (0.95 + 0.005 * m).min(1.0);
    (a.min(b), a.max(b))
}

/// Simulate the monthly scale-up. Primary signal is (month, capacity).
pub fn scaling_run(
    params: &ScalingParams,
    seed: u64,
    stamp: &RunStamp,
) -> PipelineResult<SimulationRun> {
    params.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut month = Vec::with_capacity(params.months);
    let mut capacity = Vec::with_capacity(params.months);
    let mut capital = Vec::with_capacity(params.months);
    let mut opex = Vec::with_capacity(params.months);
    let mut efficiency = Vec::with_capacity(params.months);
    let mut accuracy = Vec::with_capacity(params.months);
    let mut rounds = Vec::with_capacity(params.months);

    for m in 0..params.months {
        let n = (m + 1) as f64;
        month.push(n);
        capacity.push(
            params
                .target_capacity_mw_year
                .min(n * params.target_capacity_mw_year / params.ramp_months),
        );
        capital.push(rng.gen_range(5.0..10.0) * n);
        opex.push(rng.gen_range(0.5..1.5) * n);
        efficiency.push(rng.gen_range(0.005..0.015) * n);
        let (lo, hi) = twin_accuracy_bounds(m as f64);
        accuracy.push(if hi > lo { rng.gen_range(lo..hi) } else { lo });
        rounds.push(10.0 * n);
    }

    let signal = Signal::from_columns("month", "capacity_mw_year", &month, &capacity)?;
    SimulationRun::new(stamp, SCALING_MODEL, params.parameters(), signal)
        .with_seed(seed)
        .with_channel("capital_cost_m", capital)?
        .with_channel("operational_cost_m", opex)?
        .with_channel("efficiency_improvement", efficiency)?
        .with_channel("digital_twin_accuracy", accuracy)?
        .with_channel("federated_learning_rounds", rounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn stamp() -> RunStamp {
        RunStamp::at(Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_production_reproducible_by_seed() {
        let params = ProductionParams::default();
        let a = production_run(&params, 42, &stamp()).unwrap();
        let b = production_run(&params, 42, &stamp()).unwrap();
        let c = production_run(&params, 43, &stamp()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.signal, c.signal);
        assert_eq!(a.seed, Some(42));
    }

    #[test]
    fn test_production_ranges() {
        let run = production_run(&ProductionParams::default(), 7, &stamp()).unwrap();
        assert_eq!(run.signal.len(), 30);
        assert!(run.signal.ys().iter().all(|&h| (180.0..220.0).contains(&h)));
        let units = run.channel("units_produced").unwrap();
        assert!(units.iter().all(|&u| (90.0..110.0).contains(&u) && u.fract() == 0.0));
        let downtime = run.channel("downtime_minutes").unwrap();
        assert!(downtime.iter().all(|&d| (0.0..60.0).contains(&d)));
    }

    #[test]
    fn test_zero_days_rejected() {
        let params = ProductionParams {
            days: 0,
            ..ProductionParams::default()
        };
        assert!(production_run(&params, 1, &stamp()).is_err());
    }

    #[test]
    fn test_scaling_capacity_ramp() {
        let run = scaling_run(&ScalingParams::default(), 42, &stamp()).unwrap();
        let capacity = run.signal.ys();
        assert!((capacity[0] - 100.0 / 6.0).abs() < 1e-12);
        assert_eq!(capacity[5], 100.0);
        assert_eq!(capacity[11], 100.0);
        let rounds = run.channel("federated_learning_rounds").unwrap();
        assert_eq!(rounds[11], 120.0);
    }

    #[test]
    fn test_scaling_long_horizon_accuracy_capped() {
        let params = ScalingParams {
            months: 40,
            ..ScalingParams::default()
        };
        let run = scaling_run(&params, 3, &stamp()).unwrap();
        let accuracy = run.channel("digital_twin_accuracy").unwrap();
        assert!(accuracy.iter().all(|&a| (0.85..=1.0).contains(&a)));
    }

    #[test]
    fn test_twin_bounds_ordered() {
        for m in 0..100 {
            let (lo, hi) = twin_accuracy_bounds(m as f64);
            assert!(lo <= hi);
            assert!(hi <= 1.0);
        }
    }
}
