//! Derived metrics
//!
//! Filters, anomaly detectors and efficiency figures computed from a
//! [`SimulationRun`], plus one builder per model that collects the headline
//! numbers into a [`DerivedMetrics`] map. Nothing here mutates its input.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use crate::alert::{self, AlertThresholds};
use crate::error::{require_non_negative, require_nonzero};
use crate::hardware::{CURRENT, HYDROGEN, MEMBRANE_RESISTANCE, PRESSURE, TEMPERATURE, VOLTAGE};
use crate::optimizer::OptimizerParams;
use crate::physics::{ArrheniusParams, PolarizationParams};
use crate::{EpsilonFloor, PipelineError, PipelineResult, SimulationRun};

/// One derived quantity.
///
/// Serialized untagged. An empty sequence has no type on the wire and reads
/// back as `Codes(vec![])`; the accessors treat an empty `Codes` and an empty
/// `Series` as the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    /// Small integer flags or codes, e.g. anomaly bits and alert codes
    Codes(Vec<u8>),
    Series(Vec<f64>),
}

impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&[f64]> {
        match self {
            MetricValue::Series(v) => Some(v),
            MetricValue::Codes(v) if v.is_empty() => Some(&[][..]),
            _ => None,
        }
    }

    pub fn as_codes(&self) -> Option<&[u8]> {
        match self {
            MetricValue::Codes(v) => Some(v),
            MetricValue::Series(v) if v.is_empty() => Some(&[][..]),
            _ => None,
        }
    }
}

pub type DerivedMetrics = BTreeMap<String, MetricValue>;

/// Min / max / mean of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

impl Summary {
    /// `None` for an empty slice.
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(Self {
            min,
            max,
            mean,
            count: values.len(),
        })
    }

    /// Equal within `tol` on every statistic, same count.
    pub fn approx_eq(&self, other: &Summary, tol: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tol * (1.0 + a.abs().max(b.abs()));
        self.count == other.count
            && close(self.min, other.min)
            && close(self.max, other.max)
            && close(self.mean, other.mean)
    }
}

/// Centered moving average over `window` samples.
///
/// Near the edges the window is truncated and the mean is taken over the
/// samples actually present, so a constant input stays constant.
pub fn moving_average(data: &[f64], window: usize) -> PipelineResult<Vec<f64>> {
    require_nonzero("window", window)?;
    let n = data.len();
    let left = window / 2;
    let right = (window - 1) / 2;
    Ok((0..n)
        .map(|i| {
            let slice = &data[i.saturating_sub(left)..(i + right + 1).min(n)];
            // Summation rounding must not perturb a flat window
            if slice.iter().all(|&x| x == slice[0]) {
                slice[0]
            } else {
                slice.iter().sum::<f64>() / slice.len() as f64
            }
        })
        .collect())
}

/// Batch anomaly flags: `1` where `|x - mean| > k·std` over the whole input.
pub fn detect_anomalies(data: &[f64], k: f64) -> Vec<u8> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }
    if data.iter().all(|&x| x == data[0]) {
        return vec![0; n];
    }
    let mean = data.iter().sum::<f64>() / n as f64;
    let var = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    let bound = k * var.sqrt();
    data.iter()
        .map(|&x| u8::from((x - mean).abs() > bound))
        .collect()
}

/// Incremental anomaly detector over a bounded window.
///
/// Each sample is judged against the mean and population standard deviation
/// of the samples that preceded it in the window, then enters the window.
/// Mean and spread are kept with a sliding Welford update, so memory stays
/// `O(window)` and a flat window has exactly zero spread.
#[derive(Debug, Clone)]
pub struct StreamingAnomalyDetector {
    window: usize,
    k: f64,
    buffer: VecDeque<f64>,
    mean: f64,
    /// Sum of squared deviations from `mean`
    m2: f64,
    /// Length of the trailing run of identical samples
    run: usize,
}

impl StreamingAnomalyDetector {
    pub fn new(window: usize, k: f64) -> PipelineResult<Self> {
        require_nonzero("streaming_window", window)?;
        require_non_negative("anomaly_sigma", k)?;
        Ok(Self {
            window,
            k,
            buffer: VecDeque::with_capacity(window),
            mean: 0.0,
            m2: 0.0,
            run: 0,
        })
    }

    /// Judge one sample, then add it to the window.
    pub fn push(&mut self, x: f64) -> u8 {
        let len = self.buffer.len();
        let flag = if len < 2 {
            0
        } else if self.run >= len {
            // Every buffered sample is identical: any other value deviates.
            u8::from(self.buffer.back().is_some_and(|&v| v != x))
        } else {
            let std = (self.m2 / len as f64).max(0.0).sqrt();
            u8::from((x - self.mean).abs() > self.k * std)
        };

        let last = self.buffer.back().copied();
        if len == self.window {
            if let Some(old) = self.buffer.pop_front() {
                self.replace(old, x);
            }
        } else {
            let n = (len + 1) as f64;
            let delta = x - self.mean;
            self.mean += delta / n;
            self.m2 = (self.m2 + delta * (x - self.mean)).max(0.0);
        }
        self.buffer.push_back(x);
        self.run = if last == Some(x) { self.run + 1 } else { 1 };
        flag
    }

    fn replace(&mut self, old: f64, x: f64) {
        if self.window == 1 {
            self.mean = x;
            self.m2 = 0.0;
            return;
        }
        let delta = x - old;
        let mean = self.mean + delta / self.window as f64;
        self.m2 = (self.m2 + delta * ((x - mean) + (old - self.mean))).max(0.0);
        self.mean = mean;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Run the detector over a whole sequence.
    pub fn scan(mut self, data: &[f64]) -> Vec<u8> {
        data.iter().map(|&x| self.push(x)).collect()
    }
}

/// Every `factor`-th sample, starting with the first.
pub fn decimate(data: &[f64], factor: usize) -> PipelineResult<Vec<f64>> {
    require_nonzero("compression_factor", factor)?;
    Ok(data.iter().step_by(factor).copied().collect())
}

/// `hydrogen / max(V·I, ε) · 100`
pub fn electrolysis_efficiency(
    voltage: f64,
    current: f64,
    hydrogen: f64,
    eps: EpsilonFloor,
) -> f64 {
    hydrogen / eps.apply(voltage * current) * 100.0
}

/// `v0 / max(V, ε) · 100`
pub fn voltage_efficiency(v0: f64, voltage: f64, eps: EpsilonFloor) -> f64 {
    v0 / eps.apply(voltage) * 100.0
}

/// Settings of the edge processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeParams {
    pub moving_average_window: usize,
    /// Anomaly bound in standard deviations
    pub anomaly_sigma: f64,
    pub compression_factor: usize,
    /// Use the bounded streaming detector with this window instead of the
    /// batch detector
    pub streaming_window: Option<usize>,
    pub epsilon: EpsilonFloor,
    pub thresholds: AlertThresholds,
}

impl Default for EdgeParams {
    fn default() -> Self {
        Self {
            moving_average_window: 10,
            anomaly_sigma: 2.0,
            compression_factor: 10,
            streaming_window: None,
            epsilon: EpsilonFloor::DEFAULT,
            thresholds: AlertThresholds::default(),
        }
    }
}

impl EdgeParams {
    pub fn validate(&self) -> PipelineResult<()> {
        require_nonzero("moving_average_window", self.moving_average_window)?;
        require_non_negative("anomaly_sigma", self.anomaly_sigma)?;
        require_nonzero("compression_factor", self.compression_factor)?;
        if let Some(window) = self.streaming_window {
            require_nonzero("streaming_window", window)?;
        }
        self.epsilon.validate()
    }

    /// Algorithms applied, in report order.
    pub fn algorithms(&self) -> Vec<&'static str> {
        vec![
            "moving_average_filter",
            if self.streaming_window.is_some() {
                "streaming_anomaly_detection"
            } else {
                "anomaly_detection"
            },
            "data_compression",
            "efficiency_calculation",
            "predictive_alert_generation",
        ]
    }
}

fn scalar(metrics: &mut DerivedMetrics, key: &str, value: f64) {
    metrics.insert(key.to_string(), MetricValue::Scalar(value));
}

fn series(metrics: &mut DerivedMetrics, key: &str, values: Vec<f64>) {
    metrics.insert(key.to_string(), MetricValue::Series(values));
}

fn last(values: &[f64]) -> f64 {
    values.last().copied().unwrap_or(0.0)
}

fn mean(values: &[f64]) -> f64 {
    Summary::of(values).map(|s| s.mean).unwrap_or(0.0)
}

pub fn polarization_metrics(run: &SimulationRun, params: &PolarizationParams) -> DerivedMetrics {
    let mut m = DerivedMetrics::new();
    let voltages = run.signal.ys();
    let efficiency = voltages
        .iter()
        .map(|&v| voltage_efficiency(params.v0, v, params.epsilon))
        .collect();
    let power = run.signal.points.iter().map(|&(j, v)| j * v).collect();
    if let Some(s) = Summary::of(&voltages) {
        scalar(&mut m, "min_voltage_v", s.min);
        scalar(&mut m, "max_voltage_v", s.max);
    }
    series(&mut m, "voltage_efficiency_percent", efficiency);
    series(&mut m, "power_density_mw_cm2", power);
    m
}

pub fn degradation_metrics(run: &SimulationRun) -> PipelineResult<DerivedMetrics> {
    let mut m = DerivedMetrics::new();
    let voltage = run.channel("voltage_v")?;
    scalar(&mut m, "final_degradation_percent", last(&run.signal.ys()));
    scalar(&mut m, "final_voltage_v", last(voltage));
    scalar(
        &mut m,
        "voltage_increase_v",
        last(voltage) - voltage.first().copied().unwrap_or(0.0),
    );
    Ok(m)
}

pub fn arrhenius_metrics(run: &SimulationRun, params: &ArrheniusParams) -> DerivedMetrics {
    let mut m = DerivedMetrics::new();
    let k = params.rate_constant();
    scalar(&mut m, "rate_constant_per_hour", k);
    scalar(&mut m, "final_degradation_percent", last(&run.signal.ys()));
    if k > 0.0 {
        scalar(&mut m, "half_life_hours", std::f64::consts::LN_2 / k);
    }
    m
}

pub fn thermal_metrics(run: &SimulationRun) -> PipelineResult<DerivedMetrics> {
    let mut m = DerivedMetrics::new();
    let heat = run.channel("heat_generation")?;
    let temps = run.signal.ys();
    scalar(&mut m, "max_stack_temperature_c", Summary::of(&temps).map(|s| s.max).unwrap_or(0.0));
    scalar(&mut m, "max_heat_generation", Summary::of(heat).map(|s| s.max).unwrap_or(0.0));
    Ok(m)
}

/// Edge processing of a pilot trace.
///
/// `current_compressed` is the only entry not aligned with the trace.
pub fn edge_metrics(run: &SimulationRun, params: &EdgeParams) -> PipelineResult<DerivedMetrics> {
    params.validate()?;
    let temperature = run.channel(TEMPERATURE)?;
    let pressure = run.channel(PRESSURE)?;
    let current = run.channel(CURRENT)?;
    let voltage = run.channel(VOLTAGE)?;
    let hydrogen = run.channel(HYDROGEN)?;
    let resistance = run.channel(MEMBRANE_RESISTANCE)?;
    if current.is_empty() {
        return Err(PipelineError::validation("edge input trace is empty"));
    }

    let filtered = moving_average(temperature, params.moving_average_window)?;
    let anomalies = match params.streaming_window {
        Some(window) => StreamingAnomalyDetector::new(window, params.anomaly_sigma)?.scan(pressure),
        None => detect_anomalies(pressure, params.anomaly_sigma),
    };
    let compressed = decimate(current, params.compression_factor)?;
    let efficiency: Vec<f64> = voltage
        .iter()
        .zip(current)
        .zip(hydrogen)
        .map(|((&v, &i), &h)| electrolysis_efficiency(v, i, h, params.epsilon))
        .collect();
    let alerts = alert::classify_series(temperature, pressure, resistance, &params.thresholds)?;

    let reduction = compressed.len() as f64 / current.len() as f64;
    let anomaly_count = anomalies.iter().filter(|&&a| a == 1).count();
    let alert_count = alerts.iter().filter(|a| a.is_alert()).count();
    debug!(
        "edge: {} samples, {} anomalies, {} alerts",
        current.len(),
        anomaly_count,
        alert_count
    );

    let mut m = DerivedMetrics::new();
    scalar(&mut m, "data_reduction_ratio", reduction);
    scalar(&mut m, "anomalies_detected", anomaly_count as f64);
    scalar(&mut m, "alerts_generated", alert_count as f64);
    scalar(&mut m, "avg_efficiency", mean(&efficiency));
    series(&mut m, "temperature_filtered", filtered);
    series(&mut m, "current_compressed", compressed);
    series(&mut m, "efficiency_calculated", efficiency);
    m.insert("pressure_anomalies".to_string(), MetricValue::Codes(anomalies));
    m.insert(
        "predictive_alerts".to_string(),
        MetricValue::Codes(alerts.iter().map(|a| a.code()).collect()),
    );
    Ok(m)
}

pub fn production_metrics(run: &SimulationRun) -> PipelineResult<DerivedMetrics> {
    let mut m = DerivedMetrics::new();
    scalar(&mut m, "total_units", run.channel("units_produced")?.iter().sum());
    scalar(&mut m, "avg_defect_rate", mean(run.channel("defect_rate")?));
    scalar(&mut m, "avg_hydrogen_output", mean(&run.signal.ys()));
    scalar(&mut m, "avg_quality_score", mean(run.channel("quality_score")?));
    scalar(&mut m, "total_energy_mwh", run.channel("energy_consumption_mwh")?.iter().sum());
    scalar(&mut m, "total_downtime_minutes", run.channel("downtime_minutes")?.iter().sum());
    Ok(m)
}

pub fn scaling_metrics(run: &SimulationRun) -> PipelineResult<DerivedMetrics> {
    let mut m = DerivedMetrics::new();
    scalar(&mut m, "final_capacity_mw_year", last(&run.signal.ys()));
    scalar(&mut m, "total_capital_cost_m", run.channel("capital_cost_m")?.iter().sum());
    scalar(&mut m, "total_operational_cost_m", run.channel("operational_cost_m")?.iter().sum());
    scalar(&mut m, "avg_efficiency_improvement", mean(run.channel("efficiency_improvement")?));
    scalar(&mut m, "final_digital_twin_accuracy", last(run.channel("digital_twin_accuracy")?));
    Ok(m)
}

pub fn convergence_metrics(run: &SimulationRun, params: &OptimizerParams) -> DerivedMetrics {
    let mut m = DerivedMetrics::new();
    let costs = run.signal.ys();
    let initial = costs.first().copied().unwrap_or(0.0);
    let fin = last(&costs);
    scalar(&mut m, "initial_cost", initial);
    scalar(&mut m, "final_cost", fin);
    scalar(&mut m, "best_cost", Summary::of(&costs).map(|s| s.min).unwrap_or(0.0));
    let improvement = (initial - fin) / params.epsilon.apply(initial.abs()) * 100.0;
    scalar(&mut m, "improvement_percent", improvement);
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{pilot_trace, HardwareParams};
    use crate::{RunStamp, Signal};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn stamp() -> RunStamp {
        RunStamp::at(Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_summary() {
        let s = Summary::of(&[3.0, 1.0, 2.0]).unwrap();
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 3.0);
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.count, 3);
        assert!(Summary::of(&[]).is_none());
    }

    #[test]
    fn test_moving_average_truncates_edges() {
        let out = moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3).unwrap();
        assert_eq!(out.len(), 5);
        // window 3 covers [i-1, i+1]
        assert_eq!(out[0], 1.5);
        assert_eq!(out[2], 3.0);
        assert_eq!(out[4], 4.5);
        assert!(moving_average(&[1.0], 0).is_err());
    }

    #[test]
    fn test_moving_average_window_larger_than_input() {
        let out = moving_average(&[2.0, 4.0], 50).unwrap();
        assert_eq!(out, vec![3.0, 3.0]);
    }

    #[test]
    fn test_detect_anomalies() {
        let mut data = vec![1.0; 100];
        data[50] = 10.0;
        let flags = detect_anomalies(&data, 2.0);
        assert_eq!(flags.iter().filter(|&&f| f == 1).count(), 1);
        assert_eq!(flags[50], 1);
        assert!(detect_anomalies(&[], 2.0).is_empty());
        assert!(detect_anomalies(&[4.0; 10], 2.0).iter().all(|&f| f == 0));
    }

    #[test]
    fn test_streaming_agrees_with_batch_on_single_spike() {
        let mut data = vec![1.0; 200];
        data[120] = 10.0;
        let batch = detect_anomalies(&data, 2.0);
        let streaming = StreamingAnomalyDetector::new(64, 2.0).unwrap().scan(&data);
        assert_eq!(batch, streaming);
    }

    #[test]
    fn test_streaming_agrees_with_batch_on_fractional_constants() {
        for value in [29.9, 0.1, 30.1, -7.3, 1e-9] {
            let data = vec![value; 200];
            let streaming = StreamingAnomalyDetector::new(10, 2.0).unwrap().scan(&data);
            assert_eq!(streaming, detect_anomalies(&data, 2.0), "value {value}");
            assert!(streaming.iter().all(|&f| f == 0), "value {value}");
        }
    }

    #[test]
    fn test_streaming_agrees_with_batch_on_fractional_spike() {
        let mut data = vec![29.9; 200];
        data[120] = 40.1;
        let batch = detect_anomalies(&data, 2.0);
        for window in [10, 64] {
            let streaming = StreamingAnomalyDetector::new(window, 2.0).unwrap().scan(&data);
            assert_eq!(batch, streaming, "window {window}");
        }
        assert_eq!(batch.iter().filter(|&&f| f == 1).count(), 1);
    }

    #[test]
    fn test_streaming_memory_is_bounded() {
        let mut detector = StreamingAnomalyDetector::new(8, 2.0).unwrap();
        for i in 0..1000 {
            detector.push(i as f64);
        }
        assert_eq!(detector.len(), 8);
        assert!(StreamingAnomalyDetector::new(0, 2.0).is_err());
    }

    #[test]
    fn test_convergence_improvement_uses_epsilon_floor() {
        let signal =
            Signal::from_columns("iteration", "cost", &[0.0, 1.0], &[1e-300, 0.0]).unwrap();
        let run = SimulationRun::new(&stamp(), "convergence", BTreeMap::new(), signal);
        let params = OptimizerParams::default();
        let m = convergence_metrics(&run, &params);
        let improvement = m["improvement_percent"].as_scalar().unwrap();
        assert!(improvement.is_finite());
        assert!(improvement.abs() < 1e-200);

        let signal = Signal::from_columns("iteration", "cost", &[0.0, 1.0], &[10.0, 2.5]).unwrap();
        let run = SimulationRun::new(&stamp(), "convergence", BTreeMap::new(), signal);
        let m = convergence_metrics(&run, &params);
        assert_eq!(m["improvement_percent"], MetricValue::Scalar(75.0));
    }

    #[test]
    fn test_decimate() {
        let data: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let out = decimate(&data, 10).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(out[1], 10.0);
        assert!(decimate(&data, 0).is_err());
    }

    #[test]
    fn test_efficiency_floor() {
        let eps = EpsilonFloor::DEFAULT;
        assert!(electrolysis_efficiency(0.0, 0.0, 1.0, eps).is_finite());
        assert!((electrolysis_efficiency(2.0, 5.0, 1.0, eps) - 10.0).abs() < 1e-12);
        assert!((voltage_efficiency(1.23, 1.23, eps) - 100.0).abs() < 1e-12);
        assert!(voltage_efficiency(1.23, 0.0, eps).is_finite());
    }

    #[test]
    fn test_edge_metrics_on_pilot_trace() {
        let run = pilot_trace(&HardwareParams::default(), &stamp()).unwrap();
        let m = edge_metrics(&run, &EdgeParams::default()).unwrap();
        assert_eq!(m["data_reduction_ratio"], MetricValue::Scalar(0.1));
        assert_eq!(m["current_compressed"].as_series().unwrap().len(), 10);
        assert_eq!(m["temperature_filtered"].as_series().unwrap().len(), 100);
        let alerts = m["predictive_alerts"].as_codes().unwrap();
        assert_eq!(alerts.len(), 100);
        // Pilot trace stays inside the default thresholds
        assert!(alerts.iter().all(|&a| a == 0));
        assert_eq!(m["alerts_generated"], MetricValue::Scalar(0.0));
    }

    #[test]
    fn test_edge_metrics_streaming_mode() {
        let run = pilot_trace(&HardwareParams::default(), &stamp()).unwrap();
        let params = EdgeParams {
            streaming_window: Some(20),
            ..EdgeParams::default()
        };
        let m = edge_metrics(&run, &params).unwrap();
        assert_eq!(m["pressure_anomalies"].as_codes().unwrap().len(), 100);
        assert_eq!(params.algorithms()[1], "streaming_anomaly_detection");
    }

    #[test]
    fn test_metric_value_json_shapes() {
        let mut m = DerivedMetrics::new();
        m.insert("s".into(), MetricValue::Scalar(1.5));
        m.insert("c".into(), MetricValue::Codes(vec![0, 3]));
        m.insert("v".into(), MetricValue::Series(vec![1.0, 2.5]));
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"c":[0,3],"s":1.5,"v":[1.0,2.5]}"#);
        let back: DerivedMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_empty_series_reads_back_as_empty_sequence() {
        let json = serde_json::to_string(&MetricValue::Series(Vec::new())).unwrap();
        assert_eq!(json, "[]");
        let back: MetricValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MetricValue::Codes(Vec::new()));
        assert_eq!(back.as_series(), Some(&[][..]));
        assert_eq!(MetricValue::Series(Vec::new()).as_codes(), Some(&[][..]));
        assert_eq!(MetricValue::Scalar(1.0).as_series(), None);
    }

    proptest! {
        /// Constant input stays constant for every window size.
        #[test]
        fn prop_moving_average_constant(len in 1usize..200, window in 1usize..64) {
            let data = vec![5.0; len];
            let out = moving_average(&data, window).unwrap();
            prop_assert!(out.iter().all(|&x| x == 5.0));
        }
    }
}
