//! Validation phases and their components
//!
//! Each `emit_*` function runs one generator and persists its artifacts
//! through a [`PhaseContext`]. Components group them per phase; the CLI
//! calls them one at a time.

use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::aggregator::{Aggregator, Component, ComponentOutcome, PhaseContext};
use crate::alert::AlertCode;
use crate::artifact::{
    Artifact, ArtifactKind, CsvTable, SimulationRecord, CIRCUITS, EDGE_LOGS, GRAPHS, TABLES,
    VALIDATION_DATA,
};
use crate::hardware::{
    pilot_trace, sample_timestamps, HardwareParams, HardwareSummary, PILOT_CHANNELS,
};
use crate::metrics::{self, EdgeParams};
use crate::optimizer::{convergence_run, OptimizerParams, ParameterCircuit, CIRCUIT_TYPE};
use crate::physics::{
    arrhenius_degradation, degradation_curve, polarization_curve, thermal_profile, ArrheniusParams,
    DegradationParams, PolarizationParams, ThermalParams,
};
use crate::render::{Chart, ChartSeries, Panel};
use crate::stochastic::{production_run, scaling_run, ProductionParams, ScalingParams};
use crate::{iso8601, Config, DerivedMetrics, PipelineError, PipelineResult, SimulationRun};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PhaseId {
    DigitalPrototyping,
    EdgeProcessing,
    Production,
    Scaling,
}

impl PhaseId {
    pub const ALL: [PhaseId; 4] = [
        PhaseId::DigitalPrototyping,
        PhaseId::EdgeProcessing,
        PhaseId::Production,
        PhaseId::Scaling,
    ];

    pub fn number(self) -> u8 {
        match self {
            PhaseId::DigitalPrototyping => 1,
            PhaseId::EdgeProcessing => 2,
            PhaseId::Production => 3,
            PhaseId::Scaling => 4,
        }
    }

    pub fn from_number(n: u8) -> PipelineResult<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.number() == n)
            .ok_or_else(|| PipelineError::validation(format!("unknown phase {n}, expected 1-4")))
    }

    pub fn id(self) -> &'static str {
        match self {
            PhaseId::DigitalPrototyping => "phase1_digital_prototyping",
            PhaseId::EdgeProcessing => "phase2_edge_processing",
            PhaseId::Production => "phase3_production",
            PhaseId::Scaling => "phase4_scaling",
        }
    }

    /// Output root of this phase below the configured output directory.
    pub fn root(self, output_dir: &Path) -> PathBuf {
        output_dir.join(self.id())
    }

    /// Components of this phase, parameterized from `config`.
    pub fn aggregator(self, config: &Config, seed: u64) -> Aggregator {
        let agg = Aggregator::new(self.id());
        match self {
            PhaseId::DigitalPrototyping => agg
                .with(Multiphysics {
                    polarization: config.polarization.clone(),
                    degradation: config.degradation.clone(),
                    arrhenius: config.arrhenius.clone(),
                    thermal: config.thermal.clone(),
                })
                .with(QuantumAlgorithms {
                    params: config.optimizer.clone(),
                    seed,
                }),
            PhaseId::EdgeProcessing => agg
                .with(HardwareSimulator {
                    params: config.hardware.clone(),
                })
                .with(EdgeProcessor {
                    hardware: config.hardware.clone(),
                    edge: config.edge.clone(),
                }),
            PhaseId::Production => agg.with(ProductionSimulator {
                params: config.production.clone(),
                seed,
            }),
            PhaseId::Scaling => agg.with(ScalingSimulator {
                params: config.scaling.clone(),
                seed,
            }),
        }
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

fn persist_record(
    ctx: &PhaseContext<'_>,
    stem: &str,
    run: &SimulationRun,
    derived: DerivedMetrics,
) -> PipelineResult<Artifact> {
    ctx.persist_json(VALIDATION_DATA, stem, &SimulationRecord::from_run(run, derived))
}

fn signal_panel(run: &SimulationRun, title: &str) -> Panel {
    Panel::new(title, &run.signal.x_label, &run.signal.y_label)
        .with_series(ChartSeries::new(&run.model, &run.signal.xs(), &run.signal.ys()))
}

fn channel_panel(run: &SimulationRun, name: &str) -> PipelineResult<Panel> {
    let xs = run.signal.xs();
    Ok(Panel::new(name, &run.signal.x_label, name)
        .with_series(ChartSeries::new(name, &xs, run.channel(name)?)))
}

pub fn emit_polarization(
    ctx: &PhaseContext<'_>,
    params: &PolarizationParams,
) -> PipelineResult<ComponentOutcome> {
    let run = polarization_curve(params, &ctx.stamp)?;
    let derived = metrics::polarization_metrics(&run, params);
    let mut out = ComponentOutcome::default();
    if let Some(v) = derived.get("max_voltage_v").and_then(|m| m.as_scalar()) {
        out.detail("max_voltage_v", v)?;
    }
    out.push(persist_record(ctx, "polarization_curve", &run, derived)?);
    out.push(ctx.persist_csv(TABLES, "polarization_curve", &CsvTable::from_run(&run)?)?);
    let chart = Chart::single("AEM polarization curve", signal_panel(&run, "Cell voltage"));
    out.push_image("polarization_curve", ctx.persist_chart(GRAPHS, "polarization_curve", &chart)?);
    Ok(out)
}

pub fn emit_degradation(
    ctx: &PhaseContext<'_>,
    degradation: &DegradationParams,
    arrhenius: &ArrheniusParams,
) -> PipelineResult<ComponentOutcome> {
    degradation.validate()?;
    arrhenius.validate()?;
    let mut out = ComponentOutcome::default();

    let run = degradation_curve(degradation, &ctx.stamp)?;
    let derived = metrics::degradation_metrics(&run)?;
    if let Some(d) = derived.get("final_degradation_percent").and_then(|m| m.as_scalar()) {
        out.detail("final_degradation_percent", d)?;
    }
    out.push(persist_record(ctx, "membrane_degradation", &run, derived)?);
    let chart = Chart {
        title: "AEM membrane degradation".to_string(),
        panels: vec![
            signal_panel(&run, "Degradation"),
            channel_panel(&run, "voltage_v")?,
        ],
    };
    let image = ctx.persist_chart(GRAPHS, "membrane_degradation", &chart)?;
    out.push_image("membrane_degradation", image);

    let run = arrhenius_degradation(arrhenius, &ctx.stamp)?;
    let derived = metrics::arrhenius_metrics(&run, arrhenius);
    out.push(persist_record(ctx, "membrane_degradation_arrhenius", &run, derived)?);
    Ok(out)
}

pub fn emit_thermal(
    ctx: &PhaseContext<'_>,
    polarization: &PolarizationParams,
    thermal: &ThermalParams,
) -> PipelineResult<ComponentOutcome> {
    let run = thermal_profile(polarization, thermal, &ctx.stamp)?;
    let derived = metrics::thermal_metrics(&run)?;
    let mut out = ComponentOutcome::default();
    if let Some(t) = derived.get("max_stack_temperature_c").and_then(|m| m.as_scalar()) {
        out.detail("max_stack_temperature_c", t)?;
    }
    out.push(persist_record(ctx, "thermal_profile", &run, derived)?);
    Ok(out)
}

pub fn emit_circuit(ctx: &PhaseContext<'_>, qubits: usize) -> PipelineResult<ComponentOutcome> {
    let circuit = ParameterCircuit::build(qubits)?;
    let mut out = ComponentOutcome::default();
    let metadata = json!({
        "timestamp": iso8601(ctx.stamp.created_at),
        "circuit_type": CIRCUIT_TYPE,
        "num_qubits": circuit.num_qubits,
        "depth": circuit.depth(),
        "gate_count": circuit.gate_count(),
        "gate_ops": circuit.count_ops(),
        "parameters": circuit.qubit_mapping(),
        "executed": false,
    });
    out.detail("circuit_depth", circuit.depth())?;
    out.push(ctx.persist_json(CIRCUITS, "circuit_metadata", &metadata)?);
    let qasm = circuit.to_qasm();
    out.push(ctx.persist_text(CIRCUITS, "quantum_circuit", ArtifactKind::Qasm, &qasm)?);
    out.push_image("quantum_circuit", ctx.persist_circuit(CIRCUITS, "quantum_circuit", &circuit)?);
    Ok(out)
}

pub fn emit_convergence(
    ctx: &PhaseContext<'_>,
    params: &OptimizerParams,
    seed: u64,
) -> PipelineResult<ComponentOutcome> {
    let run = convergence_run(params, seed, &ctx.stamp)?;
    let derived = metrics::convergence_metrics(&run, params);
    let mut out = ComponentOutcome::default();
    out.detail("seed", seed)?;
    if let Some(c) = derived.get("final_cost").and_then(|m| m.as_scalar()) {
        out.detail("final_cost", c)?;
    }
    out.push(persist_record(ctx, "optimization_results", &run, derived)?);

    let mut panels = vec![signal_panel(&run, "Cost function")];
    for name in ["temperature", "pressure", "flow_rate"] {
        panels.push(channel_panel(&run, name)?);
    }
    let chart = Chart {
        title: "Simulated optimizer convergence (mock)".to_string(),
        panels,
    };
    out.push_image(
        "optimization_convergence",
        ctx.persist_chart(GRAPHS, "optimization_convergence", &chart)?,
    );
    Ok(out)
}

pub fn emit_hardware(
    ctx: &PhaseContext<'_>,
    params: &HardwareParams,
) -> PipelineResult<ComponentOutcome> {
    let run = pilot_trace(params, &ctx.stamp)?;
    let timestamps = sample_timestamps(&run);

    let mut header = vec!["timestamp", "time_hours"];
    header.extend(PILOT_CHANNELS.iter().map(|c| c.name));
    let mut table = CsvTable::new(&header);
    for (i, (ts, &(hours, _))) in timestamps.iter().zip(&run.signal.points).enumerate() {
        let mut row = vec![iso8601(*ts), hours.to_string()];
        for channel in PILOT_CHANNELS.iter() {
            row.push(run.channel(channel.name)?[i].to_string());
        }
        table.push(row)?;
    }

    let summary = HardwareSummary::of(&run)?;
    let mut out = ComponentOutcome::default();
    out.detail("data_points", run.signal.len())?;
    out.detail("summary", &summary)?;
    out.push(ctx.persist_csv(TABLES, "hardware_test", &table)?);
    out.push(ctx.persist_json(
        VALIDATION_DATA,
        "hardware_summary",
        &json!({
            "timestamp": iso8601(ctx.stamp.created_at),
            "model": run.model,
            "duration_hours": params.duration_hours,
            "data_points": run.signal.len(),
            "summary": summary,
        }),
    )?);
    Ok(out)
}

pub fn emit_edge(
    ctx: &PhaseContext<'_>,
    hardware: &HardwareParams,
    edge: &EdgeParams,
) -> PipelineResult<ComponentOutcome> {
    edge.validate()?;
    let run = pilot_trace(hardware, &ctx.stamp)?;
    let derived = metrics::edge_metrics(&run, edge)?;
    let scalar = |key: &str| derived.get(key).and_then(|m| m.as_scalar()).unwrap_or(0.0);

    let report = json!({
        "processing_timestamp": iso8601(ctx.stamp.created_at),
        "input_model": run.model,
        "algorithms_applied": edge.algorithms(),
        "parameters": edge,
        "performance_metrics": {
            "data_reduction_ratio": scalar("data_reduction_ratio"),
            "anomalies_detected": scalar("anomalies_detected"),
            "alerts_generated": scalar("alerts_generated"),
            "avg_efficiency": scalar("avg_efficiency"),
        },
        "derived": &derived,
    });

    let codes = derived
        .get("predictive_alerts")
        .and_then(|m| m.as_codes())
        .unwrap_or(&[]);
    let mut alerts = CsvTable::new(&["timestamp", "alert_type", "alert_description"]);
    for (ts, &code) in sample_timestamps(&run).iter().zip(codes) {
        let alert = AlertCode::from_code(code)
            .ok_or_else(|| PipelineError::validation(format!("unknown alert code {code}")))?;
        if alert.is_alert() {
            alerts.push(vec![iso8601(*ts), code.to_string(), alert.description().to_string()])?;
        }
    }

    let mut out = ComponentOutcome::default();
    out.detail("alerts_generated", alerts.rows.len())?;
    out.detail("data_reduction_ratio", scalar("data_reduction_ratio"))?;
    out.push(ctx.persist_json(EDGE_LOGS, "edge_processing", &report)?);
    out.push(ctx.persist_csv(EDGE_LOGS, "alerts", &alerts)?);
    Ok(out)
}

pub fn emit_production(
    ctx: &PhaseContext<'_>,
    params: &ProductionParams,
    seed: u64,
) -> PipelineResult<ComponentOutcome> {
    let run = production_run(params, seed, &ctx.stamp)?;
    let derived = metrics::production_metrics(&run)?;
    let mut out = ComponentOutcome::default();
    out.detail("seed", seed)?;
    for key in ["total_units", "avg_defect_rate", "avg_hydrogen_output"] {
        if let Some(v) = derived.get(key).and_then(|m| m.as_scalar()) {
            out.detail(key, v)?;
        }
    }
    out.push(persist_record(ctx, "production_run", &run, derived)?);
    out.push(ctx.persist_csv(TABLES, "production_run", &CsvTable::from_run(&run)?)?);
    Ok(out)
}

pub fn emit_scaling(
    ctx: &PhaseContext<'_>,
    params: &ScalingParams,
    seed: u64,
) -> PipelineResult<ComponentOutcome> {
    let run = scaling_run(params, seed, &ctx.stamp)?;
    let derived = metrics::scaling_metrics(&run)?;
    let mut out = ComponentOutcome::default();
    out.detail("seed", seed)?;
    for key in ["final_capacity_mw_year", "total_capital_cost_m"] {
        if let Some(v) = derived.get(key).and_then(|m| m.as_scalar()) {
            out.detail(key, v)?;
        }
    }
    out.push(persist_record(ctx, "scaling_plan", &run, derived)?);
    out.push(ctx.persist_csv(TABLES, "scaling_plan", &CsvTable::from_run(&run)?)?);
    Ok(out)
}

/// Polarization, degradation and thermal models.
pub struct Multiphysics {
    pub polarization: PolarizationParams,
    pub degradation: DegradationParams,
    pub arrhenius: ArrheniusParams,
    pub thermal: ThermalParams,
}

impl Component for Multiphysics {
    fn name(&self) -> &str {
        "multiphysics_model"
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> PipelineResult<ComponentOutcome> {
        self.polarization.validate()?;
        self.degradation.validate()?;
        self.arrhenius.validate()?;
        self.thermal.validate()?;
        let mut out = emit_polarization(ctx, &self.polarization)?;
        out.merge(emit_degradation(ctx, &self.degradation, &self.arrhenius)?);
        out.merge(emit_thermal(ctx, &self.polarization, &self.thermal)?);
        Ok(out)
    }
}

/// Circuit description plus the mock convergence study.
pub struct QuantumAlgorithms {
    pub params: OptimizerParams,
    pub seed: u64,
}

impl Component for QuantumAlgorithms {
    fn name(&self) -> &str {
        "quantum_algorithms"
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> PipelineResult<ComponentOutcome> {
        self.params.validate()?;
        let mut out = emit_circuit(ctx, self.params.qubits)?;
        out.merge(emit_convergence(ctx, &self.params, self.seed)?);
        Ok(out)
    }
}

pub struct HardwareSimulator {
    pub params: HardwareParams,
}

impl Component for HardwareSimulator {
    fn name(&self) -> &str {
        "hardware_simulator"
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> PipelineResult<ComponentOutcome> {
        emit_hardware(ctx, &self.params)
    }
}

/// Regenerates the pilot trace and processes it.
pub struct EdgeProcessor {
    pub hardware: HardwareParams,
    pub edge: EdgeParams,
}

impl Component for EdgeProcessor {
    fn name(&self) -> &str {
        "edge_processor"
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> PipelineResult<ComponentOutcome> {
        emit_edge(ctx, &self.hardware, &self.edge)
    }
}

pub struct ProductionSimulator {
    pub params: ProductionParams,
    pub seed: u64,
}

impl Component for ProductionSimulator {
    fn name(&self) -> &str {
        "production_simulator"
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> PipelineResult<ComponentOutcome> {
        emit_production(ctx, &self.params, self.seed)
    }
}

pub struct ScalingSimulator {
    pub params: ScalingParams,
    pub seed: u64,
}

impl Component for ScalingSimulator {
    fn name(&self) -> &str {
        "scaling_simulator"
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> PipelineResult<ComponentOutcome> {
        emit_scaling(ctx, &self.params, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ledger_path;
    use crate::ledger::Ledger;
    use crate::render::NullRenderer;
    use crate::RunStamp;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn stamp() -> RunStamp {
        RunStamp::at(Utc.with_ymd_and_hms(2026, 10, 18, 14, 0, 0).unwrap())
    }

    #[test]
    fn test_phase_ids() {
        assert_eq!(PhaseId::from_number(2).unwrap().id(), "phase2_edge_processing");
        assert!(PhaseId::from_number(5).is_err());
        let names = PhaseId::DigitalPrototyping
            .aggregator(&Config::default(), 42)
            .component_names();
        assert_eq!(names, vec!["multiphysics_model", "quantum_algorithms"]);
    }

    #[test]
    fn test_edge_alert_csv_has_header_only_for_nominal_trace() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(&ledger_path(temp.path())).unwrap();
        let ctx = PhaseContext::new(temp.path(), &ledger, &NullRenderer, stamp());
        let out = emit_edge(&ctx, &HardwareParams::default(), &EdgeParams::default()).unwrap();
        assert_eq!(out.artifacts.len(), 2);
        let csv = std::fs::read_to_string(&out.artifacts[1].path).unwrap();
        assert_eq!(csv, "timestamp,alert_type,alert_description\n");
    }

    #[test]
    fn test_edge_alerts_written_for_hot_trace() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(&ledger_path(temp.path())).unwrap();
        let ctx = PhaseContext::new(temp.path(), &ledger, &NullRenderer, stamp());
        let edge = EdgeParams {
            thresholds: crate::alert::AlertThresholds {
                max_temperature_c: 62.0,
                ..Default::default()
            },
            ..EdgeParams::default()
        };
        let out = emit_edge(&ctx, &HardwareParams::default(), &edge).unwrap();
        let csv = std::fs::read_to_string(&out.artifacts[1].path).unwrap();
        let rows: Vec<&str> = csv.lines().skip(1).collect();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.ends_with(",1,Over-temperature")));
    }

    #[test]
    fn test_hardware_csv_columns() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(&ledger_path(temp.path())).unwrap();
        let ctx = PhaseContext::new(temp.path(), &ledger, &NullRenderer, stamp());
        let out = emit_hardware(&ctx, &HardwareParams::default()).unwrap();
        let csv = std::fs::read_to_string(&out.artifacts[0].path).unwrap();
        let header = csv.lines().next().unwrap();
        assert!(header.starts_with("timestamp,time_hours,temperature_c,pressure_bar"));
        assert_eq!(csv.lines().count(), 101);
        assert_eq!(out.details["data_points"], json!(100));
    }

    #[test]
    fn test_circuit_outputs_without_renderer() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(&ledger_path(temp.path())).unwrap();
        let ctx = PhaseContext::new(temp.path(), &ledger, &NullRenderer, stamp());
        let out = emit_circuit(&ctx, 4).unwrap();
        assert_eq!(out.artifacts.len(), 2);
        assert_eq!(out.skipped, vec!["quantum_circuit"]);
        let qasm = std::fs::read_to_string(&out.artifacts[1].path).unwrap();
        assert_eq!(qasm.matches("measure ").count(), 4);
    }

    #[test]
    fn test_multiphysics_rejects_bad_thermal_before_writing() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(&ledger_path(temp.path())).unwrap();
        let ctx = PhaseContext::new(temp.path(), &ledger, &NullRenderer, stamp());
        let component = Multiphysics {
            polarization: PolarizationParams::default(),
            degradation: DegradationParams::default(),
            arrhenius: ArrheniusParams::default(),
            thermal: ThermalParams {
                thermal_resistance: -1.0,
                ..ThermalParams::default()
            },
        };

        let err = component.run(&ctx).unwrap_err();
        assert_eq!(err.kind(), "validation");
        let files: Vec<_> = walkdir::WalkDir::new(temp.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        assert_eq!(files, vec![ledger_path(temp.path())]);
        assert!(crate::ledger::read_entries(ledger.path()).unwrap().is_empty());
    }

    #[test]
    fn test_degradation_checks_arrhenius_before_writing() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(&ledger_path(temp.path())).unwrap();
        let ctx = PhaseContext::new(temp.path(), &ledger, &NullRenderer, stamp());
        let arrhenius = ArrheniusParams {
            samples: 0,
            ..ArrheniusParams::default()
        };
        assert!(emit_degradation(&ctx, &DegradationParams::default(), &arrhenius).is_err());
        assert!(!temp.path().join(GRAPHS).exists());
        assert!(crate::ledger::read_entries(ledger.path()).unwrap().is_empty());
    }
}
