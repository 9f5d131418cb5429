//! Mock optimizer convergence and the parameter-circuit description.
//!
//! Nothing here executes a quantum circuit. The convergence curve is an
//! exponentially decaying cost with seeded Gaussian noise, and the circuit is
//! a static gate list exported as OpenQASM 2.0 text for documentation.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{require_finite, require_non_negative, require_nonzero, require_positive};
use crate::{EpsilonFloor, PipelineError, PipelineResult, RunStamp, Signal, SimulationRun};

pub const CONVERGENCE_MODEL: &str = "Simulated_Convergence_Mock_v1";
pub const CIRCUIT_TYPE: &str = "AEM_Parameter_Optimization";
pub const MAX_QUBITS: usize = 16;

/// Operating parameter encoded by each of the first qubits.
pub const QUBIT_PARAMETERS: [&str; 4] = ["temperature", "pressure", "flow_rate", "current_density"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerParams {
    pub iterations: usize,
    pub base_cost: f64,
    /// Per-iteration decay factor of the noiseless cost
    pub convergence_rate: f64,
    /// Standard deviation of the additive cost noise
    pub noise_std: f64,
    pub qubits: usize,
    pub epsilon: EpsilonFloor,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            iterations: 100,
            base_cost: 10.0,
            convergence_rate: 0.95,
            noise_std: 0.1,
            qubits: 4,
            epsilon: EpsilonFloor::DEFAULT,
        }
    }
}

impl OptimizerParams {
    pub fn validate(&self) -> PipelineResult<()> {
        require_nonzero("iterations", self.iterations)?;
        require_finite("base_cost", self.base_cost)?;
        require_positive("convergence_rate", self.convergence_rate)?;
        require_non_negative("noise_std", self.noise_std)?;
        if !(1..=MAX_QUBITS).contains(&self.qubits) {
            return Err(PipelineError::validation(format!(
                "qubits must be in 1..={MAX_QUBITS}, got {}",
                self.qubits
            )));
        }
        self.epsilon.validate()
    }

    pub fn parameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("num_iterations".to_string(), self.iterations as f64),
            ("base_cost".to_string(), self.base_cost),
            ("convergence_rate".to_string(), self.convergence_rate),
            ("noise_std".to_string(), self.noise_std),
            ("epsilon".to_string(), self.epsilon.0),
        ])
    }
}

/// Simulated convergence: `cost_i = base·rate^i + N(0, σ)` plus the
/// trajectories of the four operating parameters.
pub fn convergence_run(
    params: &OptimizerParams,
    seed: u64,
    stamp: &RunStamp,
) -> PipelineResult<SimulationRun> {
    params.validate()?;
    let noise = Normal::new(0.0, params.noise_std)
        .map_err(|e| PipelineError::validation(format!("noise_std: {e}")))?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let iterations: Vec<f64> = (0..params.iterations).map(|i| i as f64).collect();
    let costs: Vec<f64> = iterations
        .iter()
        .map(|&i| params.base_cost * params.convergence_rate.powf(i) + noise.sample(&mut rng))
        .collect();

    let trajectory = |f: fn(f64) -> f64| iterations.iter().map(|&i| f(i)).collect::<Vec<f64>>();

    let signal = Signal::from_columns("iteration", "cost_function", &iterations, &costs)?;
    SimulationRun::new(stamp, CONVERGENCE_MODEL, params.parameters(), signal)
        .with_seed(seed)
        .with_channel("temperature", trajectory(|i| 60.0 + 10.0 * (i / 10.0).sin()))?
        .with_channel("pressure", trajectory(|i| 30.0 + 5.0 * (i / 15.0).cos()))?
        .with_channel("flow_rate", trajectory(|i| 2.0 + 0.5 * (i / 20.0).sin()))?
        .with_channel("current_density", trajectory(|i| 500.0 + 100.0 * (i / 25.0).cos()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    H(usize),
    /// Rotation by `π / pi_over`
    Ry { qubit: usize, pi_over: u32 },
    Cx { control: usize, target: usize },
    Barrier,
    Measure(usize),
}

impl Gate {
    fn qubits(&self, n: usize) -> Vec<usize> {
        match *self {
            Gate::H(q) | Gate::Ry { qubit: q, .. } | Gate::Measure(q) => vec![q],
            Gate::Cx { control, target } => vec![control, target],
            Gate::Barrier => (0..n).collect(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Gate::H(_) => "H".to_string(),
            Gate::Ry { pi_over, .. } => format!("Ry(π/{pi_over})"),
            Gate::Cx { .. } => "CX".to_string(),
            Gate::Barrier => "|".to_string(),
            Gate::Measure(_) => "M".to_string(),
        }
    }
}

/// Static parameter-optimization circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterCircuit {
    pub num_qubits: usize,
    pub gates: Vec<Gate>,
}

impl ParameterCircuit {
    /// H and RY(π/4) on every qubit, a CX chain, RY(π/2) on every qubit,
    /// then measure all.
    pub fn build(num_qubits: usize) -> PipelineResult<Self> {
        if !(1..=MAX_QUBITS).contains(&num_qubits) {
            return Err(PipelineError::validation(format!(
                "qubits must be in 1..={MAX_QUBITS}, got {num_qubits}"
            )));
        }
        let mut gates = Vec::new();
        gates.extend((0..num_qubits).map(Gate::H));
        gates.extend((0..num_qubits).map(|qubit| Gate::Ry { qubit, pi_over: 4 }));
        gates.extend((1..num_qubits).map(|t| Gate::Cx { control: t - 1, target: t }));
        gates.extend((0..num_qubits).map(|qubit| Gate::Ry { qubit, pi_over: 2 }));
        gates.push(Gate::Barrier);
        gates.extend((0..num_qubits).map(Gate::Measure));
        Ok(Self { num_qubits, gates })
    }

    /// Layer index (1-based) of every gate; barriers get 0 and do not count
    /// towards depth.
    pub fn layers(&self) -> Vec<usize> {
        // Measurements write to a classical bit per qubit; track both wires.
        let mut qubit_level = vec![0usize; self.num_qubits];
        let mut clbit_level = vec![0usize; self.num_qubits];
        self.gates
            .iter()
            .map(|gate| match gate {
                Gate::Barrier => 0,
                Gate::Measure(q) => {
                    let level = qubit_level[*q].max(clbit_level[*q]) + 1;
                    qubit_level[*q] = level;
                    clbit_level[*q] = level;
                    level
                }
                _ => {
                    let qs = gate.qubits(self.num_qubits);
                    let level = qs.iter().map(|&q| qubit_level[q]).max().unwrap_or(0) + 1;
                    for q in qs {
                        qubit_level[q] = level;
                    }
                    level
                }
            })
            .collect()
    }

    pub fn depth(&self) -> usize {
        self.layers().into_iter().max().unwrap_or(0)
    }

    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    pub fn count_ops(&self) -> BTreeMap<&'static str, usize> {
        let mut ops = BTreeMap::new();
        for gate in &self.gates {
            let name = match gate {
                Gate::H(_) => "h",
                Gate::Ry { .. } => "ry",
                Gate::Cx { .. } => "cx",
                Gate::Barrier => "barrier",
                Gate::Measure(_) => "measure",
            };
            *ops.entry(name).or_insert(0) += 1;
        }
        ops
    }

    /// Parameter represented by each qubit.
    pub fn qubit_mapping(&self) -> BTreeMap<usize, String> {
        (0..self.num_qubits)
            .map(|q| {
                let name = QUBIT_PARAMETERS
                    .get(q)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("auxiliary_{q}"));
                (q, name)
            })
            .collect()
    }

    pub fn to_qasm(&self) -> String {
        let n = self.num_qubits;
        let mut out = String::new();
        out.push_str("OPENQASM 2.0;\ninclude \"qelib1.inc\";\n");
        let _ = writeln!(out, "qreg q[{n}];");
        let _ = writeln!(out, "creg meas[{n}];");
        for gate in &self.gates {
            let _ = match *gate {
                Gate::H(q) => writeln!(out, "h q[{q}];"),
                Gate::Ry { qubit, pi_over } => writeln!(out, "ry(pi/{pi_over}) q[{qubit}];"),
                Gate::Cx { control, target } => writeln!(out, "cx q[{control}],q[{target}];"),
                Gate::Barrier => {
                    let all: Vec<String> = (0..n).map(|q| format!("q[{q}]")).collect();
                    writeln!(out, "barrier {};", all.join(","))
                }
                Gate::Measure(q) => writeln!(out, "measure q[{q}] -> meas[{q}];"),
            };
        }
        out
    }
}
