//! aemtrace CLI - simulate, record and validate AEM electrolyzer models
//!
//! Usage:
//!   aemtrace polarization [--samples 50] [--j-max 2000]
//!   aemtrace production --days 30 --seed 42
//!   aemtrace validate --phase all
//!   aemtrace verify [--out ./outputs]

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

use aemtrace::{
    aggregator::{ComponentOutcome, ComponentState, PhaseContext},
    artifact::{ledger_path, LEDGER_FILE},
    ledger::{self, EntryStatus, Ledger},
    phases::{self, PhaseId},
    render::default_renderer,
    Config, PipelineResult, RunStamp,
};

#[derive(Parser)]
#[command(name = "aemtrace")]
#[command(about = "Verifiable simulation artifacts for AEM electrolyzer research")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Output root (overrides the config file)
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tafel polarization curve
    Polarization {
        #[arg(long)]
        samples: Option<usize>,
        /// Upper end of the current density sweep (mA/cm²)
        #[arg(long)]
        j_max: Option<f64>,
    },
    /// Two-phase and Arrhenius membrane degradation
    Degradation {
        /// Operating hours
        #[arg(long)]
        hours: Option<f64>,
        #[arg(long)]
        samples: Option<usize>,
    },
    /// Stack thermal balance over the polarization sweep
    Thermal {
        /// Ambient temperature (°C)
        #[arg(long)]
        ambient: Option<f64>,
    },
    /// Circuit description and mock optimizer convergence
    Optimize {
        #[arg(long)]
        iterations: Option<usize>,
        #[arg(long)]
        qubits: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Synthetic pilot-plant sensor trace
    Hardware {
        #[arg(long)]
        hours: Option<f64>,
        #[arg(long)]
        samples: Option<usize>,
    },
    /// Edge processing of the pilot trace
    Edge {
        #[arg(long)]
        hours: Option<f64>,
        /// Moving-average window
        #[arg(long)]
        window: Option<usize>,
        /// Anomaly bound in standard deviations
        #[arg(long)]
        sigma: Option<f64>,
        /// Keep every n-th current sample
        #[arg(long)]
        compression: Option<usize>,
        /// Use the streaming detector with this window
        #[arg(long)]
        streaming: Option<usize>,
    },
    /// Seeded pilot production run
    Production {
        #[arg(long)]
        days: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Seeded scale-up scenario
    Scaling {
        #[arg(long)]
        months: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run one or all phases and write validation reports
    Validate {
        /// 1, 2, 3, 4 or all
        #[arg(short, long, default_value = "all")]
        phase: String,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Re-hash every file listed in the ledgers below the output root
    Verify,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Config::load(path)?
        }
        None => Config::default(),
    };
    if let Some(out) = &cli.out {
        config.output_dir = out.clone();
    }
    Ok(config)
}

fn seed_or_default(seed: Option<u64>, config: &Config) -> u64 {
    let seed = seed.unwrap_or(config.seed);
    info!("Using seed {}", seed);
    seed
}

/// Run one generator against the output root and print what it wrote.
fn emit(
    config: &Config,
    f: impl FnOnce(&PhaseContext<'_>) -> PipelineResult<ComponentOutcome>,
) -> Result<()> {
    config.validate()?;
    let root = config.output_dir.as_path();
    let ledger = Ledger::open(&ledger_path(root))?;
    let renderer = default_renderer();
    let ctx = PhaseContext::new(root, &ledger, renderer.as_ref(), RunStamp::unique(Utc::now()));
    info!("Run {}", ctx.stamp.run_id);

    let outcome = f(&ctx)?;
    for artifact in &outcome.artifacts {
        println!("{}  {}", &artifact.content_hash[..16], artifact.path.display());
    }
    for skipped in &outcome.skipped {
        warn!("Skipped image {}", skipped);
    }
    if !outcome.details.is_empty() {
        println!("{}", serde_json::to_string_pretty(&outcome.details)?);
    }
    Ok(())
}

fn parse_phases(phase: &str) -> Result<Vec<PhaseId>> {
    if phase.eq_ignore_ascii_case("all") {
        return Ok(PhaseId::ALL.to_vec());
    }
    match phase.parse::<u8>() {
        Ok(n) => Ok(vec![PhaseId::from_number(n)?]),
        Err(_) => bail!("--phase must be 1, 2, 3, 4 or all, got {:?}", phase),
    }
}

fn validate(config: &Config, phase: &str, seed: u64) -> Result<bool> {
    config.validate()?;
    let phases = parse_phases(phase)?;
    let renderer = default_renderer();
    let mut all_passed = true;

    for phase in phases {
        let aggregator = phase.aggregator(config, seed);
        let root = phase.root(&config.output_dir);
        let stamp = RunStamp::unique(Utc::now());

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));

        let mut progress = |name: &str, state: ComponentState| {
            pb.set_message(format!("{} | {}: {:?}", phase, name, state));
        };
        let (report, artifact) = aggregator.run(&root, renderer.as_ref(), &stamp, &mut progress)?;
        pb.finish_and_clear();

        println!("{}", phase);
        for (name, component) in &report.components {
            match component.status {
                ComponentState::Success => println!("  ✓ {}", name),
                _ => println!(
                    "  ✗ {} ({})",
                    name,
                    component.error.as_deref().unwrap_or("unknown error")
                ),
            }
        }
        println!(
            "  {:?}: {}/{} components, {} files, report {}",
            report.validation_status.overall,
            report.validation_status.components_passed,
            report.validation_status.total_components,
            report.outputs.total_files,
            artifact.path.display()
        );
        all_passed &= report.passed();
    }
    Ok(all_passed)
}

fn verify(root: &Path) -> Result<bool> {
    let ledgers: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == LEDGER_FILE)
        .map(|e| e.into_path())
        .collect();
    if ledgers.is_empty() {
        bail!("No ledger found below {:?}", root);
    }

    let mut clean = true;
    for path in ledgers {
        let checks = ledger::verify(&path)?;
        let bad: Vec<_> = checks
            .iter()
            .filter(|c| c.status != EntryStatus::Verified)
            .collect();
        print!("Verifying {}... ", path.display());
        if bad.is_empty() {
            println!("✓ VALID ({} entries)", checks.len());
        } else {
            println!("✗ {} of {} entries failed", bad.len(), checks.len());
            for check in bad {
                let what = match &check.status {
                    EntryStatus::Mismatch { .. } => "MISMATCH",
                    _ => "MISSING",
                };
                println!("  {} {}", what, check.entry.path.display());
            }
            clean = false;
        }
    }
    Ok(clean)
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "aemtrace=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Polarization { samples, j_max } => {
            let p = &mut config.polarization;
            p.samples = samples.unwrap_or(p.samples);
            p.j_max = j_max.unwrap_or(p.j_max);
            emit(&config, |ctx| phases::emit_polarization(ctx, &config.polarization))?;
        }

        Commands::Degradation { hours, samples } => {
            let d = &mut config.degradation;
            d.operating_hours = hours.unwrap_or(d.operating_hours);
            d.samples = samples.unwrap_or(d.samples);
            let a = &mut config.arrhenius;
            a.operating_hours = hours.unwrap_or(a.operating_hours);
            a.samples = samples.unwrap_or(a.samples);
            emit(&config, |ctx| {
                phases::emit_degradation(ctx, &config.degradation, &config.arrhenius)
            })?;
        }

        Commands::Thermal { ambient } => {
            config.thermal.ambient_c = ambient.unwrap_or(config.thermal.ambient_c);
            emit(&config, |ctx| phases::emit_thermal(ctx, &config.polarization, &config.thermal))?;
        }

        Commands::Optimize { iterations, qubits, seed } => {
            let o = &mut config.optimizer;
            o.iterations = iterations.unwrap_or(o.iterations);
            o.qubits = qubits.unwrap_or(o.qubits);
            let seed = seed_or_default(seed, &config);
            emit(&config, |ctx| {
                let mut outcome = phases::emit_circuit(ctx, config.optimizer.qubits)?;
                outcome.merge(phases::emit_convergence(ctx, &config.optimizer, seed)?);
                Ok(outcome)
            })?;
        }

        Commands::Hardware { hours, samples } => {
            let h = &mut config.hardware;
            h.duration_hours = hours.unwrap_or(h.duration_hours);
            h.samples = samples.unwrap_or(h.samples);
            emit(&config, |ctx| phases::emit_hardware(ctx, &config.hardware))?;
        }

        Commands::Edge { hours, window, sigma, compression, streaming } => {
            config.hardware.duration_hours = hours.unwrap_or(config.hardware.duration_hours);
            let e = &mut config.edge;
            e.moving_average_window = window.unwrap_or(e.moving_average_window);
            e.anomaly_sigma = sigma.unwrap_or(e.anomaly_sigma);
            e.compression_factor = compression.unwrap_or(e.compression_factor);
            e.streaming_window = streaming.or(e.streaming_window);
            emit(&config, |ctx| phases::emit_edge(ctx, &config.hardware, &config.edge))?;
        }

        Commands::Production { days, seed } => {
            config.production.days = days.unwrap_or(config.production.days);
            let seed = seed_or_default(seed, &config);
            emit(&config, |ctx| phases::emit_production(ctx, &config.production, seed))?;
        }

        Commands::Scaling { months, seed } => {
            config.scaling.months = months.unwrap_or(config.scaling.months);
            let seed = seed_or_default(seed, &config);
            emit(&config, |ctx| phases::emit_scaling(ctx, &config.scaling, seed))?;
        }

        Commands::Validate { phase, seed } => {
            let seed = seed_or_default(seed, &config);
            if !validate(&config, &phase, seed)? {
                warn!("Validation failed");
                std::process::exit(1);
            }
        }

        Commands::Verify => {
            if !verify(&config.output_dir)? {
                warn!("Ledger verification failed - artifacts may have been modified");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
