//! Demo: run every validation phase into a scratch directory
//!
//! Usage:
//!   cargo run --example demo
//!
//! Then try:
//!   aemtrace verify   --out ./demo_outputs
//!   aemtrace validate --out ./demo_outputs --phase 2

use aemtrace::phases::PhaseId;
use aemtrace::render::default_renderer;
use aemtrace::{Config, RunStamp};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let config = Config {
        output_dir: PathBuf::from("./demo_outputs"),
        ..Config::default()
    };
    config.validate()?;
    let renderer = default_renderer();

    println!("Output directory: {}", config.output_dir.display());
    println!("Renderer: {} (available: {})\n", renderer.name(), renderer.is_available());

    for phase in PhaseId::ALL {
        let stamp = RunStamp::unique(chrono::Utc::now());
        let (report, artifact) = phase
            .aggregator(&config, config.seed)
            .run(&phase.root(&config.output_dir), renderer.as_ref(), &stamp, &mut |_, _| {})?;

        println!(
            "{:<28} {:?}  {} files ({} json, {} csv, {} png, {} qasm)",
            phase.id(),
            report.validation_status.overall,
            report.outputs.total_files,
            report.outputs.file_types.get("json").copied().unwrap_or(0),
            report.outputs.file_types.get("csv").copied().unwrap_or(0),
            report.outputs.file_types.get("png").copied().unwrap_or(0),
            report.outputs.file_types.get("qasm").copied().unwrap_or(0),
        );
        println!("{:<28} report: {}", "", artifact.path.display());
    }
    Ok(())
}
