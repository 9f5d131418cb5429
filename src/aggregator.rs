//! Validation aggregator
//!
//! Runs the components of one phase in order, isolating failures, then
//! inventories the output tree, cross-checks it against the ledger and
//! writes a single validation report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::artifact::{
    hash_file, ledger_path, Artifact, ArtifactKind, ArtifactWriter, CsvTable, REPORTS,
};
use crate::ledger::{latest_hashes, read_entries, Ledger};
use crate::optimizer::ParameterCircuit;
use crate::render::{Chart, Renderer};
use crate::{iso8601, PipelineError, PipelineResult, RunId, RunStamp};

/// Everything a component needs to persist its outputs.
pub struct PhaseContext<'a> {
    pub writer: ArtifactWriter,
    pub ledger: &'a Ledger,
    pub renderer: &'a dyn Renderer,
    /// Queried once per phase
    pub render_available: bool,
    pub stamp: RunStamp,
}

impl<'a> PhaseContext<'a> {
    pub fn new(
        root: &Path,
        ledger: &'a Ledger,
        renderer: &'a dyn Renderer,
        stamp: RunStamp,
    ) -> Self {
        Self {
            writer: ArtifactWriter::new(root),
            ledger,
            renderer,
            render_available: renderer.is_available(),
            stamp,
        }
    }

    fn commit(&self, artifact: Artifact) -> PipelineResult<Artifact> {
        self.ledger.record(&artifact)?;
        Ok(artifact)
    }

    pub fn persist_json<T: Serialize>(
        &self,
        category: &str,
        stem: &str,
        value: &T,
    ) -> PipelineResult<Artifact> {
        self.commit(self.writer.write_json(category, stem, &self.stamp, value)?)
    }

    pub fn persist_csv(
        &self,
        category: &str,
        stem: &str,
        table: &CsvTable,
    ) -> PipelineResult<Artifact> {
        self.commit(self.writer.write_csv(category, stem, &self.stamp, table)?)
    }

    pub fn persist_text(
        &self,
        category: &str,
        stem: &str,
        kind: ArtifactKind,
        text: &str,
    ) -> PipelineResult<Artifact> {
        self.commit(self.writer.write_text(category, stem, &self.stamp, kind, text)?)
    }

    /// Render a chart when rendering is available. `Ok(None)` means the
    /// image was skipped; earlier artifacts are never touched.
    pub fn persist_chart(
        &self,
        category: &str,
        stem: &str,
        chart: &Chart,
    ) -> PipelineResult<Option<Artifact>> {
        self.persist_image(category, stem, |path| self.renderer.render_chart(chart, path))
    }

    pub fn persist_circuit(
        &self,
        category: &str,
        stem: &str,
        circuit: &ParameterCircuit,
    ) -> PipelineResult<Option<Artifact>> {
        self.persist_image(category, stem, |path| self.renderer.render_circuit(circuit, path))
    }

    fn persist_image(
        &self,
        category: &str,
        stem: &str,
        draw: impl FnOnce(&Path) -> PipelineResult<()>,
    ) -> PipelineResult<Option<Artifact>> {
        if !self.render_available {
            warn!("Rendering unavailable, skipping {}/{}", category, stem);
            return Ok(None);
        }
        let path = self.writer.reserve_path(category, stem, &self.stamp, ArtifactKind::Png)?;
        if let Err(e) = draw(&path) {
            warn!("Failed to render {:?}: {}", path, e);
            // Only the half-written image at the reserved path is removed
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to remove partial image {:?}: {}", path, e);
                }
            }
            return Ok(None);
        }
        let artifact = self.writer.adopt(path, ArtifactKind::Png, &self.stamp)?;
        self.commit(artifact).map(Some)
    }
}

/// What a component produced.
#[derive(Debug, Clone, Default)]
pub struct ComponentOutcome {
    pub artifacts: Vec<Artifact>,
    /// Component-specific headline values for the report
    pub details: BTreeMap<String, serde_json::Value>,
    /// Images that were not produced
    pub skipped: Vec<String>,
}

impl ComponentOutcome {
    pub fn push(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    /// Record an optional image, noting its name when it was skipped.
    pub fn push_image(&mut self, name: &str, artifact: Option<Artifact>) {
        match artifact {
            Some(a) => self.artifacts.push(a),
            None => self.skipped.push(name.to_string()),
        }
    }

    /// Append everything another outcome produced.
    pub fn merge(&mut self, other: ComponentOutcome) {
        self.artifacts.extend(other.artifacts);
        self.details.extend(other.details);
        self.skipped.extend(other.skipped);
    }

    pub fn detail(&mut self, key: &str, value: impl Serialize) -> PipelineResult<()> {
        self.details.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }
}

/// One unit of work in a phase.
pub trait Component {
    fn name(&self) -> &str;

    fn run(&self, ctx: &PhaseContext<'_>) -> PipelineResult<ComponentOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    NotStarted,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: ComponentState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl ComponentReport {
    fn failed(err: &PipelineError) -> Self {
        Self {
            status: ComponentState::Failed,
            artifacts: Vec::new(),
            details: BTreeMap::new(),
            skipped_images: Vec::new(),
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
        }
    }

    fn succeeded(outcome: &ComponentOutcome) -> Self {
        Self {
            status: ComponentState::Success,
            artifacts: outcome.artifacts.iter().map(|a| a.path.clone()).collect(),
            details: outcome.details.clone(),
            skipped_images: outcome.skipped.clone(),
            error: None,
            error_kind: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryFile {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    pub sha256: String,
}

/// Output files found below the phase root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub total_files: usize,
    /// Count per extension
    pub file_types: BTreeMap<String, usize>,
    pub files: Vec<InventoryFile>,
}

impl Inventory {
    /// Walk `root`, skipping `reports/` and the ledger file.
    pub fn scan(root: &Path) -> PipelineResult<Self> {
        let reports = root.join(REPORTS);
        let ledger = ledger_path(root);
        let mut inventory = Inventory {
            file_types: ArtifactKind::ALL
                .iter()
                .map(|k| (k.extension().to_string(), 0))
                .collect(),
            ..Inventory::default()
        };
        if !root.exists() {
            return Ok(inventory);
        }

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.path() != reports);
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                let source = e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop")
                });
                PipelineError::io(path, source)
            })?;
            if !entry.file_type().is_file() || entry.path() == ledger {
                continue;
            }
            let Some(kind) = ArtifactKind::from_path(entry.path()) else {
                continue;
            };
            let meta = entry.metadata().map_err(|e| {
                PipelineError::io(
                    entry.path(),
                    e.into_io_error().unwrap_or_else(|| {
                        std::io::Error::new(std::io::ErrorKind::Other, "metadata")
                    }),
                )
            })?;
            let modified = meta
                .modified()
                .ok()
                .map(|t| iso8601(DateTime::<Utc>::from(t)));
            inventory.files.push(InventoryFile {
                path: entry.path().to_path_buf(),
                kind,
                size_bytes: meta.len(),
                modified,
                sha256: hash_file(entry.path())?,
            });
            *inventory
                .file_types
                .entry(kind.extension().to_string())
                .or_insert(0) += 1;
        }
        inventory.total_files = inventory.files.len();
        Ok(inventory)
    }
}

/// Inventory cross-checked against the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Integrity {
    pub ledger: PathBuf,
    pub verified: Vec<PathBuf>,
    pub mismatched: Vec<PathBuf>,
    pub unrecorded: Vec<PathBuf>,
}

impl Integrity {
    pub fn check(ledger_file: &Path, inventory: &Inventory) -> PipelineResult<Self> {
        let recorded = latest_hashes(&read_entries(ledger_file)?);
        let mut integrity = Integrity {
            ledger: ledger_file.to_path_buf(),
            ..Integrity::default()
        };
        for file in &inventory.files {
            match recorded.get(&file.path) {
                Some(hash) if *hash == file.sha256 => integrity.verified.push(file.path.clone()),
                Some(_) => integrity.mismatched.push(file.path.clone()),
                None => integrity.unrecorded.push(file.path.clone()),
            }
        }
        Ok(integrity)
    }

    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.unrecorded.is_empty()
    }
}

/// Host description included in every report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub family: String,
    pub architecture: String,
    pub available_parallelism: usize,
    pub crate_version: String,
}

impl SystemInfo {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            available_parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationStatus {
    pub overall: OverallStatus,
    pub components_passed: usize,
    pub total_components: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub phase: String,
    pub timestamp: String,
    pub run_id: RunId,
    pub system: SystemInfo,
    pub renderer: String,
    pub components: BTreeMap<String, ComponentReport>,
    pub outputs: Inventory,
    pub integrity: Integrity,
    pub validation_status: ValidationStatus,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.validation_status.overall == OverallStatus::Pass
    }
}

/// Ordered components of one phase.
pub struct Aggregator {
    phase: String,
    components: Vec<Box<dyn Component>>,
}

impl Aggregator {
    pub fn new(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            components: Vec::new(),
        }
    }

    pub fn with(mut self, component: impl Component + 'static) -> Self {
        self.components.push(Box::new(component));
        self
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.name().to_string()).collect()
    }

    /// Run every component, then write the report below `root`.
    ///
    /// `on_state` sees each component move through its states.
    pub fn run(
        &self,
        root: &Path,
        renderer: &dyn Renderer,
        stamp: &RunStamp,
        on_state: &mut dyn FnMut(&str, ComponentState),
    ) -> PipelineResult<(ValidationReport, Artifact)> {
        let ledger = Ledger::open(&ledger_path(root))?;
        let ctx = PhaseContext::new(root, &ledger, renderer, stamp.clone());
        info!(
            "Validating {} ({} components, renderer: {}, available: {})",
            self.phase,
            self.components.len(),
            renderer.name(),
            ctx.render_available
        );

        let mut components = BTreeMap::new();
        let mut outcomes = BTreeMap::new();
        for component in &self.components {
            let name = component.name().to_string();
            on_state(&name, ComponentState::Running);
            let report = match component.run(&ctx) {
                Ok(outcome) => {
                    info!("{}: {} artifacts", name, outcome.artifacts.len());
                    let report = ComponentReport::succeeded(&outcome);
                    outcomes.insert(name.clone(), outcome);
                    report
                }
                Err(e) => {
                    warn!("{} failed: {}", name, e);
                    ComponentReport::failed(&e)
                }
            };
            on_state(&name, report.status);
            components.insert(name, report);
        }

        let outputs = Inventory::scan(root)?;
        let integrity = Integrity::check(ledger.path(), &outputs)?;
        let verified: BTreeSet<&PathBuf> = integrity.verified.iter().collect();
        let on_disk: BTreeMap<&PathBuf, &str> = outputs
            .files
            .iter()
            .map(|f| (&f.path, f.sha256.as_str()))
            .collect();
        for (name, outcome) in &outcomes {
            let bad = outcome.artifacts.iter().find(|a| {
                !verified.contains(&a.path)
                    || on_disk.get(&a.path) != Some(&a.content_hash.as_str())
            });
            if let (Some(bad), Some(report)) = (bad, components.get_mut(name)) {
                warn!("{}: artifact {:?} failed the ledger cross-check", name, bad.path);
                let err = PipelineError::Integrity(format!(
                    "artifact {:?} does not match its ledger entry",
                    bad.path
                ));
                report.status = ComponentState::Failed;
                report.error = Some(err.to_string());
                report.error_kind = Some(err.kind().to_string());
                on_state(name, ComponentState::Failed);
            }
        }

        let passed = components
            .values()
            .filter(|c| c.status == ComponentState::Success)
            .count();
        let overall = if passed == components.len() {
            OverallStatus::Pass
        } else {
            OverallStatus::Fail
        };
        let report = ValidationReport {
            phase: self.phase.clone(),
            timestamp: iso8601(stamp.created_at),
            run_id: stamp.run_id.clone(),
            system: SystemInfo::current(),
            renderer: renderer.name().to_string(),
            validation_status: ValidationStatus {
                overall,
                components_passed: passed,
                total_components: components.len(),
            },
            components,
            outputs,
            integrity,
        };
        let artifact = ctx.writer.write_json(REPORTS, "validation_report", stamp, &report)?;
        info!(
            "{}: {:?} ({}/{} components), report at {:?}",
            self.phase,
            overall,
            passed,
            report.validation_status.total_components,
            artifact.path
        );
        Ok((report, artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::TABLES;
    use crate::render::NullRenderer;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn stamp() -> RunStamp {
        RunStamp::at(Utc.with_ymd_and_hms(2026, 10, 18, 11, 0, 0).unwrap())
    }

    struct Writes(&'static str);

    impl Component for Writes {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&self, ctx: &PhaseContext<'_>) -> PipelineResult<ComponentOutcome> {
            let mut out = ComponentOutcome::default();
            let mut table = CsvTable::new(&["x"]);
            table.push(vec!["1".to_string()])?;
            out.push(ctx.persist_csv(TABLES, self.0, &table)?);
            let chart = Chart::single("c", crate::render::Panel::new("p", "x", "y"));
            out.push_image("chart", ctx.persist_chart("graphs", self.0, &chart)?);
            Ok(out)
        }
    }

    struct Fails;

    impl Component for Fails {
        fn name(&self) -> &str {
            "broken"
        }

        fn run(&self, _ctx: &PhaseContext<'_>) -> PipelineResult<ComponentOutcome> {
            Err(PipelineError::validation("samples must be > 0, got 0"))
        }
    }

    /// Writes, records, then edits its own output.
    struct Tampers;

    impl Component for Tampers {
        fn name(&self) -> &str {
            "tampers"
        }

        fn run(&self, ctx: &PhaseContext<'_>) -> PipelineResult<ComponentOutcome> {
            let mut out = ComponentOutcome::default();
            let a = ctx.persist_text(TABLES, "tampered", ArtifactKind::Csv, "a\n")?;
            std::fs::write(&a.path, "b\n").map_err(|e| PipelineError::io(&a.path, e))?;
            out.push(a);
            Ok(out)
        }
    }

    /// Leaves a truncated file behind and then fails.
    struct HalfWrites;

    impl Renderer for HalfWrites {
        fn name(&self) -> &'static str {
            "half"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn render_chart(&self, _chart: &Chart, path: &Path) -> PipelineResult<()> {
            std::fs::write(path, b"\x89PNG").map_err(|e| PipelineError::io(path, e))?;
            Err(PipelineError::Render("backend gave up".to_string()))
        }

        fn render_circuit(&self, _circuit: &ParameterCircuit, _path: &Path) -> PipelineResult<()> {
            Err(PipelineError::Render("backend gave up".to_string()))
        }
    }

    #[test]
    fn test_failed_render_removes_partial_image() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(&crate::artifact::ledger_path(temp.path())).unwrap();
        let ctx = PhaseContext::new(temp.path(), &ledger, &HalfWrites, stamp());
        let chart = Chart::single("c", crate::render::Panel::new("p", "x", "y"));

        assert!(ctx.persist_chart("graphs", "partial", &chart).unwrap().is_none());
        let left: Vec<_> = std::fs::read_dir(temp.path().join("graphs")).unwrap().collect();
        assert!(left.is_empty());
        assert!(crate::ledger::read_entries(ledger.path()).unwrap().is_empty());
    }

    #[test]
    fn test_all_success_passes() {
        let temp = TempDir::new().unwrap();
        let (report, artifact) = Aggregator::new("phase_test")
            .with(Writes("one"))
            .with(Writes("two"))
            .run(temp.path(), &NullRenderer, &stamp(), &mut |_, _| {})
            .unwrap();
        assert!(report.passed());
        assert_eq!(report.validation_status.components_passed, 2);
        assert_eq!(report.outputs.file_types["csv"], 2);
        assert_eq!(report.outputs.file_types["png"], 0);
        assert!(report.integrity.is_clean());
        assert_eq!(report.components["one"].skipped_images, vec!["chart"]);
        assert!(artifact.path.starts_with(temp.path().join(REPORTS)));
    }

    #[test]
    fn test_failure_is_isolated() {
        let temp = TempDir::new().unwrap();
        let mut states = Vec::new();
        let (report, _) = Aggregator::new("phase_test")
            .with(Fails)
            .with(Writes("after"))
            .run(temp.path(), &NullRenderer, &stamp(), &mut |name, state| {
                states.push((name.to_string(), state))
            })
            .unwrap();
        assert_eq!(report.validation_status.overall, OverallStatus::Fail);
        let broken = &report.components["broken"];
        assert_eq!(broken.status, ComponentState::Failed);
        assert_eq!(broken.error_kind.as_deref(), Some("validation"));
        assert_eq!(report.components["after"].status, ComponentState::Success);
        assert_eq!(
            states,
            vec![
                ("broken".to_string(), ComponentState::Running),
                ("broken".to_string(), ComponentState::Failed),
                ("after".to_string(), ComponentState::Running),
                ("after".to_string(), ComponentState::Success),
            ]
        );
    }

    #[test]
    fn test_tampered_artifact_downgrades_component() {
        let temp = TempDir::new().unwrap();
        let (report, _) = Aggregator::new("phase_test")
            .with(Tampers)
            .run(temp.path(), &NullRenderer, &stamp(), &mut |_, _| {})
            .unwrap();
        assert_eq!(report.components["tampers"].status, ComponentState::Failed);
        assert_eq!(report.components["tampers"].error_kind.as_deref(), Some("integrity"));
        assert_eq!(report.integrity.mismatched.len(), 1);
        assert!(!report.passed());
    }

    #[test]
    fn test_inventory_ignores_reports_and_ledger() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join(REPORTS)).unwrap();
        std::fs::write(root.join(REPORTS).join("old.json"), "{}").unwrap();
        std::fs::create_dir_all(root.join("validation_data")).unwrap();
        std::fs::write(ledger_path(root), "").unwrap();
        std::fs::write(root.join("validation_data").join("stray.json"), "{}").unwrap();
        std::fs::write(root.join("notes.txt"), "ignored").unwrap();

        let inventory = Inventory::scan(root).unwrap();
        assert_eq!(inventory.total_files, 1);
        assert_eq!(inventory.file_types["json"], 1);

        let integrity = Integrity::check(&ledger_path(root), &inventory).unwrap();
        assert_eq!(integrity.unrecorded.len(), 1);
    }
}
