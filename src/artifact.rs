//! Artifact writer
//!
//! Every output file goes through [`artifact_path`] and is opened with
//! `create_new`, so an existing file is an error instead of an overwrite.
//! The writer hashes exactly the bytes it wrote; the ledger later re-reads
//! the file and compares.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::metrics::Summary;
use crate::{
    iso8601, DerivedMetrics, MetricValue, PipelineError, PipelineResult, RunId, RunStamp, Signal,
    SimulationRun,
};

pub const VALIDATION_DATA: &str = "validation_data";
pub const GRAPHS: &str = "graphs";
pub const TABLES: &str = "tables";
pub const CIRCUITS: &str = "circuits";
pub const REPORTS: &str = "reports";
pub const EDGE_LOGS: &str = "edge_logs";

/// Ledger file name inside [`VALIDATION_DATA`].
pub const LEDGER_FILE: &str = "file_verification.csv";

/// Location of the ledger below an output root.
pub fn ledger_path(root: &Path) -> PathBuf {
    root.join(VALIDATION_DATA).join(LEDGER_FILE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    Json,
    Csv,
    Png,
    Qasm,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Json,
        ArtifactKind::Csv,
        ArtifactKind::Png,
        ArtifactKind::Qasm,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Json => "json",
            ArtifactKind::Csv => "csv",
            ArtifactKind::Png => "png",
            ArtifactKind::Qasm => "qasm",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.extension() == ext)
    }
}

/// A file written by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    /// SHA-256 of the bytes written, lowercase hex
    pub content_hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash a file as it currently exists on disk.
pub fn hash_file(path: &Path) -> PipelineResult<String> {
    let data = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(sha256_hex(&data))
}

fn check_component(what: &str, value: &str) -> PipelineResult<()> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(PipelineError::validation(format!(
            "{what} must be non-empty [a-z0-9_], got {value:?}"
        )))
    }
}

/// `root/<category>/<stem>_<run_id>.<ext>`
pub fn artifact_path(
    root: &Path,
    category: &str,
    stem: &str,
    run_id: &RunId,
    ext: &str,
) -> PipelineResult<PathBuf> {
    check_component("category", category)?;
    check_component("stem", stem)?;
    let id = run_id.as_str();
    if id.is_empty() || id.contains(['/', '\\', ':']) || id.contains("..") {
        return Err(PipelineError::validation(format!(
            "run id is not path safe: {id:?}"
        )));
    }
    Ok(root.join(category).join(format!("{stem}_{id}.{ext}")))
}

/// Writes artifacts below one output root.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the path, create its directory and make sure nothing is there
    /// yet. Used by collaborators that write the file themselves.
    pub fn reserve_path(
        &self,
        category: &str,
        stem: &str,
        stamp: &RunStamp,
        kind: ArtifactKind,
    ) -> PipelineResult<PathBuf> {
        let path = artifact_path(&self.root, category, stem, &stamp.run_id, kind.extension())?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        if path.exists() {
            return Err(PipelineError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "artifact already exists"),
            ));
        }
        Ok(path)
    }

    /// Describe a file some other writer produced at a reserved path.
    pub fn adopt(
        &self,
        path: PathBuf,
        kind: ArtifactKind,
        stamp: &RunStamp,
    ) -> PipelineResult<Artifact> {
        let data = fs::read(&path).map_err(|e| PipelineError::io(&path, e))?;
        Ok(Artifact {
            content_hash: sha256_hex(&data),
            size_bytes: data.len() as u64,
            path,
            kind,
            created_at: stamp.created_at,
        })
    }

    pub fn write_bytes(
        &self,
        category: &str,
        stem: &str,
        stamp: &RunStamp,
        kind: ArtifactKind,
        data: &[u8],
    ) -> PipelineResult<Artifact> {
        let path = self.reserve_path(category, stem, stamp, kind)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| PipelineError::io(&path, e))?;
        file.write_all(data).map_err(|e| PipelineError::io(&path, e))?;
        file.flush().map_err(|e| PipelineError::io(&path, e))?;

        let content_hash = sha256_hex(data);
        debug!("Wrote {:?} ({} bytes, {})", path, data.len(), &content_hash[..12]);
        Ok(Artifact {
            path,
            kind,
            content_hash,
            size_bytes: data.len() as u64,
            created_at: stamp.created_at,
        })
    }

    pub fn write_json<T: Serialize>(
        &self,
        category: &str,
        stem: &str,
        stamp: &RunStamp,
        value: &T,
    ) -> PipelineResult<Artifact> {
        let json = serde_json::to_vec_pretty(value)?;
        self.write_bytes(category, stem, stamp, ArtifactKind::Json, &json)
    }

    pub fn write_csv(
        &self,
        category: &str,
        stem: &str,
        stamp: &RunStamp,
        table: &CsvTable,
    ) -> PipelineResult<Artifact> {
        self.write_bytes(category, stem, stamp, ArtifactKind::Csv, table.to_string().as_bytes())
    }

    pub fn write_text(
        &self,
        category: &str,
        stem: &str,
        stamp: &RunStamp,
        kind: ArtifactKind,
        text: &str,
    ) -> PipelineResult<Artifact> {
        self.write_bytes(category, stem, stamp, kind, text.as_bytes())
    }
}

/// Quote a CSV field when it contains a separator, quote or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Header row plus data rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn new(header: &[&str]) -> Self {
        Self {
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) -> PipelineResult<()> {
        if row.len() != self.header.len() {
            return Err(PipelineError::validation(format!(
                "csv row has {} fields, header has {}",
                row.len(),
                self.header.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// One row per sample: x, y, then every channel in name order.
    pub fn from_run(run: &SimulationRun) -> PipelineResult<Self> {
        let mut header = vec![run.signal.x_label.as_str(), run.signal.y_label.as_str()];
        header.extend(run.channels.keys().map(|k| k.as_str()));
        let mut table = Self::new(&header);
        for (i, &(x, y)) in run.signal.points.iter().enumerate() {
            let mut row = vec![x.to_string(), y.to_string()];
            row.extend(run.channels.values().map(|c| c[i].to_string()));
            table.push(row)?;
        }
        Ok(table)
    }
}

impl std::fmt::Display for CsvTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let line = |fields: &[String]| {
            fields
                .iter()
                .map(|v| csv_field(v))
                .collect::<Vec<_>>()
                .join(",")
        };
        writeln!(f, "{}", line(&self.header))?;
        for row in &self.rows {
            writeln!(f, "{}", line(row))?;
        }
        Ok(())
    }
}

/// Column form of a run's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    pub x_label: String,
    pub y_label: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, Vec<f64>>,
}

/// Structured JSON record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub timestamp: String,
    pub run_id: RunId,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub parameters: BTreeMap<String, f64>,
    pub data: RecordData,
    #[serde(default)]
    pub derived: DerivedMetrics,
    /// Summary of the primary output and of every series metric
    pub validation: BTreeMap<String, Summary>,
}

fn summaries(data: &RecordData, derived: &DerivedMetrics) -> BTreeMap<String, Summary> {
    let mut out = BTreeMap::new();
    if let Some(s) = Summary::of(&data.y) {
        out.insert(data.y_label.clone(), s);
    }
    for (key, value) in derived {
        if let MetricValue::Series(values) = value {
            if let Some(s) = Summary::of(values) {
                out.insert(key.clone(), s);
            }
        }
    }
    out
}

impl SimulationRecord {
    pub fn from_run(run: &SimulationRun, derived: DerivedMetrics) -> Self {
        let data = RecordData {
            x_label: run.signal.x_label.clone(),
            y_label: run.signal.y_label.clone(),
            x: run.signal.xs(),
            y: run.signal.ys(),
            channels: run.channels.clone(),
        };
        let validation = summaries(&data, &derived);
        Self {
            timestamp: iso8601(run.created_at),
            run_id: run.run_id.clone(),
            model: run.model.clone(),
            seed: run.seed,
            parameters: run.parameters.clone(),
            data,
            derived,
            validation,
        }
    }

    /// Rebuild the run this record was written from.
    pub fn into_run(self) -> PipelineResult<SimulationRun> {
        let created_at = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| PipelineError::validation(format!("timestamp {:?}: {e}", self.timestamp)))?
            .with_timezone(&Utc);
        let data = &self.data;
        let signal = Signal::from_columns(&data.x_label, &data.y_label, &data.x, &data.y)?;
        let stamp = RunStamp {
            run_id: self.run_id,
            created_at,
        };
        let mut run = SimulationRun::new(&stamp, &self.model, self.parameters, signal);
        run.seed = self.seed;
        for (name, values) in self.data.channels {
            run = run.with_channel(&name, values)?;
        }
        Ok(run)
    }

    /// Recompute the validation block from the data and compare.
    pub fn verify_summary(&self) -> PipelineResult<()> {
        let expected = summaries(&self.data, &self.derived);
        for (key, stored) in &self.validation {
            match expected.get(key) {
                Some(actual) if actual.approx_eq(stored, 1e-9) => {}
                Some(actual) => {
                    return Err(PipelineError::Integrity(format!(
                        "summary of {key} does not match data: \
                         stored {stored:?}, computed {actual:?}"
                    )))
                }
                None => {
                    return Err(PipelineError::Integrity(format!(
                        "summary of {key} has no matching data"
                    )))
                }
            }
        }
        if let Some(missing) = expected.keys().find(|k| !self.validation.contains_key(*k)) {
            return Err(PipelineError::Integrity(format!("summary of {missing} is missing")));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(serde_json::from_str(&json)?)
    }
}
