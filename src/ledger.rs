//! Append-only integrity ledger
//!
//! One CSV line `path,sha256,timestamp` per artifact. The ledger hashes the
//! file as it exists on disk, not the writer's buffer, and refuses to record
//! an artifact whose bytes changed since they were written. It never reads
//! its own log back while recording.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::artifact::{csv_field, hash_file, Artifact};
use crate::{iso8601, PipelineError, PipelineResult};

/// One recorded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub path: PathBuf,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Serialized form including the trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{}\n",
            csv_field(&self.path.to_string_lossy()),
            self.content_hash,
            iso8601(self.created_at)
        )
    }

    pub fn parse(line: &str) -> PipelineResult<Self> {
        let fields = split_csv_line(line);
        let [path, hash, ts] = fields.as_slice() else {
            return Err(PipelineError::Integrity(format!(
                "ledger line has {} fields: {line:?}",
                fields.len()
            )));
        };
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PipelineError::Integrity(format!("malformed hash in ledger line {line:?}")));
        }
        let created_at = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| PipelineError::Integrity(format!("bad ledger timestamp {ts:?}: {e}")))?
            .with_timezone(&Utc);
        Ok(Self {
            path: PathBuf::from(path),
            content_hash: hash.to_ascii_lowercase(),
            created_at,
        })
    }
}

/// Split one CSV line, honouring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.trim_end_matches(['\r', '\n']).chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            ('"', true) => quoted = false,
            ('"', false) if field.is_empty() => quoted = true,
            (',', false) => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Append-only verification log shared by all components of a run.
pub struct Ledger {
    path: PathBuf,
    file: Mutex<File>,
}

impl Ledger {
    /// Open or create the ledger file, creating parent directories.
    pub fn open(path: &Path) -> PipelineResult<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        let existed = path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PipelineError::io(path, e))?;
        if existed {
            info!("Opened ledger at {:?}", path);
        } else {
            info!("Created new ledger at {:?}", path);
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hash the artifact as it is on disk and append one entry.
    pub fn record(&self, artifact: &Artifact) -> PipelineResult<LedgerEntry> {
        let on_disk = hash_file(&artifact.path)?;
        if on_disk != artifact.content_hash {
            return Err(PipelineError::Integrity(format!(
                "{:?} changed after writing: wrote {}, found {}",
                artifact.path, artifact.content_hash, on_disk
            )));
        }
        let entry = LedgerEntry {
            path: artifact.path.clone(),
            content_hash: on_disk,
            created_at: artifact.created_at,
        };
        let line = entry.to_line();
        {
            let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            file.write_all(line.as_bytes())
                .map_err(|e| PipelineError::io(&self.path, e))?;
        }
        debug!("Recorded {:?} in ledger", entry.path);
        Ok(entry)
    }
}

/// Parse every entry of a ledger file. A missing file is an empty ledger.
pub fn read_entries(path: &Path) -> PipelineResult<Vec<LedgerEntry>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::io(path, e)),
    };
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(LedgerEntry::parse)
        .collect()
}

/// Latest recorded hash per path.
pub fn latest_hashes(entries: &[LedgerEntry]) -> HashMap<PathBuf, String> {
    entries
        .iter()
        .map(|e| (e.path.clone(), e.content_hash.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Verified,
    Mismatch { actual: String },
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryCheck {
    pub entry: LedgerEntry,
    pub status: EntryStatus,
}

/// Re-hash every file listed in the ledger.
pub fn verify(path: &Path) -> PipelineResult<Vec<EntryCheck>> {
    let entries = read_entries(path)?;
    let mut checks = Vec::with_capacity(entries.len());
    for entry in entries {
        let status = match fs::read(&entry.path) {
            Ok(data) => {
                let actual = crate::artifact::sha256_hex(&data);
                if actual == entry.content_hash {
                    EntryStatus::Verified
                } else {
                    warn!("Hash mismatch for {:?}", entry.path);
                    EntryStatus::Mismatch { actual }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Ledger entry {:?} is missing on disk", entry.path);
                EntryStatus::Missing
            }
            Err(e) => return Err(PipelineError::io(&entry.path, e)),
        };
        checks.push(EntryCheck { entry, status });
    }
    Ok(checks)
}
