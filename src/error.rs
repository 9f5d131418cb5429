//! Error taxonomy for the simulation pipeline
//!
//! Parameter problems, filesystem problems and integrity problems are kept
//! apart so the validation report can say which remediation applies.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or out-of-range parameters. Raised before any file I/O.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem failure (missing directory, permissions, refused overwrite).
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rendering was attempted and failed.
    #[error("render error: {0}")]
    Render(String),

    /// Rendering capability is not compiled in or not usable.
    #[error("rendering unavailable: {0}")]
    RenderUnavailable(String),

    /// Bytes on disk do not match what was recorded.
    #[error("integrity error: {0}")]
    Integrity(String),
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable label used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Io { .. } => "io",
            Self::Serialization(_) => "serialization",
            Self::Render(_) => "render",
            Self::RenderUnavailable(_) => "render_unavailable",
            Self::Integrity(_) => "integrity",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Reject zero counts with a uniform message.
pub(crate) fn require_nonzero(name: &str, value: usize) -> PipelineResult<()> {
    if value == 0 {
        return Err(PipelineError::validation(format!("{name} must be > 0, got 0")));
    }
    Ok(())
}

/// Reject non-finite or non-positive values.
pub(crate) fn require_positive(name: &str, value: f64) -> PipelineResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PipelineError::validation(format!(
            "{name} must be finite and > 0, got {value}"
        )));
    }
    Ok(())
}

/// Reject non-finite or negative values.
pub(crate) fn require_non_negative(name: &str, value: f64) -> PipelineResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(PipelineError::validation(format!(
            "{name} must be finite and >= 0, got {value}"
        )));
    }
    Ok(())
}

pub(crate) fn require_finite(name: &str, value: f64) -> PipelineResult<()> {
    if !value.is_finite() {
        return Err(PipelineError::validation(format!(
            "{name} must be finite, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinct() {
        let v = PipelineError::validation("samples must be > 0");
        let io = PipelineError::io(
            "/nonexistent",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(v.kind(), "validation");
        assert_eq!(io.kind(), "io");
        assert!(io.to_string().contains("/nonexistent"));
    }

    #[test]
    fn test_require_helpers() {
        assert!(require_nonzero("samples", 0).is_err());
        assert!(require_nonzero("samples", 1).is_ok());
        assert!(require_positive("duration", 0.0).is_err());
        assert!(require_positive("duration", f64::NAN).is_err());
        assert!(require_non_negative("r", 0.0).is_ok());
        assert!(require_non_negative("r", -1e-9).is_err());
        assert!(require_finite("x", f64::INFINITY).is_err());
    }
}
