//! Types describing a conversion run and its outcome.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::PathsConfig;
use crate::optimizer::{OptimizationMode, TensorPlan};

/// Phase of a conversion run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionPhase {
    /// Checking paths before touching anything
    Validating,
    /// Reading and parsing the source model
    Loading,
    /// Re-encoding tensors and serializing the output
    Optimizing,
    /// Parsing the produced bytes back
    Verifying,
    /// Replacing the destination file
    Writing,
    Completed,
}

impl ConversionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionPhase::Validating => "validating",
            ConversionPhase::Loading => "loading",
            ConversionPhase::Optimizing => "optimizing",
            ConversionPhase::Verifying => "verifying",
            ConversionPhase::Writing => "writing",
            ConversionPhase::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ConversionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConversionReport {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub source_format: String,
    pub target_format: String,
    pub mode: OptimizationMode,
    pub source_bytes: u64,
    pub dest_bytes: u64,
    pub tensors_total: usize,
    /// Tensors stored at reduced precision
    pub tensors_reduced: usize,
    pub parameter_count: usize,
    pub source_sha256: String,
    pub output_sha256: String,
    /// Whether the output was parsed back before it was written
    pub verified: bool,
}

impl ConversionReport {
    /// Destination size as a fraction of the source size.
    pub fn size_ratio(&self) -> f64 {
        if self.source_bytes == 0 {
            return 0.0;
        }
        self.dest_bytes as f64 / self.source_bytes as f64
    }
}

/// Provenance record written next to the converted model.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ConversionSidecar {
    #[serde(flatten)]
    pub report: ConversionReport,
    pub tensors: Vec<TensorPlan>,
    pub conversion_tool: String,
    pub conversion_version: String,
    /// ISO 8601 timestamp of when conversion was performed
    pub conversion_date: String,
}

/// Location of the sidecar for a converted model: `<file name>.meta.json`.
pub fn sidecar_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PathsConfig::SIDECAR_SUFFIX);
    dest.with_file_name(name)
}

/// Render a byte count in mebibytes with two decimals.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}
