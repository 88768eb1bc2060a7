//! Run reports
//!
//! A report captures everything a run decided: the snapshot it merged, every
//! leaf it changed and why, and each title's match scores.

use crate::driver::RunSummary;
use crate::error::{Error, Result};
use crate::tree::write_atomic;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Timestamp used in generated file names, e.g. `20250101_120000`
pub fn run_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Inputs and outputs of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFiles {
    pub titles_file: PathBuf,
    pub db_file: PathBuf,
    pub import_file: PathBuf,
    pub final_import_file: PathBuf,
    pub error_file: PathBuf,
}

/// A record of one import run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run finished
    pub generated_at: DateTime<Utc>,
    /// Threshold the titles were matched with
    pub threshold: u8,
    /// Strategy that supplied the merged snapshot, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub files: RunFiles,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn new(threshold: u8, strategy: Option<String>, files: RunFiles, summary: RunSummary) -> Self {
        Self {
            generated_at: Utc::now(),
            threshold,
            strategy,
            files,
            summary,
        }
    }

    /// Load a report from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| Error::JsonParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn to_pretty_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save the report as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_atomic(path.as_ref(), self.to_pretty_string()?.as_bytes())
    }

    /// Total leaves changed by merging and by marking matches
    pub fn total_changes(&self) -> usize {
        self.summary.merge.records.len() + self.summary.applied.len()
    }
}
