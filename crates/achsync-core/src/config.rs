//! Pipeline configuration
//!
//! `config/main_config.toml` lists the config file of every pipeline step.
//! The import step's own file carries its inputs, outputs, matching settings
//! and where to look for snapshots. Both are created with defaults the first
//! time they are needed.

use crate::error::{Error, Result};
use crate::matcher::DEFAULT_THRESHOLD;
use crate::resolver::ResolutionStrategy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default location of the main config
pub const MAIN_CONFIG_PATH: &str = "config/main_config.toml";

/// Step name used for config, log and output file names
pub const STEP_NAME: &str = "import_generator";

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = toml::to_string_pretty(value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content).map_err(|e| Error::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Main config
// ---------------------------------------------------------------------------

/// Config file paths for each pipeline step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPaths {
    pub frame_extraction: PathBuf,
    pub ocr_extraction: PathBuf,
    pub import_generator: PathBuf,
}

impl Default for StepPaths {
    fn default() -> Self {
        Self {
            frame_extraction: PathBuf::from("config/frame_extraction.toml"),
            ocr_extraction: PathBuf::from("config/ocr_extraction.toml"),
            import_generator: PathBuf::from("config/import_generator.toml"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MainConfig {
    pub steps: StepPaths,
}

impl MainConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_toml(path.as_ref())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_toml(path.as_ref(), self)
    }

    /// Load the main config, writing the default one first if it is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        info!("[Init] Created default main config at: {}", path.display());
        Ok(config)
    }

    /// Combined title list written by the OCR step, if that step has run
    pub fn ocr_titles_file(&self) -> Option<PathBuf> {
        let path = &self.steps.ocr_extraction;
        if !path.is_file() {
            return None;
        }
        match read_toml::<toml::Table>(path) {
            Ok(table) => table
                .get("output")
                .and_then(|output| output.get("all_titles_file"))
                .and_then(|value| value.as_str())
                .map(PathBuf::from),
            Err(e) => {
                warn!("Failed to read titles file from OCR config: {}", e);
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Import step config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Newline-delimited evidence titles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub titles_file: Option<PathBuf>,
    /// Achievement catalog
    pub db_file: PathBuf,
    /// Baseline import document the output is built from
    pub import_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Unmatched titles, one per line
    pub error_file: PathBuf,
    /// Final import document
    pub final_import_file: PathBuf,
    /// Optional JSON report of the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_file: Option<PathBuf>,
}

/// Matching and merge behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Minimum score (0–100) for accepting a match
    pub threshold: u8,
    /// Echo per-title log lines to the console
    pub verbose: bool,
    /// Fold a snapshot into the output before matching
    pub merge_uploads: bool,
    /// Directory for run logs
    pub log_dir: PathBuf,
    /// Bucket under `achievement` that receives newly seen ids
    pub primary_bucket: String,
    /// Checklist sub-item marked when its achievement matches
    pub checklist_primary: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            verbose: true,
            merge_uploads: true,
            log_dir: PathBuf::from("logs"),
            primary_bucket: "0".to_string(),
            checklist_primary: "0".to_string(),
        }
    }
}

/// Where snapshots are looked for, and which strategies are enabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// A specific snapshot to use when it exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_file: Option<PathBuf>,
    /// Partial exports downloaded from the tracker
    pub user_partial_dirs: Vec<PathBuf>,
    /// Previously generated uploads, in tie-break order
    pub upload_dirs: Vec<PathBuf>,
    /// Baseline document used to seed or fall back to
    pub baseline: PathBuf,
    /// Where seed copies of the baseline are written
    pub seed_dir: PathBuf,
    pub use_downloaded_file: bool,
    pub use_uploaded_file: bool,
    pub create_new_upload: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            pinned_file: None,
            user_partial_dirs: vec![PathBuf::from("user_partial_uploads")],
            upload_dirs: vec![PathBuf::from("merged_uploads"), PathBuf::from("uploads")],
            baseline: PathBuf::from("paimon_data/raw.json"),
            seed_dir: PathBuf::from("merged_uploads"),
            use_downloaded_file: true,
            use_uploaded_file: true,
            create_new_upload: true,
        }
    }
}

impl SourceConfig {
    /// Enabled strategies in priority order; the baseline fallback is always last
    pub fn strategies(&self, timestamp: &str) -> Vec<ResolutionStrategy> {
        let mut strategies = Vec::new();

        if let Some(path) = &self.pinned_file {
            strategies.push(ResolutionStrategy::UsePinnedFile { path: path.clone() });
        }
        if self.use_downloaded_file {
            strategies.push(ResolutionStrategy::PreferUserPartial {
                dirs: self.user_partial_dirs.clone(),
            });
        }
        if self.use_uploaded_file {
            strategies.push(ResolutionStrategy::PreferMergedUploads {
                dirs: self.upload_dirs.clone(),
            });
        }
        if self.create_new_upload {
            strategies.push(ResolutionStrategy::CreateFromBaseline {
                baseline: self.baseline.clone(),
                seed_dir: self.seed_dir.clone(),
                timestamp: timestamp.to_string(),
            });
        }
        strategies.push(ResolutionStrategy::FallbackToBaseline {
            baseline: self.baseline.clone(),
        });

        strategies
    }
}

/// Configuration of the import step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub sources: SourceConfig,
}

impl ImportConfig {
    /// Default config for a run started at `timestamp`
    pub fn with_defaults(timestamp: &str, titles_file: Option<PathBuf>) -> Self {
        Self {
            input: InputConfig {
                titles_file,
                db_file: PathBuf::from("paimon_data/db.json"),
                import_file: PathBuf::from("paimon_data/raw.json"),
            },
            output: OutputConfig {
                error_file: PathBuf::from(format!(
                    "data/error/{STEP_NAME}_mismatch_{timestamp}.txt"
                )),
                final_import_file: PathBuf::from(format!("uploads/upload{timestamp}.json")),
                report_file: None,
            },
            settings: Settings::default(),
            sources: SourceConfig::default(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = read_toml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_toml(path.as_ref(), self)
    }

    /// Load the step config named in `main`, creating a default one if missing.
    ///
    /// A new config takes its titles file from the OCR step's config.
    pub fn load_or_create(main: &MainConfig, timestamp: &str) -> Result<Self> {
        let path = &main.steps.import_generator;
        if path.exists() {
            return Self::load(path);
        }

        info!("Step config not found at {}, creating default.", path.display());
        let titles_file = main.ocr_titles_file();
        if titles_file.is_none() {
            warn!("OCR config has no titles file yet; set input.titles_file before running");
        }
        let config = Self::with_defaults(timestamp, titles_file);
        config.save(path)?;
        info!("Default config created at: {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.settings.threshold > 100 {
            return Err(Error::InvalidConfig(format!(
                "settings.threshold must be between 0 and 100, got {}",
                self.settings.threshold
            )));
        }
        if self.settings.primary_bucket.is_empty() {
            return Err(Error::InvalidConfig(
                "settings.primary_bucket must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_import_config_uses_defaults() {
        let config: ImportConfig = toml::from_str(
            r#"
            [input]
            titles_file = "data/ocr/all_titles.txt"
            db_file = "db.json"
            import_file = "raw.json"

            [output]
            error_file = "err.txt"
            final_import_file = "out.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.settings.threshold, 90);
        assert!(config.settings.merge_uploads);
        assert_eq!(config.settings.primary_bucket, "0");
        assert_eq!(config.sources.upload_dirs.len(), 2);
        assert_eq!(config.output.report_file, None);
    }

    #[test]
    fn test_partial_settings_table() {
        let config: ImportConfig = toml::from_str(
            r#"
            [input]
            db_file = "db.json"
            import_file = "raw.json"

            [output]
            error_file = "err.txt"
            final_import_file = "out.json"

            [settings]
            threshold = 75
            verbose = false
            "#,
        )
        .unwrap();

        assert_eq!(config.input.titles_file, None);
        assert_eq!(config.settings.threshold, 75);
        assert!(!config.settings.verbose);
        assert_eq!(config.settings.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_threshold_above_100_rejected() {
        let mut config = ImportConfig::with_defaults("20250101_000000", None);
        config.settings.threshold = 101;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_default_output_paths_carry_timestamp() {
        let config = ImportConfig::with_defaults("20250101_120000", None);
        assert_eq!(
            config.output.final_import_file,
            PathBuf::from("uploads/upload20250101_120000.json")
        );
        assert_eq!(
            config.output.error_file,
            PathBuf::from("data/error/import_generator_mismatch_20250101_120000.txt")
        );
    }

    #[test]
    fn test_strategy_order_and_toggles() {
        let mut sources = SourceConfig {
            pinned_file: Some(PathBuf::from("pinned.json")),
            ..SourceConfig::default()
        };
        let names: Vec<&str> = sources.strategies("ts").iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "UsePinnedFile",
                "PreferUserPartial",
                "PreferMergedUploads",
                "CreateFromBaseline",
                "FallbackToBaseline",
            ]
        );

        sources.pinned_file = None;
        sources.use_downloaded_file = false;
        sources.create_new_upload = false;
        let names: Vec<&str> = sources.strategies("ts").iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["PreferMergedUploads", "FallbackToBaseline"]);
    }

    #[test]
    fn test_load_or_create_writes_defaults_and_reads_ocr_titles() {
        let dir = tempfile::tempdir().unwrap();
        let ocr_path = dir.path().join("ocr_extraction.toml");
        fs::write(
            &ocr_path,
            "[output]\nfolder = \"data/ocr\"\nall_titles_file = \"data/ocr/all_titles.txt\"\n",
        )
        .unwrap();

        let main = MainConfig {
            steps: StepPaths {
                frame_extraction: dir.path().join("frame_extraction.toml"),
                ocr_extraction: ocr_path,
                import_generator: dir.path().join("import_generator.toml"),
            },
        };

        let created = ImportConfig::load_or_create(&main, "20250101_000000").unwrap();
        assert_eq!(
            created.input.titles_file,
            Some(PathBuf::from("data/ocr/all_titles.txt"))
        );
        assert!(main.steps.import_generator.exists());

        let reloaded = ImportConfig::load_or_create(&main, "20990101_000000").unwrap();
        assert_eq!(reloaded, created);
    }

    #[test]
    fn test_main_config_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("main_config.toml");

        let created = MainConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(MainConfig::load(&path).unwrap(), created);
        assert_eq!(
            created.steps.import_generator,
            PathBuf::from("config/import_generator.toml")
        );
    }
}
