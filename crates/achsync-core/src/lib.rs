//! achsync-core: Core library for reconciling achievement screen captures
//! with tracker import files
//!
//! This library provides functionality to:
//! - Load an achievement catalog and OCR'd evidence titles
//! - Fuzzy-match titles against catalog names
//! - Pick which progress snapshot to fold into a run
//! - Merge completion state monotonically, with a record of every change
//! - Produce the final import document and a report of the run

pub mod catalog;
pub mod config;
pub mod driver;
pub mod error;
pub mod evidence;
pub mod matcher;
pub mod merger;
pub mod report;
pub mod resolver;
pub mod tree;

pub use catalog::{load_catalog, Catalog, CatalogEntry};
pub use config::{ImportConfig, MainConfig, SourceConfig};
pub use driver::{mark_completed, reconcile, run_import, ReconcileSettings, RunOutcome, RunSummary, Snapshot};
pub use error::{Error, Result};
pub use evidence::{collect_ocr_titles, extract_titles, load_evidence, write_titles};
pub use matcher::{FuzzyMatcher, MatchResult, MetricScores};
pub use merger::{merge_state, MergeAction, MergeOutcome, MergeRecord};
pub use report::{run_timestamp, RunReport};
pub use resolver::{ResolutionStrategy, ResolvedSource, SourceResolver};
pub use tree::{SetOutcome, StatePath, StateTree};
