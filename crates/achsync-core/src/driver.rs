//! Reconciliation of evidence titles with a tracker import document
//!
//! [`reconcile`] is the in-memory pass: fold in a snapshot, match every title,
//! mark matched achievements. [`run_import`] wraps it with the file handling
//! of one pipeline run and writes the outputs only once everything succeeded.

use crate::catalog::{load_catalog, Catalog};
use crate::config::ImportConfig;
use crate::error::{Error, Result};
use crate::evidence::{load_evidence, render_titles};
use crate::matcher::{FuzzyMatcher, MatchResult};
use crate::merger::{merge_state, MergeOutcome, MergeRecord};
use crate::report::{RunFiles, RunReport};
use crate::resolver::SourceResolver;
use crate::tree::{write_atomic, SetOutcome, StatePath, StateTree};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Settings that shape a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub threshold: u8,
    pub primary_bucket: String,
    pub checklist_primary: String,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            threshold: crate::matcher::DEFAULT_THRESHOLD,
            primary_bucket: "0".to_string(),
            checklist_primary: "0".to_string(),
        }
    }
}

/// The snapshot side of a run
#[derive(Debug, Clone)]
pub enum Snapshot<'a> {
    /// Merging is turned off
    Disabled,
    /// Merging was requested but no snapshot could be resolved
    Unavailable { reason: String },
    /// Merge this document
    Available { path: PathBuf, document: &'a StateTree },
}

/// What a reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub processed: usize,
    pub matched: usize,
    pub unmatched: usize,
    /// Unmatched titles, verbatim and in evidence order
    pub unmatched_titles: Vec<String>,
    /// Per-title results in evidence order
    pub matches: Vec<MatchResult>,
    /// Snapshot merged into the document, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Changes made by the snapshot merge
    pub merge: MergeOutcome,
    /// Changes made by marking matched achievements
    pub applied: Vec<MergeRecord>,
    pub catalog_entries: usize,
    pub skipped_catalog_entries: usize,
    /// Degradations that did not stop the run
    pub warnings: Vec<String>,
}

impl RunSummary {
    /// Leaves changed by the snapshot merge
    pub fn merged_leaves(&self) -> usize {
        self.merge.records.len()
    }
}

/// Mark achievement `id` as completed.
///
/// The id is set in every bucket that already lists it, or in the primary
/// bucket when none does. If the id has a checklist, its primary sub-item is
/// set as well. Only ever writes `true`.
pub fn mark_completed(
    destination: &mut StateTree,
    id: &str,
    settings: &ReconcileSettings,
) -> Vec<MergeRecord> {
    let mut paths: Vec<StatePath> = destination
        .buckets_listing(id)
        .iter()
        .map(|bucket| StatePath::achievement(bucket, id))
        .collect();
    if paths.is_empty() {
        paths.push(StatePath::achievement(&settings.primary_bucket, id));
    }
    if destination.has_checklist(id) {
        paths.push(StatePath::checklist_item(id, &settings.checklist_primary));
    }

    let mut records = Vec::new();
    for path in paths {
        let outcome = destination.set_true(path.segments());
        if outcome == SetOutcome::Blocked {
            warn!("Cannot mark {}: destination holds a conflicting node", path);
        }
        if let Some(record) = MergeRecord::from_outcome(path, outcome) {
            debug!("{}", record);
            records.push(record);
        }
    }
    records
}

/// Fold in the snapshot, then match and mark every evidence title
pub fn reconcile(
    catalog: &Catalog,
    evidence: &[String],
    destination: &mut StateTree,
    snapshot: Snapshot<'_>,
    settings: &ReconcileSettings,
) -> RunSummary {
    let mut summary = RunSummary {
        catalog_entries: catalog.len(),
        skipped_catalog_entries: catalog.skipped,
        ..RunSummary::default()
    };

    if catalog.skipped > 0 {
        debug!("{} catalog record(s) lacked an id or a name", catalog.skipped);
    }

    match snapshot {
        Snapshot::Disabled => debug!("Snapshot merge disabled"),
        Snapshot::Unavailable { reason } => {
            warn!("[Warning] No valid uploaded file found for merging: {}", reason);
            summary
                .warnings
                .push(format!("snapshot merge skipped: {reason}"));
        }
        Snapshot::Available { path, document } => {
            info!("[MERGE] Merging from uploaded file: {}", path.display());
            summary.merge = merge_state(destination, document);
            for blocked in &summary.merge.blocked {
                summary
                    .warnings
                    .push(format!("snapshot leaf {blocked} conflicts with the destination"));
            }
            summary.source = Some(path);
        }
    }

    let matcher = FuzzyMatcher::new(&catalog.entries, settings.threshold);

    for title in evidence {
        let result = matcher.match_title(title);
        match &result.matched {
            Some(entry) => {
                info!(
                    "[MATCH] '{}' → '{}' (ID: {}) Score: {:.1} | set_ratio={:.1} sort_ratio={:.1} ratio={:.1}",
                    title,
                    entry.name,
                    entry.id,
                    result.score,
                    result.scores.token_set,
                    result.scores.token_sort,
                    result.scores.ratio
                );
                summary.matched += 1;
                let records = mark_completed(destination, &entry.id, settings);
                summary.applied.extend(records);
            }
            None => {
                info!("[NO MATCH] '{}'", title);
                summary.unmatched += 1;
                summary.unmatched_titles.push(title.clone());
            }
        }
        summary.matches.push(result);
    }

    summary.processed = evidence.len();
    summary
}

/// Files written by a successful run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub final_import_file: PathBuf,
    pub error_file: PathBuf,
    pub report_file: Option<PathBuf>,
    /// Strategy that supplied the snapshot, if one was merged
    pub strategy: Option<String>,
}

fn require<'a>(role: &'static str, path: Option<&'a Path>) -> Result<&'a Path> {
    match path {
        Some(p) if p.is_file() => Ok(p),
        other => Err(Error::MissingRequiredFile {
            role,
            path: other.map(Path::to_path_buf),
        }),
    }
}

/// Write each output in order.
///
/// When a write fails, outputs this call created are removed again so a
/// failed run leaves no new files behind.
fn write_outputs(outputs: &[(&Path, String)]) -> Result<()> {
    let mut created: Vec<&Path> = Vec::new();

    for (path, content) in outputs {
        let existed = path.exists();
        if let Err(e) = write_atomic(path, content.as_bytes()) {
            for written in &created {
                if let Err(remove_err) = fs::remove_file(written) {
                    warn!(
                        "Failed to remove partial output {}: {}",
                        written.display(),
                        remove_err
                    );
                }
            }
            return Err(e);
        }
        if !existed {
            created.push(*path);
        }
    }
    Ok(())
}

/// Run the import step described by `config`.
///
/// All required inputs are checked before anything is read or written. The
/// output document, the unmatched list and the optional report are written
/// at the end, final document first; a failed write leaves none of them.
pub fn run_import(config: &ImportConfig, timestamp: &str) -> Result<RunOutcome> {
    config.validate()?;

    let titles_file = require("titles file", config.input.titles_file.as_deref())?;
    let db_file = require("catalog file", Some(config.input.db_file.as_path()))?;
    let import_file = require("import file", Some(config.input.import_file.as_path()))?;

    let evidence = load_evidence(titles_file)?;
    let catalog = load_catalog(db_file)?;
    let mut destination = StateTree::load(import_file)?;
    info!(
        "Loaded {} title(s) and {} catalog entries",
        evidence.len(),
        catalog.len()
    );

    let resolution = if config.settings.merge_uploads {
        let resolver = SourceResolver::new(config.sources.strategies(timestamp));
        Some(resolver.resolve())
    } else {
        None
    };

    let mut seed_warning = None;
    let snapshot = match &resolution {
        None => Snapshot::Disabled,
        Some(Err(e)) => Snapshot::Unavailable {
            reason: e.to_string(),
        },
        Some(Ok(source)) => {
            if let Some(seed) = &source.seed {
                if let Err(e) = seed.apply(&source.document) {
                    warn!("Failed to write seed upload: {}", e);
                    seed_warning = Some(format!("seed upload not written: {e}"));
                }
            }
            Snapshot::Available {
                path: source.path.clone(),
                document: &source.document,
            }
        }
    };
    let strategy = match &resolution {
        Some(Ok(source)) => Some(source.strategy.to_string()),
        _ => None,
    };

    let settings = ReconcileSettings {
        threshold: config.settings.threshold,
        primary_bucket: config.settings.primary_bucket.clone(),
        checklist_primary: config.settings.checklist_primary.clone(),
    };
    let mut summary = reconcile(&catalog, &evidence, &mut destination, snapshot, &settings);
    summary.warnings.extend(seed_warning);

    // Everything is rendered before the first write
    let mut outputs = vec![
        (
            config.output.final_import_file.as_path(),
            destination.to_pretty_string()?,
        ),
        (
            config.output.error_file.as_path(),
            render_titles(&summary.unmatched_titles),
        ),
    ];
    if let Some(report_file) = &config.output.report_file {
        let files = RunFiles {
            titles_file: titles_file.to_path_buf(),
            db_file: db_file.to_path_buf(),
            import_file: import_file.to_path_buf(),
            final_import_file: config.output.final_import_file.clone(),
            error_file: config.output.error_file.clone(),
        };
        let report = RunReport::new(settings.threshold, strategy.clone(), files, summary.clone());
        outputs.push((report_file.as_path(), report.to_pretty_string()?));
    }
    write_outputs(&outputs)?;

    Ok(RunOutcome {
        summary,
        final_import_file: config.output.final_import_file.clone(),
        error_file: config.output.error_file.clone(),
        report_file: config.output.report_file.clone(),
        strategy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use serde_json::json;

    fn tree(value: serde_json::Value) -> StateTree {
        StateTree::from_value(value).unwrap()
    }

    fn catalog() -> Catalog {
        Catalog {
            entries: vec![
                CatalogEntry::new("1", "Slay the Dragon"),
                CatalogEntry::new("2", "Defeat the Boss"),
            ],
            skipped: 0,
        }
    }

    fn settings(threshold: u8) -> ReconcileSettings {
        ReconcileSettings {
            threshold,
            ..ReconcileSettings::default()
        }
    }

    #[test]
    fn test_match_creates_primary_bucket_entry() {
        let mut dest = StateTree::new();
        let evidence = vec!["slay dragon".to_string()];

        let summary = reconcile(&catalog(), &evidence, &mut dest, Snapshot::Disabled, &settings(80));

        assert_eq!(summary.matched, 1);
        assert_eq!(summary.matches[0].matched_id(), Some("1"));
        assert!(summary.matches[0].score >= 80.0);
        assert!(dest.is_true(&["achievement", "0", "1"]));
    }

    #[test]
    fn test_unmatched_title_recorded_without_mutation() {
        let mut dest = tree(json!({"achievement": {"0": {"1": false}}}));
        let before = dest.clone();
        let evidence = vec!["Completely Unrelated Text".to_string()];

        let summary = reconcile(&catalog(), &evidence, &mut dest, Snapshot::Disabled, &settings(90));

        assert_eq!(summary.unmatched, 1);
        assert_eq!(summary.unmatched_titles, vec!["Completely Unrelated Text"]);
        assert!(summary.applied.is_empty());
        assert_eq!(dest, before);
    }

    #[test]
    fn test_existing_buckets_are_used_before_primary() {
        let mut dest = tree(json!({"achievement": {"0": {}, "3": {"2": false}}}));
        let records = mark_completed(&mut dest, "2", &ReconcileSettings::default());

        assert_eq!(records.len(), 1);
        assert!(dest.is_true(&["achievement", "3", "2"]));
        assert!(dest.get(&["achievement", "0", "2"]).is_none());
    }

    #[test]
    fn test_checklist_primary_item_is_marked() {
        let mut dest = tree(json!({
            "achievement": {"0": {"2": false}},
            "achievement-checklist": {"2": {"0": false, "1": false}}
        }));
        let records = mark_completed(&mut dest, "2", &ReconcileSettings::default());

        assert_eq!(records.len(), 2);
        assert!(dest.is_true(&["achievement-checklist", "2", "0"]));
        assert_eq!(
            dest.get(&["achievement-checklist", "2", "1"]),
            Some(&serde_json::Value::Bool(false))
        );
    }

    #[test]
    fn test_marking_twice_changes_nothing() {
        let mut dest = StateTree::new();
        mark_completed(&mut dest, "1", &ReconcileSettings::default());
        assert!(mark_completed(&mut dest, "1", &ReconcileSettings::default()).is_empty());
    }

    #[test]
    fn test_duplicate_evidence_processed_independently() {
        let mut dest = StateTree::new();
        let evidence = vec!["Defeat the Boss".to_string(), "Defeat the Boss".to_string()];

        let summary = reconcile(&catalog(), &evidence, &mut dest, Snapshot::Disabled, &settings(90));

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.applied.len(), 1);
    }

    #[test]
    fn test_snapshot_merged_before_matching() {
        let mut dest = tree(json!({"achievement": {"0": {"5": false}}}));
        let snapshot = tree(json!({"achievement": {"0": {"5": true}}}));

        let summary = reconcile(
            &catalog(),
            &[],
            &mut dest,
            Snapshot::Available {
                path: PathBuf::from("uploads/latest.json"),
                document: &snapshot,
            },
            &settings(90),
        );

        assert_eq!(summary.merged_leaves(), 1);
        assert_eq!(summary.source, Some(PathBuf::from("uploads/latest.json")));
        assert!(dest.is_true(&["achievement", "0", "5"]));
    }

    #[test]
    fn test_unavailable_snapshot_is_a_warning() {
        let mut dest = StateTree::new();
        let summary = reconcile(
            &catalog(),
            &[],
            &mut dest,
            Snapshot::Unavailable {
                reason: "nothing found".to_string(),
            },
            &settings(90),
        );

        assert_eq!(summary.warnings.len(), 1);
        assert!(summary.source.is_none());
    }

    #[test]
    fn test_run_import_missing_titles_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ImportConfig::with_defaults("20250101_000000", None);
        config.output.final_import_file = dir.path().join("out.json");

        let result = run_import(&config, "20250101_000000");

        assert!(matches!(
            result,
            Err(Error::MissingRequiredFile { role: "titles file", path: None })
        ));
        assert!(!dir.path().join("out.json").exists());
    }
}
