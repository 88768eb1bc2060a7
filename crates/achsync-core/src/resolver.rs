//! Snapshot source resolution
//!
//! A run may fold an externally supplied progress snapshot into its output.
//! Where that snapshot comes from is decided by an ordered list of
//! [`ResolutionStrategy`] values; the first strategy that yields a readable
//! document wins. Selection only reads the filesystem. Seeding a fresh
//! upload from the baseline is returned as a [`SeedPlan`] for the caller to
//! carry out.

use crate::error::{Error, Result};
use crate::tree::{write_atomic, StateTree};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File name of the rolling seed copy
pub const LATEST_SEED_FILE: &str = "latest.json";

/// One way of finding a snapshot, in the order they are usually tried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// An explicitly configured snapshot file
    UsePinnedFile { path: PathBuf },
    /// Newest partial export downloaded from the tracker
    PreferUserPartial { dirs: Vec<PathBuf> },
    /// Newest previously generated upload
    PreferMergedUploads { dirs: Vec<PathBuf> },
    /// Start a new upload series from the baseline document
    CreateFromBaseline {
        baseline: PathBuf,
        seed_dir: PathBuf,
        timestamp: String,
    },
    /// Use the baseline document itself
    FallbackToBaseline { baseline: PathBuf },
}

impl ResolutionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionStrategy::UsePinnedFile { .. } => "UsePinnedFile",
            ResolutionStrategy::PreferUserPartial { .. } => "PreferUserPartial",
            ResolutionStrategy::PreferMergedUploads { .. } => "PreferMergedUploads",
            ResolutionStrategy::CreateFromBaseline { .. } => "CreateFromBaseline",
            ResolutionStrategy::FallbackToBaseline { .. } => "FallbackToBaseline",
        }
    }

    /// Paths this strategy looks at
    fn locations(&self) -> Vec<PathBuf> {
        match self {
            ResolutionStrategy::UsePinnedFile { path } => vec![path.clone()],
            ResolutionStrategy::PreferUserPartial { dirs }
            | ResolutionStrategy::PreferMergedUploads { dirs } => dirs.clone(),
            ResolutionStrategy::CreateFromBaseline { baseline, .. }
            | ResolutionStrategy::FallbackToBaseline { baseline } => vec![baseline.clone()],
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Copies to write when a new upload series is started from the baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPlan {
    pub baseline: PathBuf,
    pub targets: Vec<PathBuf>,
}

impl SeedPlan {
    /// Write the seed copies of `document`
    pub fn apply(&self, document: &StateTree) -> Result<()> {
        let content = document.to_pretty_string()?;
        for target in &self.targets {
            write_atomic(target, content.as_bytes())?;
        }
        info!(
            "Created fresh upload from {} -> {}",
            self.baseline.display(),
            self.targets
                .last()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        );
        Ok(())
    }
}

/// The snapshot chosen for a run
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    /// Strategy that produced it
    pub strategy: &'static str,
    /// Path the snapshot is known by for this run
    pub path: PathBuf,
    /// Parsed snapshot
    pub document: StateTree,
    /// Files to write before the snapshot path exists on disk
    pub seed: Option<SeedPlan>,
}

/// A snapshot file found in one of the searched directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub modified: SystemTime,
    /// Index of the directory it was found in
    pub location: usize,
}

/// Whether a file looks like a snapshot document
fn is_snapshot_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Collect snapshot files from `dirs`, newest first.
///
/// Equal timestamps keep the order the directories were listed in, then
/// file name order. Missing directories are skipped.
pub fn collect_candidates<P: AsRef<Path>>(dirs: &[P]) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for (location, dir) in dirs.iter().enumerate() {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            debug!("Snapshot directory {} does not exist", dir.display());
            continue;
        }

        for entry in WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() || !is_snapshot_file(entry.path()) {
                continue;
            }
            let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
                debug!("No modification time for {}", entry.path().display());
                continue;
            };
            candidates.push(Candidate {
                path: entry.into_path(),
                modified,
                location,
            });
        }
    }

    candidates.sort_by(|a, b| match b.modified.cmp(&a.modified) {
        Ordering::Equal => a.location.cmp(&b.location).then_with(|| a.path.cmp(&b.path)),
        other => other,
    });
    candidates
}

/// Load the newest readable candidate; empty or broken files count as absent
fn newest_readable(candidates: &[Candidate]) -> Option<(PathBuf, StateTree)> {
    for candidate in candidates {
        match StateTree::load(&candidate.path) {
            Ok(document) => return Some((candidate.path.clone(), document)),
            Err(e) => warn!("Ignoring snapshot candidate: {}", e),
        }
    }
    None
}

/// Evaluates resolution strategies in priority order
#[derive(Debug, Clone, Default)]
pub struct SourceResolver {
    strategies: Vec<ResolutionStrategy>,
}

impl SourceResolver {
    pub fn new(strategies: Vec<ResolutionStrategy>) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &[ResolutionStrategy] {
        &self.strategies
    }

    /// Pick the snapshot for this run.
    ///
    /// Fails with [`Error::SourceUnavailable`] when no strategy applies. A
    /// baseline that exists but cannot be read is reported as its read error
    /// when nothing after it could have applied.
    pub fn resolve(&self) -> Result<ResolvedSource> {
        let mut searched = Vec::new();

        for (index, strategy) in self.strategies.iter().enumerate() {
            searched.extend(strategy.locations());
            let is_last = index + 1 == self.strategies.len();

            match self.try_strategy(strategy) {
                Ok(Some(resolved)) => {
                    info!(
                        "Using snapshot {} ({})",
                        resolved.path.display(),
                        resolved.strategy
                    );
                    return Ok(resolved);
                }
                Ok(None) => debug!("{} found nothing", strategy),
                Err(e) if is_last => return Err(e),
                Err(e) => warn!("{} failed: {}", strategy, e),
            }
        }

        Err(Error::SourceUnavailable { searched })
    }

    fn try_strategy(&self, strategy: &ResolutionStrategy) -> Result<Option<ResolvedSource>> {
        let name = strategy.name();
        match strategy {
            ResolutionStrategy::UsePinnedFile { path } => {
                if !path.is_file() {
                    return Ok(None);
                }
                match StateTree::load(path) {
                    Ok(document) => Ok(Some(ResolvedSource {
                        strategy: name,
                        path: path.clone(),
                        document,
                        seed: None,
                    })),
                    Err(e) => {
                        warn!("Ignoring pinned snapshot: {}", e);
                        Ok(None)
                    }
                }
            }
            ResolutionStrategy::PreferUserPartial { dirs }
            | ResolutionStrategy::PreferMergedUploads { dirs } => {
                let candidates = collect_candidates(dirs);
                Ok(newest_readable(&candidates).map(|(path, document)| ResolvedSource {
                    strategy: name,
                    path,
                    document,
                    seed: None,
                }))
            }
            ResolutionStrategy::CreateFromBaseline {
                baseline,
                seed_dir,
                timestamp,
            } => {
                if !baseline.is_file() {
                    return Ok(None);
                }
                let document = StateTree::load(baseline)?;
                let latest = seed_dir.join(LATEST_SEED_FILE);
                Ok(Some(ResolvedSource {
                    strategy: name,
                    path: latest.clone(),
                    document,
                    seed: Some(SeedPlan {
                        baseline: baseline.clone(),
                        targets: vec![
                            seed_dir.join(format!("initial_upload_{timestamp}.json")),
                            latest,
                        ],
                    }),
                }))
            }
            ResolutionStrategy::FallbackToBaseline { baseline } => {
                if !baseline.is_file() {
                    return Ok(None);
                }
                let document = StateTree::load(baseline)?;
                Ok(Some(ResolvedSource {
                    strategy: name,
                    path: baseline.clone(),
                    document,
                    seed: None,
                }))
            }
        }
    }
}
