//! achsync CLI
//!
//! Command-line tool for turning OCR'd achievement titles into a tracker
//! import file.

use achsync_core::config::STEP_NAME;
use achsync_core::evidence::{ALL_TITLES_FILE, DEFAULT_MARKER};
use achsync_core::matcher::DEFAULT_THRESHOLD;
use achsync_core::{
    collect_ocr_titles, load_catalog, load_evidence, merge_state, run_import, run_timestamp,
    write_titles, Error, FuzzyMatcher, ImportConfig, MainConfig, SourceResolver, StateTree,
};
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "achsync")]
#[command(about = "Achievement screen capture to tracker import", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the main and import step configs if they are missing
    Init {
        /// Path to the main config
        #[arg(long, default_value = achsync_core::config::MAIN_CONFIG_PATH)]
        main_config: PathBuf,
    },

    /// Generate the final import file from the configured inputs
    Run {
        /// Path to the main config
        #[arg(long, default_value = achsync_core::config::MAIN_CONFIG_PATH)]
        main_config: PathBuf,

        /// Override the match threshold (0-100)
        #[arg(short, long)]
        threshold: Option<u8>,

        /// Do not fold an uploaded snapshot into the output
        #[arg(long)]
        no_merge: bool,

        /// Only print warnings and the summary
        #[arg(short, long)]
        quiet: bool,

        /// Write a JSON report of the run
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Score titles against a catalog without touching any state
    Match {
        /// Achievement catalog (JSON)
        #[arg(short, long)]
        catalog: PathBuf,

        /// File with one title per line
        #[arg(short = 'f', long)]
        titles_file: Option<PathBuf>,

        /// Titles to match
        #[arg(long)]
        title: Vec<String>,

        /// Minimum score for a match (0-100)
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: u8,
    },

    /// Merge `true` leaves of one state file into another
    Merge {
        /// State file to take completions from
        #[arg(short, long)]
        source: PathBuf,

        /// State file to merge into
        #[arg(short, long)]
        destination: PathBuf,

        /// Write the result here instead of over the destination
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show which snapshot a run would merge
    Resolve {
        /// Path to the main config
        #[arg(long, default_value = achsync_core::config::MAIN_CONFIG_PATH)]
        main_config: PathBuf,
    },

    /// Extract titles from OCR raw text dumps
    Titles {
        /// Directory holding `*_raw.txt` dumps
        #[arg(short, long)]
        dir: PathBuf,

        /// Line that follows every completed title
        #[arg(short, long, default_value = DEFAULT_MARKER)]
        marker: String,

        /// Output file (defaults to all_titles.txt inside the directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> achsync_core::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { main_config } => cmd_init(&main_config),
        Commands::Run {
            main_config,
            threshold,
            no_merge,
            quiet,
            report,
        } => cmd_run(&main_config, threshold, no_merge, quiet, report),
        Commands::Match {
            catalog,
            titles_file,
            title,
            threshold,
        } => cmd_match(&catalog, titles_file.as_deref(), title, threshold),
        Commands::Merge {
            source,
            destination,
            output,
            dry_run,
        } => cmd_merge(&source, &destination, output.as_deref(), dry_run),
        Commands::Resolve { main_config } => cmd_resolve(&main_config),
        Commands::Titles { dir, marker, output } => cmd_titles(&dir, &marker, output),
    }
}

/// Console-only logging for the inspection commands
fn init_console_logging() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_filter(console_filter("warn")))
        .init();
}

/// `RUST_LOG` if set, otherwise `level`
fn console_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Log to `<log_dir>/import_generator_<timestamp>.log` and to the console.
///
/// The file always gets `info`; the console gets `info` when verbose and
/// `warn` otherwise, unless `RUST_LOG` says different.
fn init_run_logging(log_dir: &Path, verbose: bool, timestamp: &str) -> achsync_core::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(format!("{STEP_NAME}_{timestamp}.log"));
    let file = File::create(&log_path).map_err(|e| Error::FileWrite {
        path: log_path.clone(),
        source: e,
    })?;

    let console_level = if verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .with_filter(LevelFilter::INFO),
        )
        .with(fmt::layer().with_target(false).with_filter(console_filter(console_level)))
        .init();

    Ok(log_path)
}

fn cmd_init(main_config_path: &Path) -> achsync_core::Result<()> {
    init_console_logging();

    let existed = main_config_path.exists();
    let main = MainConfig::load_or_create(main_config_path)?;
    if existed {
        println!("[Info] Main config found at: {}", main_config_path.display());
    } else {
        println!("[Init] Created default main config at: {}", main_config_path.display());
    }

    let step_path = &main.steps.import_generator;
    let existed = step_path.exists();
    let config = ImportConfig::load_or_create(&main, &run_timestamp())?;
    if existed {
        println!("[Info] Import config found at: {}", step_path.display());
    } else {
        println!("Default config created at: {}", step_path.display());
    }

    match &config.input.titles_file {
        Some(path) => println!("Titles file: {}", path.display()),
        None => println!("Titles file: not set (run the OCR step or set input.titles_file)"),
    }
    Ok(())
}

fn cmd_run(
    main_config_path: &Path,
    threshold: Option<u8>,
    no_merge: bool,
    quiet: bool,
    report: Option<PathBuf>,
) -> achsync_core::Result<()> {
    let timestamp = run_timestamp();

    // The log file location comes from the config, so loading it logs to
    // the console only
    let mut config = load_run_config(
        main_config_path,
        &timestamp,
        console_filter(if quiet { "warn" } else { "info" }),
        std::io::stdout,
    )?;

    if let Some(threshold) = threshold {
        config.settings.threshold = threshold;
    }
    if no_merge {
        config.settings.merge_uploads = false;
    }
    if quiet {
        config.settings.verbose = false;
    }
    if report.is_some() {
        config.output.report_file = report;
    }

    let log_path = init_run_logging(&config.settings.log_dir, config.settings.verbose, &timestamp)?;
    tracing::info!("Log file: {}", log_path.display());

    let outcome = run_import(&config, &timestamp)
        .inspect_err(|e| tracing::error!("[Fatal Error] {}", e))?;
    let summary = &outcome.summary;

    println!();
    println!("=== DONE ===");
    println!("Total Titles: {}", summary.processed);
    println!("Matched: {}", summary.matched);
    println!("Unmatched: {}", summary.unmatched);
    if let Some(strategy) = &outcome.strategy {
        println!(
            "Snapshot ({}): {}, {} entries updated",
            strategy,
            display_optional(summary.source.as_deref()),
            summary.merged_leaves()
        );
    }
    for warning in &summary.warnings {
        println!("Warning: {}", warning);
    }
    println!("Errors written to: {}", outcome.error_file.display());
    println!("Final import file saved at: {}", outcome.final_import_file.display());
    if let Some(report_file) = &outcome.report_file {
        println!("Report written to: {}", report_file.display());
    }

    Ok(())
}

/// Load the main and import configs, logging to `writer` while doing so
fn load_run_config<W>(
    main_config_path: &Path,
    timestamp: &str,
    filter: EnvFilter,
    writer: W,
) -> achsync_core::Result<ImportConfig>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        MainConfig::load_or_create(main_config_path)
            .and_then(|main| ImportConfig::load_or_create(&main, timestamp))
            .inspect_err(|e| tracing::error!("[Fatal Error] {}", e))
    })
}

fn cmd_match(
    catalog_path: &Path,
    titles_file: Option<&Path>,
    mut titles: Vec<String>,
    threshold: u8,
) -> achsync_core::Result<()> {
    init_console_logging();

    if let Some(path) = titles_file {
        titles.extend(load_evidence(path)?);
    }
    if titles.is_empty() {
        return Err(Error::InvalidConfig(
            "no titles given; use --title or --titles-file".to_string(),
        ));
    }

    let catalog = load_catalog(catalog_path)?;
    println!(
        "Catalog: {} entries ({} skipped)",
        catalog.len(),
        catalog.skipped
    );
    println!();

    let matcher = FuzzyMatcher::new(&catalog.entries, threshold);
    let mut matched = 0;

    for title in &titles {
        let result = matcher.match_title(title);
        let s = &result.scores;
        match &result.matched {
            Some(entry) => {
                matched += 1;
                println!(
                    "[MATCH] '{}' → '{}' (ID: {}) Score: {:.1} | set_ratio={:.1} sort_ratio={:.1} ratio={:.1}",
                    title, entry.name, entry.id, result.score, s.token_set, s.token_sort, s.ratio
                );
            }
            None => println!("[NO MATCH] '{}' (best score {:.1})", title, result.score),
        }
    }

    println!();
    println!("Matched {} of {} at threshold {}", matched, titles.len(), matcher.threshold());
    Ok(())
}

fn cmd_merge(
    source_path: &Path,
    destination_path: &Path,
    output: Option<&Path>,
    dry_run: bool,
) -> achsync_core::Result<()> {
    init_console_logging();

    let source = StateTree::load(source_path)?;
    let mut destination = StateTree::load(destination_path)?;
    let outcome = merge_state(&mut destination, &source);

    for record in &outcome.records {
        println!("{}", record);
    }
    for path in &outcome.blocked {
        println!("Skipped {}: destination holds a conflicting node", path);
    }

    if outcome.records.is_empty() {
        println!("[Merged] No updates were made.");
        return Ok(());
    }
    println!("[Merged] Total updated entries: {}", outcome.changed());

    if dry_run {
        println!("Dry run: nothing written");
        return Ok(());
    }

    let target = output.unwrap_or(destination_path);
    destination.save(target)?;
    println!("Saved merged state to {}", target.display());
    Ok(())
}

fn cmd_resolve(main_config_path: &Path) -> achsync_core::Result<()> {
    init_console_logging();

    let timestamp = run_timestamp();
    let main = MainConfig::load(main_config_path)?;
    let config = ImportConfig::load(&main.steps.import_generator)?;
    let resolver = SourceResolver::new(config.sources.strategies(&timestamp));

    println!("Strategies (in order):");
    for (i, strategy) in resolver.strategies().iter().enumerate() {
        println!("  {}. {}", i + 1, strategy);
    }
    println!();

    match resolver.resolve() {
        Ok(source) => {
            println!("Selected: {} ({})", source.path.display(), source.strategy);
            if let Some(seed) = &source.seed {
                println!("A run would first write:");
                for target in &seed.targets {
                    println!("  {}", target.display());
                }
            }
            if !config.settings.merge_uploads {
                println!("Note: settings.merge_uploads is off, runs skip this snapshot");
            }
            Ok(())
        }
        Err(Error::SourceUnavailable { searched }) => {
            println!("No snapshot available. Searched:");
            for path in &searched {
                println!("  {}", path.display());
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn cmd_titles(dir: &Path, marker: &str, output: Option<PathBuf>) -> achsync_core::Result<()> {
    init_console_logging();

    let collection = collect_ocr_titles(dir, marker)?;
    for (source, titles) in collection.sources.iter().zip(&collection.per_source) {
        println!("{}: {} title(s)", source.display(), titles.len());
    }

    let output = output.unwrap_or_else(|| dir.join(ALL_TITLES_FILE));
    write_titles(&output, &collection.combined)?;

    println!();
    println!(
        "Found {} title(s), {} unique",
        collection.total_found(),
        collection.combined.len()
    );
    println!("Titles written to: {}", output.display());
    Ok(())
}

fn display_optional(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use achsync_core::config::StepPaths;
    use std::io::{self, Write};
    use std::sync::Arc;

    /// Log writer that keeps everything in memory
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn main_config_in(dir: &Path) -> PathBuf {
        let path = dir.join("main_config.toml");
        MainConfig {
            steps: StepPaths {
                frame_extraction: dir.join("frame_extraction.toml"),
                ocr_extraction: dir.join("ocr_extraction.toml"),
                import_generator: dir.join("import_generator.toml"),
            },
        }
        .save(&path)
        .unwrap();
        path
    }

    #[test]
    fn test_config_creation_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let main_config = main_config_in(dir.path());
        let sink = Captured::default();
        let writer = sink.clone();

        let config = load_run_config(
            &main_config,
            "20250101_120000",
            EnvFilter::new("info"),
            move || writer.clone(),
        )
        .unwrap();

        assert!(config.input.titles_file.is_none());
        assert!(dir.path().join("import_generator.toml").exists());
        let logged = sink.text();
        assert!(logged.contains("Step config not found"));
        assert!(logged.contains("OCR config has no titles file yet"));
    }

    #[test]
    fn test_config_failure_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let main_config = dir.path().join("main_config.toml");
        fs::write(&main_config, "steps = [").unwrap();
        let sink = Captured::default();
        let writer = sink.clone();

        let result = load_run_config(
            &main_config,
            "20250101_120000",
            EnvFilter::new("info"),
            move || writer.clone(),
        );

        assert!(matches!(result, Err(Error::ConfigParse { .. })));
        assert!(sink.text().contains("[Fatal Error]"));
    }
}
