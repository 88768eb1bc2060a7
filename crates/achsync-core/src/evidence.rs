//! Evidence titles: loading, and extraction from OCR text dumps
//!
//! The OCR engine writes one `<frame>_raw.txt` per captured frame with every
//! detected text line. On an achievement screen a finished entry shows its
//! title directly above a "Completed" label, so the line before each marker
//! is taken as a title.

use crate::error::{Error, Result};
use crate::tree::write_atomic;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Label that follows a completed achievement's title
pub const DEFAULT_MARKER: &str = "Completed";

/// Suffix of the per-frame OCR dumps
pub const RAW_TEXT_SUFFIX: &str = "_raw.txt";

/// File name of the combined title list
pub const ALL_TITLES_FILE: &str = "all_titles.txt";

/// Split text into trimmed, non-empty lines
pub fn parse_evidence(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load evidence titles, one per non-empty line
pub fn load_evidence<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(parse_evidence(&content))
}

/// Titles one per line, each newline-terminated
pub fn render_titles(titles: &[String]) -> String {
    let mut content = String::new();
    for title in titles {
        content.push_str(title);
        content.push('\n');
    }
    content
}

/// Write titles one per line
pub fn write_titles<P: AsRef<Path>>(path: P, titles: &[String]) -> Result<()> {
    write_atomic(path.as_ref(), render_titles(titles).as_bytes())
}

/// Titles found in one block of OCR lines
pub fn extract_titles<S: AsRef<str>>(lines: &[S], marker: &str) -> Vec<String> {
    let lines: Vec<&str> = lines
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| !l.is_empty())
        .collect();

    lines
        .windows(2)
        .filter(|pair| pair[1] == marker)
        .map(|pair| pair[0].to_string())
        .collect()
}

/// Titles gathered from a directory of OCR dumps
#[derive(Debug, Clone, Default)]
pub struct TitleCollection {
    /// Dumps that were read, in processing order
    pub sources: Vec<PathBuf>,
    /// Titles per dump, parallel to `sources`
    pub per_source: Vec<Vec<String>>,
    /// All titles in first-seen order, without duplicates
    pub combined: Vec<String>,
}

impl TitleCollection {
    /// Total titles found before de-duplication
    pub fn total_found(&self) -> usize {
        self.per_source.iter().map(Vec::len).sum()
    }
}

/// Read every `*_raw.txt` in `dir` (by file name) and collect titles
pub fn collect_ocr_titles<P: AsRef<Path>>(dir: P, marker: &str) -> Result<TitleCollection> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::MissingRequiredFile {
            role: "OCR output folder",
            path: Some(dir.to_path_buf()),
        });
    }

    let mut dumps = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let is_dump = entry.file_type().is_file()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(RAW_TEXT_SUFFIX));
        if is_dump {
            dumps.push(entry.into_path());
        }
    }

    let mut collection = TitleCollection::default();
    let mut seen = HashSet::new();

    for dump in dumps {
        let content = fs::read_to_string(&dump).map_err(|e| Error::FileRead {
            path: dump.clone(),
            source: e,
        })?;
        let lines = parse_evidence(&content);
        let titles = extract_titles(&lines, marker);
        debug!("{}: {} title(s)", dump.display(), titles.len());

        for title in &titles {
            if seen.insert(title.clone()) {
                collection.combined.push(title.clone());
            }
        }
        collection.sources.push(dump);
        collection.per_source.push(titles);
    }

    info!(
        "Collected {} unique title(s) from {} OCR dump(s)",
        collection.combined.len(),
        collection.sources.len()
    );
    Ok(collection)
}
