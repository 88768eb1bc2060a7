//! Error types for achsync-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in achsync-core
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a JSON document
    #[error("failed to parse JSON '{path}': {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A required run input is absent or was never configured
    #[error("required {role} not found: {}", display_optional(.path))]
    MissingRequiredFile {
        role: &'static str,
        path: Option<PathBuf>,
    },

    /// Merging was requested but no snapshot strategy produced a document
    #[error("no snapshot source available (searched {} location(s))", .searched.len())]
    SourceUnavailable { searched: Vec<PathBuf> },

    /// A completion-state document whose root is not a JSON object
    #[error("document '{path}' is not a JSON object")]
    NotAnObject { path: PathBuf },

    /// An empty document where content was required
    #[error("document '{path}' is empty")]
    EmptyDocument { path: PathBuf },

    /// Configuration values that cannot be used
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to parse a TOML config file
    #[error("failed to parse config '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Failed to serialize a config file
    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Directory traversal error
    #[error("failed to traverse directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn display_optional(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!("'{}'", p.display()),
        None => "<not configured>".to_string(),
    }
}
