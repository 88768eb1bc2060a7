//! Completion-state documents
//!
//! A tracker import file is a JSON object whose interior nodes are string-keyed
//! maps and whose interesting leaves are booleans. Key order is preserved so a
//! document survives a load/save cycle unchanged, and leaves that are not
//! booleans (counters, strings, arrays) are carried along untouched.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;

/// Top-level key of the primary achievement buckets
pub const ACHIEVEMENT_KEY: &str = "achievement";

/// Top-level key of the per-achievement checklists
pub const CHECKLIST_KEY: &str = "achievement-checklist";

/// Ordered key segments from the document root to a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatePath(Vec<String>);

impl StatePath {
    /// Build a path from its segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Path of an achievement inside a primary bucket
    pub fn achievement(bucket: &str, id: &str) -> Self {
        Self::new([ACHIEVEMENT_KEY, bucket, id])
    }

    /// Path of a checklist sub-item for an achievement
    pub fn checklist_item(id: &str, sub_item: &str) -> Self {
        Self::new([CHECKLIST_KEY, id, sub_item])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("->"))
    }
}

/// What happened when a leaf was asked to become `true`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The leaf was already `true`
    AlreadyTrue,
    /// The leaf did not exist and was created
    Created,
    /// The leaf existed with a non-`true` value and was overwritten
    Updated,
    /// The path runs through (or ends at) a node that cannot hold the leaf
    Blocked,
}

impl SetOutcome {
    /// Whether the document was changed
    pub fn changed(self) -> bool {
        matches!(self, SetOutcome::Created | SetOutcome::Updated)
    }
}

/// A completion-state document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateTree {
    root: Map<String, Value>,
}

impl StateTree {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(root) => Some(Self { root }),
            _ => None,
        }
    }

    /// Parse a document from a JSON string
    pub fn parse_str(content: &str, origin: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Err(Error::EmptyDocument {
                path: origin.to_path_buf(),
            });
        }
        let value: Value = serde_json::from_str(content).map_err(|e| Error::JsonParse {
            path: origin.to_path_buf(),
            source: e,
        })?;
        Self::from_value(value).ok_or_else(|| Error::NotAnObject {
            path: origin.to_path_buf(),
        })
    }

    /// Load a document from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse_str(&content, path)
    }

    /// Serialize with four-space indentation, leaving non-ASCII text as is
    pub fn to_pretty_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.root.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Write the document, replacing any previous file in one step
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_pretty_string()?;
        write_atomic(path.as_ref(), content.as_bytes())
    }

    /// The root map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    /// Look up the node at `path`
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (last, parents) = path.split_last()?;
        let mut node = &self.root;
        for key in parents {
            node = node.get(key.as_ref())?.as_object()?;
        }
        node.get(last.as_ref())
    }

    /// Whether the leaf at `path` is exactly `true`
    pub fn is_true<S: AsRef<str>>(&self, path: &[S]) -> bool {
        matches!(self.get(path), Some(Value::Bool(true)))
    }

    /// Set the leaf at `path` to `true`, creating intermediate maps as needed.
    ///
    /// Never lowers a value: a `true` leaf is left alone, and a path that would
    /// replace a map or pass through a leaf is refused with
    /// [`SetOutcome::Blocked`] without touching the document.
    pub fn set_true<S: AsRef<str>>(&mut self, path: &[S]) -> SetOutcome {
        let Some((last, parents)) = path.split_last() else {
            return SetOutcome::Blocked;
        };
        if self.is_blocked(parents) {
            return SetOutcome::Blocked;
        }

        let mut node = &mut self.root;
        for key in parents {
            let child = node
                .entry(key.as_ref())
                .or_insert_with(|| Value::Object(Map::new()));
            node = match child {
                Value::Object(map) => map,
                _ => return SetOutcome::Blocked,
            };
        }

        match node.get_mut(last.as_ref()) {
            Some(Value::Bool(true)) => SetOutcome::AlreadyTrue,
            Some(Value::Object(_)) => SetOutcome::Blocked,
            Some(value) => {
                *value = Value::Bool(true);
                SetOutcome::Updated
            }
            None => {
                node.insert(last.as_ref().to_string(), Value::Bool(true));
                SetOutcome::Created
            }
        }
    }

    /// True when an existing non-map node sits on the way to a leaf
    fn is_blocked<S: AsRef<str>>(&self, parents: &[S]) -> bool {
        let mut node = &self.root;
        for key in parents {
            match node.get(key.as_ref()) {
                None => return false,
                Some(Value::Object(map)) => node = map,
                Some(_) => return true,
            }
        }
        false
    }

    /// Every leaf in depth-first, key order
    pub fn leaves(&self) -> Vec<(StatePath, &Value)> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        collect_leaves(&self.root, &mut prefix, &mut out);
        out
    }

    /// Paths of every leaf holding `true`
    pub fn true_leaves(&self) -> Vec<StatePath> {
        self.leaves()
            .into_iter()
            .filter(|(_, value)| matches!(value, Value::Bool(true)))
            .map(|(path, _)| path)
            .collect()
    }

    /// Primary buckets that already list the achievement `id`
    pub fn buckets_listing(&self, id: &str) -> Vec<String> {
        self.root
            .get(ACHIEVEMENT_KEY)
            .and_then(Value::as_object)
            .map(|buckets| {
                buckets
                    .iter()
                    .filter(|(_, bucket)| bucket.as_object().is_some_and(|b| b.contains_key(id)))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the achievement `id` has a checklist sub-structure
    pub fn has_checklist(&self, id: &str) -> bool {
        self.get(&[CHECKLIST_KEY, id])
            .is_some_and(Value::is_object)
    }
}

fn collect_leaves<'a>(
    map: &'a Map<String, Value>,
    prefix: &mut Vec<String>,
    out: &mut Vec<(StatePath, &'a Value)>,
) {
    for (key, value) in map {
        prefix.push(key.clone());
        match value {
            Value::Object(child) => collect_leaves(child, prefix, out),
            _ => out.push((StatePath(prefix.clone()), value)),
        }
        prefix.pop();
    }
}

/// Write `content` next to `path` and rename it into place
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::FileWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    fs::write(tmp_path, content).map_err(|e| Error::FileWrite {
        path: tmp_path.to_path_buf(),
        source: e,
    })?;
    fs::rename(tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(tmp_path);
        Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        }
    })
}
