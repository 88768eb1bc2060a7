//! Achievement catalog loading
//!
//! The catalog file maps category names to `{"achievements": [...]}` where each
//! element is either an `{id, name}` record or a list of such records (series
//! achievements are grouped one level deep). Both shapes are flattened into a
//! single ordered list of [`CatalogEntry`] values here.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::debug;

/// One known achievement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Identifier as a decimal string, the form used as a key in import files
    pub id: String,
    /// Display name as shown in game
    pub name: String,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Flattened catalog in traversal order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Usable entries, category by category
    pub entries: Vec<CatalogEntry>,
    /// Number of records skipped for lacking an id or a name
    pub skipped: usize,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load a catalog from a JSON file
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Catalog> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_catalog_str(&content, path)
}

/// Parse a catalog from a JSON string
pub fn parse_catalog_str(content: &str, origin: &Path) -> Result<Catalog> {
    let value: Value = serde_json::from_str(content).map_err(|e| Error::JsonParse {
        path: origin.to_path_buf(),
        source: e,
    })?;
    let categories = value.as_object().ok_or_else(|| Error::NotAnObject {
        path: origin.to_path_buf(),
    })?;
    Ok(flatten_categories(categories))
}

/// Flatten category objects into catalog entries
pub fn flatten_categories(categories: &Map<String, Value>) -> Catalog {
    let mut catalog = Catalog::default();

    for (category_name, category) in categories {
        let Some(records) = category.get("achievements").and_then(Value::as_array) else {
            debug!("Category '{}' has no achievement list", category_name);
            continue;
        };

        for record in records {
            match record {
                Value::Array(group) => {
                    for member in group {
                        push_record(&mut catalog, category_name, member);
                    }
                }
                other => push_record(&mut catalog, category_name, other),
            }
        }
    }

    catalog
}

fn push_record(catalog: &mut Catalog, category: &str, record: &Value) {
    match normalize_record(record) {
        Some(entry) => catalog.entries.push(entry),
        None => {
            debug!("Skipping malformed achievement record in '{}': {}", category, record);
            catalog.skipped += 1;
        }
    }
}

/// Read `{id, name}` out of a record, accepting numeric or string ids
fn normalize_record(record: &Value) -> Option<CatalogEntry> {
    let object = record.as_object()?;
    let id = match object.get("id")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return None,
    };
    let name = object.get("name")?.as_str()?;
    Some(CatalogEntry::new(id, name))
}
