use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::error::InputError;
use crate::xml::ids;

/// Load product identifiers from an `.xml` catalog feed or a `.json` array
/// of strings. The result is trimmed, free of empties and de-duplicated in
/// first-seen order.
pub fn load_supplier_ids(path: &Path, tolerant: bool) -> Result<Vec<String>, InputError> {
    if !path.exists() {
        return Err(InputError::Missing(path.to_path_buf()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let found = match ext.as_str() {
        "xml" => {
            info!("Detected XML input, extracting identifiers");
            clean(ids::extract_ids(path, tolerant))
        }
        "json" => {
            info!("Detected JSON input, loading identifiers");
            load_json(path)?
        }
        _ => {
            return Err(InputError::UnsupportedFormat {
                path: path.to_path_buf(),
                ext: format!(".{}", ext),
            })
        }
    };

    info!("Loaded {} identifiers from {}", found.len(), path.display());
    Ok(found)
}

fn load_json(path: &Path) -> Result<Vec<String>, InputError> {
    let text = std::fs::read_to_string(path).map_err(|source| InputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|source| InputError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })?;

    let Value::Array(items) = value else {
        return Err(InputError::NotAnArray { path: path.to_path_buf() });
    };

    let mut raw = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match item {
            Value::String(s) => raw.push(s),
            _ => {
                return Err(InputError::NonStringElement {
                    path: path.to_path_buf(),
                    index,
                })
            }
        }
    }

    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return Err(InputError::NoUsableEntries { path: path.to_path_buf() });
    }
    Ok(cleaned)
}

fn clean(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}
