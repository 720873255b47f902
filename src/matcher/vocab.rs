use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::MARKER;
use crate::store::now_iso;

static SEPARATORS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-\s]+").unwrap());

/// Name as compared against the vocabulary: no marker, lower-case, hyphens
/// and whitespace removed. `Akku` and `Akku-Kompatibilität` stay distinct.
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_prefix(MARKER).unwrap_or(name);
    SEPARATORS_RE.replace_all(&name.trim().to_lowercase(), "").into_owned()
}

/// One row of the controlled vocabulary: a feature name and example value
/// per language.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VocabRow {
    #[serde(default)]
    pub fname_de: String,
    #[serde(default)]
    pub fvalue_de: String,
    #[serde(default)]
    pub fname_fr: String,
    #[serde(default)]
    pub fvalue_fr: String,
    #[serde(default)]
    pub fname_it: String,
    #[serde(default)]
    pub fvalue_it: String,
}

/// The curated feature-name list the matcher checks membership against.
#[derive(Debug, Default)]
pub struct ControlledVocabulary {
    rows: Vec<VocabRow>,
    names: HashSet<String>,
}

impl ControlledVocabulary {
    pub fn from_rows(rows: Vec<VocabRow>) -> Self {
        let names = rows
            .iter()
            .map(|r| normalize_name(&r.fname_de))
            .filter(|n| !n.is_empty())
            .collect();
        Self { rows, names }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open vocabulary {}", path.display()))?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<VocabRow>, _>>()
            .with_context(|| format!("Malformed vocabulary {}", path.display()))?;
        info!("Loaded {} vocabulary features from {}", rows.len(), path.display());
        Ok(Self::from_rows(rows))
    }

    pub fn rows(&self) -> &[VocabRow] {
        &self.rows
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = normalize_name(name);
        !key.is_empty() && self.names.contains(&key)
    }
}

pub fn write_vocabulary(path: &Path, rows: &[VocabRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredFeature {
    pub fname_de: String,
    #[serde(default)]
    pub fvalue_de: String,
    #[serde(default)]
    pub fname_fr: String,
    #[serde(default)]
    pub fvalue_fr: String,
    #[serde(default)]
    pub fname_it: String,
    #[serde(default)]
    pub fvalue_it: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub first_seen_pid: String,
    #[serde(default)]
    pub occurrences: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveredMetadata {
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub confidence_threshold: f64,
    #[serde(default)]
    pub total_features: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DiscoveredFile {
    #[serde(default)]
    metadata: DiscoveredMetadata,
    #[serde(default)]
    features: Vec<DiscoveredFeature>,
}

/// Append-only log of feature names the AI proposed on its own. Every
/// change is written through to disk.
pub struct DiscoveredVocabulary {
    path: PathBuf,
    data: DiscoveredFile,
}

impl DiscoveredVocabulary {
    /// Load the log, creating an empty one on disk when absent.
    pub fn load_or_create(path: &Path, confidence_threshold: f64) -> Result<Self> {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            let data: DiscoveredFile = serde_json::from_str(&text)
                .with_context(|| format!("Malformed discovered vocabulary {}", path.display()))?;
            info!("Loaded {} discovered features from {}", data.features.len(), path.display());
            return Ok(Self { path: path.to_path_buf(), data });
        }

        let vocab = Self {
            path: path.to_path_buf(),
            data: DiscoveredFile {
                metadata: DiscoveredMetadata {
                    created_at: now_iso(),
                    last_updated: None,
                    confidence_threshold,
                    total_features: 0,
                },
                features: Vec::new(),
            },
        };
        vocab.save()?;
        info!("Initialized discovered vocabulary at {}", path.display());
        Ok(vocab)
    }

    pub fn features(&self) -> &[DiscoveredFeature] {
        &self.data.features
    }

    /// Count another sighting of `fname`, or start a new entry, then save.
    pub fn record(&mut self, fname: &str, fvalue: &str, confidence: f64, supplier_id: &str) -> Result<()> {
        let key = normalize_name(fname);
        match self.data.features.iter_mut().find(|f| normalize_name(&f.fname_de) == key) {
            Some(existing) => {
                existing.occurrences += 1;
                debug!("Discovered feature '{}' seen {} times", existing.fname_de, existing.occurrences);
            }
            None => {
                let clean = fname.trim();
                let clean = clean.strip_prefix(MARKER).unwrap_or(clean).trim();
                self.data.features.push(DiscoveredFeature {
                    fname_de: clean.to_string(),
                    fvalue_de: fvalue.to_string(),
                    fname_fr: String::new(),
                    fvalue_fr: String::new(),
                    fname_it: String::new(),
                    fvalue_it: String::new(),
                    confidence,
                    first_seen_pid: supplier_id.to_string(),
                    occurrences: 1,
                });
                info!("New AI-discovered feature '{}' from {}", clean, supplier_id);
            }
        }
        self.save()
    }

    fn save(&self) -> Result<()> {
        let mut data = self.data.clone();
        data.metadata.last_updated = Some(now_iso());
        data.metadata.total_features = data.features.len();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&data)?)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}
