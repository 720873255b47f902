use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::model::{CatalogEntry, ScrapedProduct};

/// Local timestamp in the format every persisted file uses.
pub fn now_iso() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreMetadata {
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub total_products: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    metadata: StoreMetadata,
    #[serde(default)]
    products: IndexMap<String, CatalogEntry>,
}

impl StoreFile {
    fn fresh() -> Self {
        let now = now_iso();
        Self {
            metadata: StoreMetadata {
                created_at: now.clone(),
                last_updated: now,
                total_products: 0,
            },
            products: IndexMap::new(),
        }
    }

    /// Fill in whatever metadata an adopted file lacks.
    fn repair(&mut self) {
        if self.metadata.created_at.is_empty() {
            self.metadata.created_at = now_iso();
        }
        if self.metadata.last_updated.is_empty() {
            self.metadata.last_updated = self.metadata.created_at.clone();
        }
        self.metadata.total_products = self.products.len();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub total_products: usize,
    pub created_at: String,
    pub last_updated: String,
}

/// On-disk snapshot of web-scraped product data with a rotating backup chain
/// (`<file>.backup1` newest ... `<file>.backupN` oldest).
///
/// Single writer only: nothing guards against two processes saving at once.
pub struct CatalogStore {
    path: PathBuf,
    backup_count: usize,
    data: StoreFile,
}

impl CatalogStore {
    /// Adopt the file at `path` if it parses, otherwise start empty. Never
    /// fails; a corrupt file is reported and replaced on the next save.
    pub fn load(path: impl Into<PathBuf>, backup_count: usize) -> Self {
        let path = path.into();
        let data = if path.exists() {
            match read_store(&path) {
                Ok(data) => {
                    info!("Loaded catalog store from {} ({} products)", path.display(), data.products.len());
                    data
                }
                Err(e) => {
                    error!(
                        "Catalog store {} is unreadable, starting fresh. Existing data will be replaced on next save: {:#}",
                        path.display(),
                        e
                    );
                    StoreFile::fresh()
                }
            }
        } else {
            info!("No catalog store at {}, starting fresh", path.display());
            StoreFile::fresh()
        };
        Self { path, backup_count, data }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn products(&self) -> &IndexMap<String, CatalogEntry> {
        &self.data.products
    }

    pub fn check_id_exists(&self, supplier_id: &str) -> Option<&CatalogEntry> {
        self.data.products.get(supplier_id)
    }

    /// Add a new entry stamped with `scraped_at`. Does not check for an
    /// existing entry; use [`Self::check_id_exists`] first.
    pub fn append_product(&mut self, supplier_id: &str, scraped: ScrapedProduct) {
        let entry = CatalogEntry {
            product_url: scraped.product_url,
            languages: scraped.languages,
            scraped_at: Some(now_iso()),
            ..Default::default()
        };
        self.data.products.insert(supplier_id.to_string(), entry);
        self.touch();
        debug!("Appended {} to catalog store", supplier_id);
    }

    /// Replace an entry. Both `scraped_at` and `updated_at` are set to now.
    pub fn update_product(&mut self, supplier_id: &str, scraped: ScrapedProduct) {
        let now = now_iso();
        let entry = CatalogEntry {
            product_url: scraped.product_url,
            languages: scraped.languages,
            scraped_at: Some(now.clone()),
            updated_at: Some(now),
            ..Default::default()
        };
        self.data.products.insert(supplier_id.to_string(), entry);
        self.touch();
        debug!("Updated {} in catalog store", supplier_id);
    }

    /// Append or update depending on whether the id is already stored.
    pub fn upsert_product(&mut self, supplier_id: &str, scraped: ScrapedProduct) {
        if self.check_id_exists(supplier_id).is_some() {
            self.update_product(supplier_id, scraped);
        } else {
            self.append_product(supplier_id, scraped);
        }
    }

    fn touch(&mut self) {
        self.data.metadata.total_products = self.data.products.len();
        self.data.metadata.last_updated = now_iso();
    }

    /// Rotate backups, then write the current snapshot.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        self.rotate_backups()?;
        let json = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write catalog store {}", self.path.display()))?;
        info!("Saved catalog store to {}", self.path.display());
        Ok(())
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".backup{}", n));
        PathBuf::from(name)
    }

    fn rotate_backups(&self) -> Result<()> {
        if self.backup_count == 0 || !self.path.exists() {
            return Ok(());
        }
        for i in (1..self.backup_count).rev() {
            let older = self.backup_path(i);
            if !older.exists() {
                continue;
            }
            let newer = self.backup_path(i + 1);
            if newer.exists() {
                std::fs::remove_file(&newer)?;
            }
            std::fs::rename(&older, &newer)
                .with_context(|| format!("Failed to rotate {}", older.display()))?;
        }
        std::fs::copy(&self.path, self.backup_path(1))
            .with_context(|| format!("Failed to back up {}", self.path.display()))?;
        Ok(())
    }

    pub fn statistics(&self) -> StoreStats {
        StoreStats {
            total_products: self.data.products.len(),
            created_at: self.data.metadata.created_at.clone(),
            last_updated: self.data.metadata.last_updated.clone(),
        }
    }
}

fn read_store(path: &Path) -> Result<StoreFile> {
    let text = std::fs::read_to_string(path)?;
    let mut data: StoreFile = serde_json::from_str(&text)?;
    data.repair();
    Ok(data)
}
