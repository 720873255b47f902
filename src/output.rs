use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::compare::ProductComparison;
use crate::config::{ensure_dir, file_stem};
use crate::model::{ComparisonRow, Lang};
use crate::store::now_iso;

pub const COLUMNS: [&str; 8] = [
    "original_fname",
    "original_fvalue",
    "dabag_fname",
    "dabag_fvalue",
    "web_fname",
    "web_fvalue",
    "ai_fname",
    "ai_fvalue",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    pub original_funit: Option<String>,
    pub dabag_funit: Option<String>,
}

/// The document written for one product and language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonTable {
    pub supplier_id: String,
    pub lang: Lang,
    pub product_url: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<ComparisonRow>,
    pub units: Vec<UnitInfo>,
}

impl ComparisonTable {
    pub fn new(supplier_id: &str, lang: Lang, product_url: Option<String>, rows: Vec<ComparisonRow>) -> Self {
        let units = rows
            .iter()
            .filter(|r| r.original_funit.is_some() || r.dabag_funit.is_some())
            .map(|r| UnitInfo {
                name: r.name().to_string(),
                original_funit: r.original_funit.clone(),
                dabag_funit: r.dabag_funit.clone(),
            })
            .collect();
        Self {
            supplier_id: supplier_id.to_string(),
            lang,
            product_url,
            columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
            units,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.json", file_stem(&self.supplier_id), self.lang)
    }
}

/// One table per product and language, in product then language order.
pub fn tables(merged: &[ProductComparison]) -> Vec<ComparisonTable> {
    merged
        .iter()
        .flat_map(|p| {
            p.languages
                .iter()
                .map(|(lang, rows)| ComparisonTable::new(&p.supplier_id, *lang, p.product_url.clone(), rows.clone()))
        })
        .collect()
}

pub fn save_table(dir: &Path, table: &ComparisonTable) -> Result<PathBuf> {
    ensure_dir(dir)?;
    let path = dir.join(table.file_name());
    std::fs::write(&path, serde_json::to_string_pretty(table)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MasterMetadata {
    pub created_at: String,
    pub total_products: usize,
    pub total_tables: usize,
}

/// Every table grouped by product and language.
#[derive(Debug, Serialize, Deserialize)]
pub struct MasterCatalog {
    pub metadata: MasterMetadata,
    pub products: IndexMap<String, IndexMap<Lang, ComparisonTable>>,
}

impl MasterCatalog {
    pub fn from_tables(tables: &[ComparisonTable]) -> Self {
        let mut products: IndexMap<String, IndexMap<Lang, ComparisonTable>> = IndexMap::new();
        for table in tables {
            products
                .entry(table.supplier_id.clone())
                .or_default()
                .insert(table.lang, table.clone());
        }
        Self {
            metadata: MasterMetadata {
                created_at: now_iso(),
                total_products: products.len(),
                total_tables: tables.len(),
            },
            products,
        }
    }
}

pub fn save_master(path: &Path, tables: &[ComparisonTable]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let master = MasterCatalog::from_tables(tables);
    std::fs::write(path, serde_json::to_string_pretty(&master)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(
        "Saved master comparison catalog ({} products, {} tables) to {}",
        master.metadata.total_products,
        master.metadata.total_tables,
        path.display()
    );
    Ok(())
}
