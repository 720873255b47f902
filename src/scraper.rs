use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::file_stem;
use crate::model::ScrapedProduct;
use crate::store::CatalogStore;

/// Source of web-page specification data for one product.
pub trait SpecScraper {
    /// `Ok(None)` when the product has no page; errors are reported by the
    /// caller and treated the same way.
    fn process_product(&self, supplier_id: &str) -> Result<Option<ScrapedProduct>>;
}

/// Reads what an external scraping run left behind: one
/// `<dir>/<id>.json` per product in the scraper's output shape.
pub struct DirScraper {
    dir: PathBuf,
}

impl DirScraper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SpecScraper for DirScraper {
    fn process_product(&self, supplier_id: &str) -> Result<Option<ScrapedProduct>> {
        let path = self.dir.join(format!("{}.json", file_stem(supplier_id)));
        if !path.exists() {
            debug!("No scraped data file for {}", supplier_id);
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        let product: ScrapedProduct =
            serde_json::from_str(&text).with_context(|| format!("Malformed scrape result {}", path.display()))?;
        Ok(Some(product))
    }
}

/// Scrape stats returned after completion.
pub struct ScrapeStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// Fetch each id and put usable results into the store, then save once.
/// Failures and results without a product URL count as "no data".
pub fn refresh_missing(
    scraper: &dyn SpecScraper,
    store: &mut CatalogStore,
    supplier_ids: &[String],
) -> Result<ScrapeStats> {
    let total = supplier_ids.len();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut ok = 0usize;
    let mut errors = 0usize;
    for supplier_id in supplier_ids {
        match scraper.process_product(supplier_id) {
            Ok(Some(product)) if product.product_url.is_some() => {
                store.upsert_product(supplier_id, product);
                ok += 1;
            }
            Ok(_) => {
                debug!("No web data for {}", supplier_id);
                errors += 1;
            }
            Err(e) => {
                warn!("Scrape failed for {}: {:#}", supplier_id, e);
                errors += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    store.save()?;
    info!("Scraped {} products ({} ok, {} without data)", total, ok, errors);
    Ok(ScrapeStats { total, ok, errors })
}
