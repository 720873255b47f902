use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::matcher::FeatureMatcher;
use crate::model::{AiFeature, CatalogEntry, ComparisonRow, FeatureRecord, Lang};
use crate::scraper::{self, SpecScraper};
use crate::store::CatalogStore;
use crate::xml::specs::{self, SpecsExtractor};
use crate::xml::{dabag, ids, original};

/// All comparison rows for one product, per language.
#[derive(Debug, Clone)]
pub struct ProductComparison {
    pub supplier_id: String,
    pub product_url: Option<String>,
    pub languages: IndexMap<Lang, Vec<ComparisonRow>>,
}

/// One row per distinct non-empty feature name across the four sources,
/// in lexicographic name order. Names match by exact string equality only.
/// Within one source a repeated name keeps its last record.
pub fn align_features(
    original: &[FeatureRecord],
    dabag: &[FeatureRecord],
    web: Option<&IndexMap<String, String>>,
    ai: &[AiFeature],
) -> Vec<ComparisonRow> {
    let orig_map: HashMap<&str, &FeatureRecord> = original
        .iter()
        .filter(|f| !f.fname.is_empty())
        .map(|f| (f.fname.as_str(), f))
        .collect();
    let dabag_map: HashMap<&str, &FeatureRecord> = dabag
        .iter()
        .filter(|f| !f.fname.is_empty())
        .map(|f| (f.fname.as_str(), f))
        .collect();
    let ai_map: HashMap<&str, &AiFeature> = ai
        .iter()
        .filter(|f| !f.fname.is_empty())
        .map(|f| (f.fname.as_str(), f))
        .collect();

    let mut names: BTreeSet<&str> = BTreeSet::new();
    names.extend(orig_map.keys());
    names.extend(dabag_map.keys());
    names.extend(ai_map.keys());
    if let Some(web) = web {
        names.extend(web.keys().map(String::as_str).filter(|k| !k.is_empty()));
    }

    names
        .into_iter()
        .map(|name| {
            let mut row = ComparisonRow::default();
            if let Some(o) = orig_map.get(name) {
                row.original_fname = name.to_string();
                row.original_fvalue = o.fvalue.clone();
                row.original_funit = o.funit.clone();
            }
            if let Some(d) = dabag_map.get(name) {
                row.dabag_fname = name.to_string();
                row.dabag_fvalue = d.fvalue.clone();
                row.dabag_funit = d.funit.clone();
            }
            if let Some(value) = web.and_then(|w| w.get(name)) {
                row.web_fname = name.to_string();
                row.web_fvalue = value.clone();
            }
            if let Some(a) = ai_map.get(name) {
                row.ai_fname = name.to_string();
                row.ai_fvalue = a.fvalue.clone();
            }
            row
        })
        .collect()
}

/// Primary-feed ids with no web cache entry, in primary order.
pub fn missing_ids(primary: &[String], web: &IndexMap<String, CatalogEntry>) -> Vec<String> {
    primary.iter().filter(|id| !web.contains_key(id.as_str())).cloned().collect()
}

/// Runs the full reconciliation: both feeds, the optional AI step, the web
/// cache (refreshed on demand) and the per-language alignment.
pub struct ComparisonBuilder<'a> {
    cfg: &'a Config,
    store: CatalogStore,
    scraper: Option<Box<dyn SpecScraper>>,
    matcher: Option<FeatureMatcher>,
}

impl<'a> ComparisonBuilder<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self {
            cfg,
            store: CatalogStore::load(cfg.master_json_path(), cfg.backup_count),
            scraper: None,
            matcher: None,
        }
    }

    pub fn with_scraper(mut self, scraper: Box<dyn SpecScraper>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    pub fn with_matcher(mut self, matcher: FeatureMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn build(&mut self, original_path: &Path, dabag_path: &Path, auto_scrape: bool) -> Result<Vec<ProductComparison>> {
        info!("Starting comparison table generation (auto-scrape: {})", auto_scrape);
        let tolerant = self.cfg.tolerant_xml;

        let original_features = original::extract_features(original_path, tolerant);
        info!("Original XML: loaded {} products", original_features.len());
        let dabag_features = dabag::extract_features(dabag_path, tolerant);
        info!("DABAG XML: loaded {} products", dabag_features.len());

        let mut product_ids = ids::extract_ids(original_path, tolerant);
        let known: HashSet<String> = product_ids.iter().cloned().collect();
        product_ids.extend(original_features.keys().filter(|id| !known.contains(*id)).cloned());

        let ai_features = self.ai_features(original_path);

        let missing = missing_ids(&product_ids, self.store.products());
        info!("Missing IDs to scrape: {}", missing.len());
        if auto_scrape && !missing.is_empty() {
            match &self.scraper {
                Some(scraper) => {
                    match scraper::refresh_missing(scraper.as_ref(), &mut self.store, &missing) {
                        Ok(stats) if stats.errors > 0 => warn!(
                            "Auto-scrape filled {} of {} missing products, {} still without web data",
                            stats.ok, stats.total, stats.errors
                        ),
                        Ok(stats) => info!("Auto-scrape filled all {} missing products", stats.total),
                        Err(e) => error!("Refreshing web data failed: {:#}", e),
                    }
                }
                None => warn!("Auto-scrape requested but no scraper is configured"),
            }
        }
        let web_products = self.store.products();
        info!("Web cache: {} products", web_products.len());

        let no_features: Vec<FeatureRecord> = Vec::new();
        let no_ai: Vec<AiFeature> = Vec::new();
        let mut merged = Vec::with_capacity(product_ids.len());
        for supplier_id in product_ids {
            let orig = original_features.get(&supplier_id).unwrap_or(&no_features);
            let by_lang = dabag_features.get(&supplier_id);
            let web = web_products.get(&supplier_id);
            let ai = ai_features.get(&supplier_id).unwrap_or(&no_ai);

            let mut languages = IndexMap::new();
            for lang in Lang::ALL {
                let dabag_list = by_lang.and_then(|m| m.get(&lang)).unwrap_or(&no_features);
                let web_specs = web.and_then(|w| w.labels(lang));
                languages.insert(lang, align_features(orig, dabag_list, web_specs, ai));
            }
            merged.push(ProductComparison {
                product_url: web.and_then(|w| w.product_url.clone()),
                supplier_id,
                languages,
            });
        }
        info!("Comparison tables built for {} products", merged.len());
        Ok(merged)
    }

    /// AI features per product, or nothing when the step is disabled or
    /// fails anywhere.
    fn ai_features(&mut self, original_path: &Path) -> IndexMap<String, Vec<AiFeature>> {
        if self.matcher.is_none() {
            if !self.cfg.ai_enabled() {
                info!("AI credential not configured, skipping free-text matching");
                return IndexMap::new();
            }
            match FeatureMatcher::from_config(self.cfg) {
                Ok(m) => self.matcher = Some(m),
                Err(e) => {
                    error!("AI matcher unavailable, continuing without AI features: {:#}", e);
                    return IndexMap::new();
                }
            }
        }
        match self.match_all(original_path) {
            Ok(found) => {
                info!("AI-matched free text for {} products", found.len());
                found
            }
            Err(e) => {
                error!("Free-text extraction/matching failed: {:#}", e);
                IndexMap::new()
            }
        }
    }

    fn match_all(&mut self, original_path: &Path) -> Result<IndexMap<String, Vec<AiFeature>>> {
        let mut found = IndexMap::new();
        let Some(matcher) = self.matcher.as_mut() else {
            return Ok(found);
        };
        let extractor = SpecsExtractor::load(original_path, self.cfg.tolerant_xml)?;
        let in_memory = extractor.extract_all(&self.cfg.udx_fields);

        let pb = ProgressBar::new(in_memory.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
                .progress_chars("#>-"),
        );
        for (supplier_id, sections) in &in_memory {
            pb.inc(1);
            let mut raw = specs::read_sections(&self.cfg.scraped_text_path(supplier_id));
            if raw.is_empty() {
                raw = sections.clone();
            }
            if raw.is_empty() {
                continue;
            }
            let features = matcher.match_features(&raw, supplier_id);
            if !features.is_empty() {
                found.insert(supplier_id.clone(), features);
            }
        }
        pb.finish_and_clear();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::{json, Value};
    use tempfile::TempDir;

    use super::*;
    use crate::matcher::client::CompletionClient;
    use crate::matcher::rules::NO_RULES;
    use crate::matcher::vocab::{ControlledVocabulary, DiscoveredVocabulary};
    use crate::scraper::DirScraper;

    fn rec(name: &str, value: &str) -> FeatureRecord {
        FeatureRecord::new(name, value, None)
    }

    #[test]
    fn rows_cover_union_in_sorted_order() {
        let original = vec![rec("Spannung", "18"), rec("Gewicht", "1.5")];
        let dabag = vec![rec("Spannung", "18 V"), rec("Farbe", "gelb")];
        let mut web = IndexMap::new();
        web.insert("Akku".to_string(), "Li-Ion".to_string());
        web.insert("Spannung".to_string(), "18 Volt".to_string());
        let ai = vec![AiFeature {
            fname: "⚠️ Bürstenlos".into(),
            fvalue: "Ja".into(),
            funit: None,
            source: String::new(),
            ai_generated: true,
            confidence: 0.9,
        }];

        let rows = align_features(&original, &dabag, Some(&web), &ai);
        let names: Vec<&str> = rows.iter().map(ComparisonRow::name).collect();
        assert_eq!(names, vec!["Akku", "Farbe", "Gewicht", "Spannung", "⚠️ Bürstenlos"]);

        let spannung = &rows[3];
        assert_eq!(spannung.original_fvalue, "18");
        assert_eq!(spannung.dabag_fvalue, "18 V");
        assert_eq!(spannung.web_fvalue, "18 Volt");
        assert_eq!(spannung.ai_fname, "");
    }

    #[test]
    fn web_only_name_leaves_other_sources_blank() {
        let mut web = IndexMap::new();
        web.insert("Akku".to_string(), "Li-Ion".to_string());
        let rows = align_features(&[rec("Gewicht", "2")], &[], Some(&web), &[]);
        let akku = &rows[0];
        assert_eq!((akku.web_fname.as_str(), akku.web_fvalue.as_str()), ("Akku", "Li-Ion"));
        assert!(akku.original_fname.is_empty() && akku.original_fvalue.is_empty());
        assert!(akku.dabag_fname.is_empty() && akku.dabag_fvalue.is_empty());
        assert!(akku.ai_fname.is_empty() && akku.ai_fvalue.is_empty());
        assert_eq!(akku.original_funit, None);
    }

    #[test]
    fn matching_is_exact_and_names_are_not_duplicated() {
        let original = vec![rec("Gewicht", "1"), rec("gewicht", "2"), rec("Gewicht", "3"), rec("", "x")];
        let rows = align_features(&original, &[rec("Gewicht", "4")], None, &[]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].original_fvalue, "3");
        assert_eq!(rows[0].dabag_fvalue, "4");
        assert_eq!(rows[1].name(), "gewicht");
        assert!(rows[1].dabag_fname.is_empty());
    }

    #[test]
    fn gap_detection() {
        let mut web = IndexMap::new();
        web.insert("B".to_string(), CatalogEntry::default());
        let primary: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(missing_ids(&primary, &web), vec!["A", "C"]);
    }

    fn config(dir: &TempDir) -> Config {
        Config::with_output_dir(dir.path())
    }

    #[test]
    fn fixture_scenario_without_web_or_ai() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let mut builder = ComparisonBuilder::new(&cfg);
        let merged = builder
            .build(
                Path::new("tests/fixtures/original.xml"),
                Path::new("tests/fixtures/dabag.xml"),
                false,
            )
            .unwrap();

        let ids: Vec<&str> = merged.iter().map(|p| p.supplier_id.as_str()).collect();
        assert_eq!(ids, vec!["DWE4157", "DCD791P2", "P1"]);

        let p1 = merged.iter().find(|p| p.supplier_id == "P1").unwrap();
        assert_eq!(p1.product_url, None);
        let de = &p1.languages[&Lang::De];
        let leistung = de.iter().find(|r| r.name() == "Leistung").unwrap();
        assert_eq!(leistung.original_fvalue, "1200.5");
        assert_eq!(leistung.original_funit.as_deref(), Some("W"));
        assert_eq!(leistung.dabag_fvalue, "1200W");
        assert_eq!(leistung.web_fvalue, "");
        assert_eq!(leistung.ai_fvalue, "");

        // The French table still carries the language-agnostic primary features.
        let fr = &p1.languages[&Lang::Fr];
        let names: Vec<&str> = fr.iter().map(ComparisonRow::name).collect();
        assert_eq!(names, vec!["Leistung", "Puissance"]);
    }

    #[test]
    fn auto_scrape_fills_gaps_in_same_run() {
        let dir = TempDir::new().unwrap();
        let scraped = dir.path().join("scraped");
        std::fs::create_dir_all(&scraped).unwrap();
        std::fs::write(
            scraped.join("P1.json"),
            r#"{"product_url":"https://shop/p1","languages":{"de":{"Leistung":"1200 W","Akku":"nein"}}}"#,
        )
        .unwrap();

        let cfg = config(&dir);
        let mut builder = ComparisonBuilder::new(&cfg).with_scraper(Box::new(DirScraper::new(&scraped)));
        let merged = builder
            .build(
                Path::new("tests/fixtures/original.xml"),
                Path::new("tests/fixtures/dabag.xml"),
                true,
            )
            .unwrap();

        let p1 = merged.iter().find(|p| p.supplier_id == "P1").unwrap();
        assert_eq!(p1.product_url.as_deref(), Some("https://shop/p1"));
        let de = &p1.languages[&Lang::De];
        let leistung = de.iter().find(|r| r.name() == "Leistung").unwrap();
        assert_eq!(leistung.web_fvalue, "1200 W");
        assert!(de.iter().any(|r| r.web_fname == "Akku"));
        assert!(cfg.master_json_path().exists());
        assert_eq!(builder.store().statistics().total_products, 1);
    }

    struct CannedClient(Value);

    impl CompletionClient for CannedClient {
        fn complete_json(&self, _prompt: &str) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn ai_features_join_every_language() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let reply = json!({ "features": [
            { "fname": "Spannung", "fvalue": "18", "funit": "V", "ai_generated": false, "confidence": 1.0 }
        ]});
        let vocabulary = ControlledVocabulary::from_rows(vec![crate::matcher::vocab::VocabRow {
            fname_de: "Spannung".into(),
            ..Default::default()
        }]);
        let discovered = DiscoveredVocabulary::load_or_create(&cfg.ai_features_path, 0.7).unwrap();
        let matcher = FeatureMatcher::new(
            Box::new(CannedClient(reply)),
            vocabulary,
            discovered,
            "{RAW_TEXT}".to_string(),
            NO_RULES.to_string(),
            0.7,
        );

        let mut builder = ComparisonBuilder::new(&cfg).with_matcher(matcher);
        let merged = builder
            .build(
                Path::new("tests/fixtures/original.xml"),
                Path::new("tests/fixtures/dabag.xml"),
                false,
            )
            .unwrap();

        // DWE4157 has no free text, so no AI call and no AI row.
        let dwe = merged.iter().find(|p| p.supplier_id == "DWE4157").unwrap();
        assert!(dwe.languages[&Lang::De].iter().all(|r| r.ai_fname.is_empty()));

        let drill = merged.iter().find(|p| p.supplier_id == "DCD791P2").unwrap();
        for lang in Lang::ALL {
            let row = drill.languages[&lang].iter().find(|r| r.ai_fname == "Spannung").unwrap();
            assert_eq!(row.ai_fvalue, "18");
        }
    }

    struct RecordingClient(Rc<RefCell<Vec<String>>>);

    impl CompletionClient for RecordingClient {
        fn complete_json(&self, prompt: &str) -> Result<Value> {
            self.0.borrow_mut().push(prompt.to_string());
            Ok(json!({ "features": [] }))
        }
    }

    fn prompts_sent(cfg: &Config) -> Vec<String> {
        let prompts = Rc::new(RefCell::new(Vec::new()));
        let discovered = DiscoveredVocabulary::load_or_create(&cfg.ai_features_path, 0.7).unwrap();
        let matcher = FeatureMatcher::new(
            Box::new(RecordingClient(Rc::clone(&prompts))),
            ControlledVocabulary::default(),
            discovered,
            "{RAW_TEXT}".to_string(),
            NO_RULES.to_string(),
            0.7,
        );
        ComparisonBuilder::new(cfg)
            .with_matcher(matcher)
            .build(
                Path::new("tests/fixtures/original.xml"),
                Path::new("tests/fixtures/dabag.xml"),
                false,
            )
            .unwrap();
        let sent = prompts.borrow().clone();
        sent
    }

    #[test]
    fn cached_text_file_wins_over_feed_text() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);

        // No cache files yet: both products with free text use the feed.
        let sent = prompts_sent(&cfg);
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("Spannung: 18 V"));
        assert!(sent[1].contains("Sägeblatt"));

        std::fs::create_dir_all(&cfg.scraped_text_dir).unwrap();
        std::fs::write(cfg.scraped_text_path("P1"), "=== TECHNISCHE DATEN ===\nCache-Inhalt 42\n").unwrap();
        std::fs::write(cfg.scraped_text_path("DCD791P2"), "").unwrap();

        let sent = prompts_sent(&cfg);
        assert_eq!(sent.len(), 2);
        // Empty cache file falls back to the feed.
        assert!(sent[0].contains("Spannung: 18 V"));
        assert!(sent[1].contains("Cache-Inhalt 42"));
        assert!(!sent[1].contains("Sägeblatt"));
    }
}
