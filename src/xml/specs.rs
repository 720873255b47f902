use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, error, info, warn};

use super::tree::{self, Element};
use super::{first_non_empty, product_id, read_source, tree_strategy, Strategy};

static BR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static BLANK_LINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());
static PRODUCT_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:[\w.-]+:)?PRODUCT\b[^>]*>(.*?)</(?:[\w.-]+:)?PRODUCT\s*>").unwrap()
});
static ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:[\w.-]+:)?SUPPLIER_(AID|PID)\b[^>]*>\s*([^<]+?)\s*</").unwrap()
});

/// Section name -> cleaned free text, for one product.
pub type Sections = IndexMap<String, String>;

/// Free-text extension fields of the primary feed, read once and queried per
/// product or in bulk.
pub struct SpecsExtractor {
    text: String,
    tolerant: bool,
}

impl SpecsExtractor {
    pub fn load(path: &Path, tolerant: bool) -> Result<Self> {
        let text = read_source(path)?;
        Ok(Self::from_text(text, tolerant))
    }

    pub fn from_text(text: String, tolerant: bool) -> Self {
        Self { text, tolerant }
    }

    /// `{section -> text}` for one product; missing fields are simply absent.
    pub fn extract_fields(&self, supplier_id: &str, fields: &[(String, String)]) -> Sections {
        let all = self.extract_all(fields);
        match all.get(supplier_id) {
            Some(found) => found.clone(),
            None => {
                debug!("Product {} not found for free-text extraction", supplier_id);
                Sections::new()
            }
        }
    }

    /// Every product with an identifier, even when none of its fields are
    /// present, so counts line up with identifier extraction.
    pub fn extract_all(&self, fields: &[(String, String)]) -> IndexMap<String, Sections> {
        let extract = |doc: &Element| sections_from_tree(doc, fields);
        let lenient = |t: &str| tree_strategy(self.tolerant, tree::parse_tolerant, t, extract);
        let strict = |t: &str| tree_strategy(true, tree::parse_strict, t, extract);
        let scan = |t: &str| -> Option<Result<IndexMap<String, Sections>>> { Some(Ok(sections_from_scan(t, fields))) };
        let strategies: [Strategy<'_, IndexMap<String, Sections>>; 3] =
            [("tolerant tree", &lenient), ("strict tree", &strict), ("regex scan", &scan)];
        let out = first_non_empty("Free-text extraction", &self.text, &strategies);
        info!("Extracted free-text fields for {} products", out.len());
        out
    }
}

fn sections_from_tree(doc: &Element, fields: &[(String, String)]) -> IndexMap<String, Sections> {
    let mut results = IndexMap::new();
    for product in doc.descendants("PRODUCT") {
        let Some((supplier_id, _)) = product_id(product) else {
            continue;
        };
        let mut sections = Sections::new();
        if let Some(udx) = product.find("USER_DEFINED_EXTENSIONS") {
            for (name, tag) in fields {
                let raw = udx
                    .descendants(tag)
                    .into_iter()
                    .map(Element::text_content)
                    .find(|t| !t.trim().is_empty());
                if let Some(raw) = raw {
                    let clean = clean_text(&raw);
                    if !clean.is_empty() {
                        sections.insert(name.clone(), clean);
                    }
                }
            }
        }
        results.entry(supplier_id).or_insert(sections);
    }
    results
}

fn sections_from_scan(text: &str, fields: &[(String, String)]) -> IndexMap<String, Sections> {
    let mut results = IndexMap::new();
    for block in PRODUCT_BLOCK_RE.captures_iter(text) {
        let body = &block[1];
        let mut aid = None;
        let mut pid = None;
        for caps in ID_RE.captures_iter(body) {
            let slot = if caps[1].eq_ignore_ascii_case("AID") { &mut aid } else { &mut pid };
            if slot.is_none() {
                *slot = Some(caps[2].trim().to_string());
            }
        }
        let Some(supplier_id) = aid.or(pid).filter(|id| !id.is_empty()) else {
            continue;
        };

        let mut sections = Sections::new();
        for (name, tag) in fields {
            let pattern = format!(
                r"(?is)<(?:[\w.-]+:)?{tag}\b[^>]*>\s*(.*?)\s*</(?:[\w.-]+:)?{tag}\s*>",
                tag = regex::escape(tag)
            );
            let Ok(re) = Regex::new(&pattern) else {
                warn!("Unusable field tag {}", tag);
                continue;
            };
            if let Some(caps) = re.captures(body) {
                let clean = clean_text(&caps[1]);
                if !clean.is_empty() {
                    sections.insert(name.clone(), clean);
                }
            }
        }
        results.entry(supplier_id).or_insert(sections);
    }
    results
}

/// Undo the HTML encoding vendors put into long-text fields.
pub fn clean_text(text: &str) -> String {
    let text = text
        .replace("&lt;br&gt;", "\n")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace("&quot;", "\"");
    let text = BR_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = BLANK_LINES_RE.replace_all(&text, "\n");
    text.trim().to_string()
}

// ── Scraped-text cache files ──

/// `=== SECTION NAME ===` blocks, one per non-empty section.
pub fn render_sections(sections: &Sections) -> String {
    let mut out = String::new();
    for (name, text) in sections.iter().filter(|(_, t)| !t.trim().is_empty()) {
        out.push_str(&format!("=== {} ===\n{}\n\n", name.replace('_', " ").to_uppercase(), text));
    }
    out
}

/// Inverse of [`render_sections`]; keys come back lower-cased with spaces
/// turned into underscores. Blank lines inside a section are dropped.
pub fn parse_sections(content: &str) -> Sections {
    let mut result = Sections::new();
    let mut current: Option<String> = None;
    let mut lines: Vec<&str> = Vec::new();

    let flush = |name: Option<String>, lines: &mut Vec<&str>, result: &mut Sections| {
        if let Some(name) = name {
            let key = name.to_lowercase().replace(' ', "_");
            result.insert(key, lines.join("\n").trim().to_string());
        }
        lines.clear();
    };

    for line in content.lines() {
        if line.starts_with("=== ") && line.ends_with(" ===") && line.len() >= 8 {
            flush(current.take(), &mut lines, &mut result);
            current = Some(line[4..line.len() - 4].trim().to_string());
        } else if current.is_some() && !line.trim().is_empty() {
            lines.push(line);
        }
    }
    flush(current, &mut lines, &mut result);
    result
}

pub fn write_sections(path: &Path, sections: &Sections) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_sections(sections))
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Cached sections for a product, or empty when the file is missing or
/// unreadable.
pub fn read_sections(path: &Path) -> Sections {
    if !path.exists() {
        debug!("No scraped text file at {}", path.display());
        return Sections::new();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => parse_sections(&content),
        Err(e) => {
            error!("Failed to read scraped text {}: {}", path.display(), e);
            Sections::new()
        }
    }
}
