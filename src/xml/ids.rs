use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{error, info};

use super::tree::{self, Element};
use super::{first_non_empty, product_id, read_source, tree_strategy, IdFamily, Strategy};

static PRODUCT_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:[\w.-]+:)?PRODUCT\b[^>]*>(.*?)</(?:[\w.-]+:)?PRODUCT\s*>").unwrap()
});
static AID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:[\w.-]+:)?SUPPLIER_AID\b[^>]*>\s*([^<]+?)\s*</(?:[\w.-]+:)?SUPPLIER_AID\s*>").unwrap()
});
static PID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:[\w.-]+:)?SUPPLIER_PID\b[^>]*>\s*([^<]+?)\s*</(?:[\w.-]+:)?SUPPLIER_PID\s*>").unwrap()
});

/// Ordered, de-duplicated canonical identifiers of a catalog feed.
pub fn extract_ids(path: &Path, tolerant: bool) -> Vec<String> {
    let text = match read_source(path) {
        Ok(t) => t,
        Err(e) => {
            error!("Identifier source unreadable: {:#}", e);
            return Vec::new();
        }
    };
    let ids = ids_from_text(&text, tolerant);
    info!("Extracted {} product identifiers from {}", ids.len(), path.display());
    ids
}

/// Tolerant tree, strict tree, then a raw regex scan that never needs the
/// text to parse as XML.
pub fn ids_from_text(text: &str, tolerant: bool) -> Vec<String> {
    let lenient = |t: &str| tree_strategy(tolerant, tree::parse_tolerant, t, ids_from_tree);
    let strict = |t: &str| tree_strategy(true, tree::parse_strict, t, ids_from_tree);
    let scan = |t: &str| -> Option<Result<Vec<String>>> { Some(Ok(ids_from_scan(t))) };
    let strategies: [Strategy<'_, Vec<String>>; 3] =
        [("tolerant tree", &lenient), ("strict tree", &strict), ("regex scan", &scan)];
    first_non_empty("Identifier extraction", text, &strategies)
}

/// Accumulates identifiers per family; AID-derived ones come out first.
#[derive(Default)]
struct IdCollector {
    aid: Vec<String>,
    pid: Vec<String>,
}

impl IdCollector {
    fn push(&mut self, id: String, family: IdFamily) {
        match family {
            IdFamily::Aid => self.aid.push(id),
            IdFamily::Pid => self.pid.push(id),
        }
    }

    fn finish(self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.aid
            .into_iter()
            .chain(self.pid)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect()
    }
}

fn ids_from_tree(doc: &Element) -> Vec<String> {
    let mut ids = IdCollector::default();
    let products = doc.descendants("PRODUCT");

    if products.is_empty() {
        // Identifier tags outside any product block.
        for el in doc.descendants("SUPPLIER_AID") {
            ids.push(el.text(), IdFamily::Aid);
        }
        for el in doc.descendants("SUPPLIER_PID") {
            ids.push(el.text(), IdFamily::Pid);
        }
    } else {
        for product in products {
            if let Some((id, family)) = product_id(product) {
                ids.push(id, family);
            }
        }
    }
    ids.finish()
}

fn ids_from_scan(text: &str) -> Vec<String> {
    let mut ids = IdCollector::default();
    let mut blocks = PRODUCT_BLOCK_RE.captures_iter(text).peekable();

    if blocks.peek().is_none() {
        for caps in AID_RE.captures_iter(text) {
            ids.push(caps[1].to_string(), IdFamily::Aid);
        }
        for caps in PID_RE.captures_iter(text) {
            ids.push(caps[1].to_string(), IdFamily::Pid);
        }
    } else {
        for block in blocks {
            let body = &block[1];
            if let Some(caps) = AID_RE.captures(body) {
                ids.push(caps[1].to_string(), IdFamily::Aid);
            } else if let Some(caps) = PID_RE.captures(body) {
                ids.push(caps[1].to_string(), IdFamily::Pid);
            }
        }
    }
    ids.finish()
}
