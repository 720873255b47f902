pub mod dabag;
pub mod ids;
pub mod original;
pub mod specs;
pub mod tree;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use tree::Element;

/// One way of reading a source. Returns `None` when the strategy does not
/// apply (e.g. disabled by configuration).
pub type Strategy<'a, T> = (&'static str, &'a dyn Fn(&str) -> Option<Result<T>>);

/// Things a strategy can produce, so the chain can tell an empty result from
/// a useful one.
pub trait Extracted: Default {
    fn count(&self) -> usize;
}

impl<K, V> Extracted for indexmap::IndexMap<K, V> {
    fn count(&self) -> usize {
        self.len()
    }
}

impl<T> Extracted for Vec<T> {
    fn count(&self) -> usize {
        self.len()
    }
}

/// Try each strategy in order; the first one yielding at least one product
/// wins. Failures and empty results fall through, and exhausting the list
/// yields an empty value.
pub fn first_non_empty<T: Extracted>(what: &str, text: &str, strategies: &[Strategy<'_, T>]) -> T {
    for (name, run) in strategies {
        match run(text) {
            None => continue,
            Some(Ok(found)) if found.count() > 0 => {
                info!("{}: {} strategy found {} products", what, name, found.count());
                return found;
            }
            Some(Ok(_)) => warn!("{}: {} strategy found nothing", what, name),
            Some(Err(e)) => warn!("{}: {} strategy failed: {:#}", what, name, e),
        }
    }
    warn!("{}: all strategies exhausted, no data", what);
    T::default()
}

/// Read a document as text, replacing invalid UTF-8.
pub fn read_source(path: &Path) -> Result<String> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Run a tree parser as a strategy, then hand the document to `extract`.
/// Disabled parsers report `None` so the chain moves on silently.
pub fn tree_strategy<T>(
    enabled: bool,
    parse: fn(&str) -> Result<Element>,
    text: &str,
    extract: impl Fn(&Element) -> T,
) -> Option<Result<T>> {
    if !enabled {
        return None;
    }
    Some(parse(text).map(|doc| extract(&doc)))
}

/// Canonical identifier of a product block: SUPPLIER_AID wins over SUPPLIER_PID.
pub fn product_id(product: &Element) -> Option<(String, IdFamily)> {
    if let Some(aid) = product.find_text("SUPPLIER_AID") {
        return Some((aid, IdFamily::Aid));
    }
    product.find_text("SUPPLIER_PID").map(|pid| (pid, IdFamily::Pid))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdFamily {
    Aid,
    Pid,
}
