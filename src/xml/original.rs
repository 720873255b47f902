use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, error, info};

use super::tree::{self, Element};
use super::{first_non_empty, product_id, read_source, tree_strategy, Strategy};
use crate::model::{FeatureMap, FeatureRecord};

static DECIMAL_COMMA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d,\d").unwrap());
static GROUPED_INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,3}(\.\d{3})+$").unwrap());

/// Features of the vendor's catalog feed, keyed by canonical identifier.
/// Each FEATURE carries one FDESCR/FVALUE/FUNIT; values are normalised from
/// the German number format.
pub fn extract_features(path: &Path, tolerant: bool) -> FeatureMap {
    info!("Starting original feature extraction from {}", path.display());
    let text = match read_source(path) {
        Ok(t) => t,
        Err(e) => {
            error!("Original XML unreadable: {:#}", e);
            return FeatureMap::default();
        }
    };
    features_from_text(&text, tolerant)
}

pub fn features_from_text(text: &str, tolerant: bool) -> FeatureMap {
    let lenient = |t: &str| tree_strategy(tolerant, tree::parse_tolerant, t, features_from_tree);
    let strict = |t: &str| tree_strategy(true, tree::parse_strict, t, features_from_tree);
    let strategies: [Strategy<'_, FeatureMap>; 2] = [("tolerant tree", &lenient), ("strict tree", &strict)];
    first_non_empty("Original XML", text, &strategies)
}

fn features_from_tree(doc: &Element) -> FeatureMap {
    let mut results = FeatureMap::new();
    let products = doc.descendants("PRODUCT");
    debug!("Original XML: {} PRODUCT blocks", products.len());

    for product in products {
        let Some((supplier_id, _)) = product_id(product) else {
            debug!("Skipping product without SUPPLIER_AID or SUPPLIER_PID");
            continue;
        };

        let features: Vec<FeatureRecord> = product
            .descendants("FEATURE")
            .into_iter()
            .map(read_feature)
            .filter(|f| !f.is_empty())
            .collect();

        if !features.is_empty() {
            debug!("Product {}: {} features", supplier_id, features.len());
            results.entry(supplier_id).or_default().extend(features);
        }
    }
    results
}

fn read_feature(feature: &Element) -> FeatureRecord {
    let fname = feature.find_text("FDESCR").unwrap_or_default();
    let fvalue = feature
        .find_text("FVALUE")
        .map(|v| normalize_number(&v))
        .unwrap_or_default();
    FeatureRecord::new(fname, fvalue, feature.find_text("FUNIT"))
}

/// German number format to dot-decimal: `2,5` -> `2.5`, `1.234,56` ->
/// `1234.56`, `1.234` -> `1234`. Anything else passes through.
pub fn normalize_number(value: &str) -> String {
    let s = value.trim();
    if DECIMAL_COMMA_RE.is_match(s) {
        return s.replace('.', "").replace(',', ".");
    }
    if GROUPED_INT_RE.is_match(s) {
        return s.replace('.', "");
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_normalization() {
        assert_eq!(normalize_number("2,5"), "2.5");
        assert_eq!(normalize_number("1.234,56"), "1234.56");
        assert_eq!(normalize_number("1.234"), "1234");
        assert_eq!(normalize_number("1234"), "1234");
        assert_eq!(normalize_number("1200,5W"), "1200.5W");
        assert_eq!(normalize_number("1.5"), "1.5");
        assert_eq!(normalize_number("Ja"), "Ja");
    }

    #[test]
    fn fixture_features() {
        let xml = std::fs::read_to_string("tests/fixtures/original.xml").unwrap();
        let map = features_from_text(&xml, true);

        let ids: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["DCD791P2", "DWE4157", "P1"]);

        let drill = &map["DCD791P2"];
        assert_eq!(drill.len(), 3);
        assert_eq!(drill[0], FeatureRecord::new("Spannung", "18", Some("V".into())));
        assert_eq!(drill[1].fvalue, "1234.56");
        assert_eq!(drill[2].funit, None);

        let p1 = &map["P1"];
        assert_eq!(p1[0], FeatureRecord::new("Leistung", "1200.5", Some("W".into())));
    }

    #[test]
    fn product_without_features_is_skipped() {
        let xml = "<BMECAT><PRODUCT><SUPPLIER_PID>E</SUPPLIER_PID></PRODUCT>\
                   <PRODUCT><SUPPLIER_PID>F</SUPPLIER_PID><FEATURE><FDESCR>A</FDESCR></FEATURE></PRODUCT></BMECAT>";
        let map = features_from_text(xml, true);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("F"));
    }

    #[test]
    fn strict_fallback_when_tolerant_disabled() {
        let xml = "<BMECAT><PRODUCT><SUPPLIER_AID>S</SUPPLIER_AID><FEATURE><FDESCR>A</FDESCR><FVALUE>2,5</FVALUE></FEATURE></PRODUCT></BMECAT>";
        let map = features_from_text(xml, false);
        assert_eq!(map["S"][0].fvalue, "2.5");
    }

    #[test]
    fn unreadable_file_yields_empty() {
        assert!(extract_features(Path::new("tests/fixtures/does_not_exist.xml"), true).is_empty());
    }
}
