use std::path::Path;

use indexmap::IndexMap;
use tracing::{debug, error, info};

use super::tree::{self, Element};
use super::{first_non_empty, product_id, read_source, tree_strategy, Strategy};
use crate::model::{FeatureRecord, Lang, LangFeatureMap};

/// Per-language features of the partner's republished feed. A FEATURE may
/// repeat FNAME/FVALUE with a `lang` attribute; each name is paired with the
/// value carrying the same language, never by position.
pub fn extract_features(path: &Path, tolerant: bool) -> LangFeatureMap {
    info!("Starting DABAG feature extraction from {}", path.display());
    let text = match read_source(path) {
        Ok(t) => t,
        Err(e) => {
            error!("DABAG XML unreadable: {:#}", e);
            return LangFeatureMap::default();
        }
    };
    features_from_text(&text, tolerant)
}

pub fn features_from_text(text: &str, tolerant: bool) -> LangFeatureMap {
    let lenient = |t: &str| tree_strategy(tolerant, tree::parse_tolerant, t, features_from_tree);
    let strict = |t: &str| tree_strategy(true, tree::parse_strict, t, features_from_tree);
    let strategies: [Strategy<'_, LangFeatureMap>; 2] = [("tolerant tree", &lenient), ("strict tree", &strict)];
    first_non_empty("DABAG XML", text, &strategies)
}

fn features_from_tree(doc: &Element) -> LangFeatureMap {
    let mut results = LangFeatureMap::new();
    let products = doc.descendants("PRODUCT");
    debug!("DABAG XML: {} PRODUCT blocks", products.len());

    for product in products {
        let Some((supplier_id, _)) = product_id(product) else {
            continue;
        };

        let mut by_lang: IndexMap<Lang, Vec<FeatureRecord>> = IndexMap::new();
        for feature in product.descendants("FEATURE") {
            for (lang, record) in read_feature(feature) {
                by_lang.entry(lang).or_default().push(record);
            }
        }

        if !by_lang.is_empty() {
            let slot = results.entry(supplier_id).or_default();
            for (lang, records) in by_lang {
                slot.entry(lang).or_default().extend(records);
            }
        }
    }
    results
}

fn element_lang(el: &Element) -> Option<Lang> {
    el.attr("lang").and_then(Lang::from_code)
}

fn read_feature(feature: &Element) -> Vec<(Lang, FeatureRecord)> {
    let funit = feature.find_text("FUNIT");
    let values = feature.descendants("FVALUE");

    feature
        .descendants("FNAME")
        .into_iter()
        .filter_map(|fname_el| {
            let lang = element_lang(fname_el)?;
            let fname = fname_el.text().trim().to_string();
            let fvalue = values
                .iter()
                .find(|v| element_lang(v) == Some(lang))
                .map(|v| v.text().trim().to_string())
                .unwrap_or_default();
            let record = FeatureRecord::new(fname, fvalue, funit.clone());
            (!record.is_empty()).then_some((lang, record))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_per_language() {
        let xml = std::fs::read_to_string("tests/fixtures/dabag.xml").unwrap();
        let map = features_from_text(&xml, true);

        let p1 = &map["P1"];
        assert_eq!(p1[&Lang::De][0], FeatureRecord::new("Leistung", "1200W", None));
        assert_eq!(p1[&Lang::Fr][0], FeatureRecord::new("Puissance", "1200W", None));
        assert_eq!(p1[&Lang::It][0].fname, "Potenza");

        let drill = &map["DCD791P2"];
        let de: Vec<&str> = drill[&Lang::De].iter().map(|f| f.fname.as_str()).collect();
        assert_eq!(de, vec!["Spannung", "Gewicht"]);
        assert_eq!(drill[&Lang::De][1].funit.as_deref(), Some("kg"));
    }

    #[test]
    fn value_matched_by_language_not_position() {
        let xml = r#"<BMECAT><PRODUCT><SUPPLIER_PID>X</SUPPLIER_PID><FEATURE>
            <FNAME lang="deu">Farbe</FNAME><FNAME lang="fra">Couleur</FNAME>
            <FVALUE lang="fra">jaune</FVALUE><FVALUE lang="deu">gelb</FVALUE>
        </FEATURE></PRODUCT></BMECAT>"#;
        let map = features_from_text(xml, true);
        assert_eq!(map["X"][&Lang::De][0].fvalue, "gelb");
        assert_eq!(map["X"][&Lang::Fr][0].fvalue, "jaune");
    }

    #[test]
    fn unknown_language_is_dropped() {
        let xml = r#"<BMECAT><PRODUCT><SUPPLIER_PID>X</SUPPLIER_PID><FEATURE>
            <FNAME lang="eng">Colour</FNAME><FVALUE lang="eng">yellow</FVALUE>
            <FNAME>Untagged</FNAME>
        </FEATURE></PRODUCT></BMECAT>"#;
        assert!(features_from_text(xml, true).is_empty());
    }

    #[test]
    fn missing_value_for_language_is_blank() {
        let xml = r#"<BMECAT><PRODUCT><SUPPLIER_PID>X</SUPPLIER_PID><FEATURE>
            <FNAME xml:lang="ita">Peso</FNAME><FVALUE lang="deu">2</FVALUE>
        </FEATURE></PRODUCT></BMECAT>"#;
        let map = features_from_text(xml, true);
        assert_eq!(map["X"][&Lang::It][0], FeatureRecord::new("Peso", "", None));
        assert!(!map["X"].contains_key(&Lang::De));
    }
}
