//! Builds the controlled vocabulary from the web cache by pairing the de/fr/it
//! labels of each product by position.
//!
//! This is a best-effort heuristic: it assumes the shop lists a product's
//! specifications in the same order in every language, which nothing
//! guarantees. The aligner never relies on it.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::matcher::vocab::{write_vocabulary, VocabRow};
use crate::model::Lang;
use crate::store::CatalogStore;

type Triple = (String, String, String);

/// Distinct (de, fr, it) name triples with the first example values seen,
/// sorted by the triple.
pub fn unique_features(store: &CatalogStore) -> Vec<VocabRow> {
    let mut unique: BTreeMap<Triple, Triple> = BTreeMap::new();

    for entry in store.products().values() {
        let items: Vec<Vec<(&String, &String)>> = Lang::ALL
            .iter()
            .map(|lang| entry.labels(*lang).map(|m| m.iter().collect()).unwrap_or_default())
            .collect();
        let longest = items.iter().map(Vec::len).max().unwrap_or(0);

        for i in 0..longest {
            let at = |lang: usize| -> (String, String) {
                items[lang]
                    .get(i)
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .unwrap_or_default()
            };
            let (name_de, value_de) = at(0);
            let (name_fr, value_fr) = at(1);
            let (name_it, value_it) = at(2);
            if name_de.is_empty() && name_fr.is_empty() && name_it.is_empty() {
                continue;
            }
            unique
                .entry((name_de, name_fr, name_it))
                .or_insert((value_de, value_fr, value_it));
        }
    }

    unique
        .into_iter()
        .map(|((fname_de, fname_fr, fname_it), (fvalue_de, fvalue_fr, fvalue_it))| VocabRow {
            fname_de,
            fvalue_de,
            fname_fr,
            fvalue_fr,
            fname_it,
            fvalue_it,
        })
        .collect()
}

pub fn export(store: &CatalogStore, path: &Path) -> Result<usize> {
    let rows = unique_features(store);
    write_vocabulary(path, &rows)?;
    info!("Wrote {} feature mappings to {}", rows.len(), path.display());
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use tempfile::TempDir;

    use super::*;
    use crate::matcher::vocab::ControlledVocabulary;
    use crate::model::ScrapedProduct;

    fn product(langs: Vec<(&str, Vec<(&str, &str)>)>) -> ScrapedProduct {
        let mut languages = IndexMap::new();
        for (lang, pairs) in langs {
            let labels: IndexMap<String, String> =
                pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            languages.insert(lang.to_string(), labels);
        }
        ScrapedProduct {
            product_url: Some("u".into()),
            languages,
        }
    }

    #[test]
    fn pairs_by_position_and_keeps_first_example() {
        let dir = TempDir::new().unwrap();
        let mut store = CatalogStore::load(dir.path().join("m.json"), 2);
        store.append_product(
            "A",
            product(vec![
                ("de", vec![("Gewicht", "2 kg"), ("Spannung", "18 V")]),
                ("fr", vec![("Poids", "2 kg"), ("Tension", "18 V")]),
                ("it", vec![("Peso", "2 kg")]),
            ]),
        );
        store.append_product(
            "B",
            product(vec![
                ("de", vec![("Gewicht", "3 kg")]),
                ("fr", vec![("Poids", "3 kg")]),
                ("it", vec![("Peso", "3 kg")]),
            ]),
        );

        let rows = unique_features(&store);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fname_de, "Gewicht");
        assert_eq!(rows[0].fvalue_de, "2 kg");
        assert_eq!(rows[1].fname_fr, "Tension");
        assert_eq!(rows[1].fname_it, "");

        let csv = dir.path().join("unique_features.csv");
        assert_eq!(export(&store, &csv).unwrap(), 2);
        let vocab = ControlledVocabulary::load(&csv).unwrap();
        assert!(vocab.contains("gewicht"));
    }
}
