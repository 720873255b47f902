use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The closed set of catalog languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    De,
    Fr,
    It,
}

impl Lang {
    pub const ALL: [Lang; 3] = [Lang::De, Lang::Fr, Lang::It];

    pub fn as_str(self) -> &'static str {
        match self {
            Lang::De => "de",
            Lang::Fr => "fr",
            Lang::It => "it",
        }
    }

    /// Map a language attribute value (ISO 639-2 or short code) onto the
    /// closed set. Anything else is dropped.
    pub fn from_code(code: &str) -> Option<Lang> {
        match code.trim().to_lowercase().as_str() {
            "deu" | "ger" | "de" => Some(Lang::De),
            "fra" | "fre" | "fr" => Some(Lang::Fr),
            "ita" | "it" => Some(Lang::It),
            _ => None,
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub fname: String,
    pub fvalue: String,
    pub funit: Option<String>,
}

impl FeatureRecord {
    pub fn new(fname: impl Into<String>, fvalue: impl Into<String>, funit: Option<String>) -> Self {
        Self {
            fname: fname.into(),
            fvalue: fvalue.into(),
            funit: funit.filter(|u| !u.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fname.is_empty() && self.fvalue.is_empty() && self.funit.is_none()
    }
}

/// Primary feed: `{id -> features}` in document order.
pub type FeatureMap = IndexMap<String, Vec<FeatureRecord>>;

/// Partner feed: `{id -> {lang -> features}}` in document order.
pub type LangFeatureMap = IndexMap<String, IndexMap<Lang, Vec<FeatureRecord>>>;

/// `{lang -> {label -> value}}` from any JSON shape: non-string values are
/// rendered as text, null becomes "", non-object languages are dropped.
fn labels_as_text<'de, D>(deserializer: D) -> Result<IndexMap<String, IndexMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(langs) = Value::deserialize(deserializer)? else {
        return Ok(IndexMap::new());
    };
    Ok(langs
        .into_iter()
        .filter_map(|(lang, labels)| match labels {
            Value::Object(labels) => Some((
                lang,
                labels.into_iter().map(|(k, v)| (k, value_text(v))).collect(),
            )),
            _ => None,
        })
        .collect())
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        other => Some(value_text(other)),
    })
}

fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// One web-scraped product as held by the catalog store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(default, deserialize_with = "optional_text")]
    pub product_url: Option<String>,
    #[serde(default, deserialize_with = "labels_as_text")]
    pub languages: IndexMap<String, IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Fields the scraper attaches that the store carries through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CatalogEntry {
    pub fn labels(&self, lang: Lang) -> Option<&IndexMap<String, String>> {
        self.languages.get(lang.as_str())
    }
}

/// What the scraping collaborator hands back for one identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedProduct {
    #[serde(default)]
    pub product_url: Option<String>,
    #[serde(default, deserialize_with = "labels_as_text")]
    pub languages: IndexMap<String, IndexMap<String, String>>,
}

/// One aligned feature across all four sources for one product and language.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub original_fname: String,
    pub original_fvalue: String,
    pub original_funit: Option<String>,
    pub dabag_fname: String,
    pub dabag_fvalue: String,
    pub dabag_funit: Option<String>,
    pub web_fname: String,
    pub web_fvalue: String,
    pub ai_fname: String,
    pub ai_fvalue: String,
}

impl ComparisonRow {
    /// The aligned name, taken from whichever source contributed it.
    pub fn name(&self) -> &str {
        [
            &self.original_fname,
            &self.dabag_fname,
            &self.web_fname,
            &self.ai_fname,
        ]
        .into_iter()
        .find(|n| !n.is_empty())
        .map(String::as_str)
        .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiFeature {
    #[serde(default)]
    pub fname: String,
    #[serde(default)]
    pub fvalue: String,
    #[serde(default)]
    pub funit: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub ai_generated: bool,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lang_codes_map_to_closed_set() {
        assert_eq!(Lang::from_code("deu"), Some(Lang::De));
        assert_eq!(Lang::from_code(" FRA "), Some(Lang::Fr));
        assert_eq!(Lang::from_code("it"), Some(Lang::It));
        assert_eq!(Lang::from_code("eng"), None);
        assert_eq!(Lang::from_code(""), None);
    }

    #[test]
    fn empty_unit_is_none() {
        let r = FeatureRecord::new("", "", Some(String::new()));
        assert!(r.is_empty());
        assert!(!FeatureRecord::new("", "", Some("mm".into())).is_empty());
    }

    #[test]
    fn row_name_prefers_first_source() {
        let row = ComparisonRow {
            web_fname: "Gewicht".into(),
            ai_fname: "Gewicht".into(),
            ..Default::default()
        };
        assert_eq!(row.name(), "Gewicht");
        assert_eq!(ComparisonRow::default().name(), "");
    }

    #[test]
    fn catalog_entry_keeps_unknown_fields() {
        let json = r#"{"SUPPLIER_PID":"X1","product_url":null,"languages":{"de":{"A":"1"}},"scraped_at":"t"}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.extra.get("SUPPLIER_PID").and_then(|v| v.as_str()), Some("X1"));
        assert_eq!(entry.labels(Lang::De).unwrap().get("A").map(String::as_str), Some("1"));
        let back = serde_json::to_value(&entry).unwrap();
        assert_eq!(back["SUPPLIER_PID"], "X1");
        assert!(back.get("updated_at").is_none());
    }

    #[test]
    fn label_values_of_any_json_type_become_text() {
        let json = r#"{"product_url":7,"languages":{"de":{"Gewicht":1.5,"Akku":null,"Set":true,"Farbe":"gelb"},"fr":null}}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.product_url.as_deref(), Some("7"));
        let de = entry.labels(Lang::De).unwrap();
        assert_eq!(de["Gewicht"], "1.5");
        assert_eq!(de["Akku"], "");
        assert_eq!(de["Set"], "true");
        assert_eq!(de["Farbe"], "gelb");
        assert!(entry.labels(Lang::Fr).is_none());
    }
}
