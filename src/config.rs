use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

const DEFAULT_OUTPUT_DIR: &str = "outputs/";
const DEFAULT_MODEL: &str = "grok-4-fast-reasoning";
const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";
const DEFAULT_RULES_PATH: &str = "config/ai_extraction_rules.json";

/// Friendly section name -> extension tag in the primary feed.
const UDX_FIELD_MAPPING: &[(&str, &str)] = &[
    ("produktstaerken", "UDX.EDXF.LANGTEXT"),
    ("lieferumfang", "UDX.EDXF.LIEFERUMFANG"),
    ("technische_daten", "UDX.EDXF.TECHNISCHE_DATEN"),
    ("garantie", "UDX.EDXF.GARANTIEBEDINGUNGEN"),
    ("anwendungsbeispiele", "UDX.EDXF.ANWENDUNGSBEISPIELE"),
];

/// Process-wide settings, built once in `main` and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_dir: PathBuf,
    pub comparison_tables_dir: PathBuf,
    pub scraped_text_dir: PathBuf,
    pub master_comparison_filename: String,
    pub master_json_filename: String,
    pub backup_count: usize,

    pub grok_api_key: Option<String>,
    pub grok_model: String,
    pub grok_base_url: String,
    pub confidence_threshold: f64,
    pub ai_timeout: Duration,
    pub ai_features_path: PathBuf,
    pub unique_features_path: PathBuf,
    pub prompt_path: Option<PathBuf>,
    pub rules_path: PathBuf,

    pub udx_fields: Vec<(String, String)>,
    pub tolerant_xml: bool,
}

impl Config {
    /// Defaults rooted at `output_dir`, no AI credential.
    pub fn with_output_dir(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            comparison_tables_dir: output_dir.join("comparison_tables"),
            scraped_text_dir: output_dir.join("scraped_text"),
            master_comparison_filename: "master_comparison_catalog.json".into(),
            master_json_filename: "master_bmecat_dabag.json".into(),
            backup_count: 2,
            grok_api_key: None,
            grok_model: DEFAULT_MODEL.into(),
            grok_base_url: DEFAULT_BASE_URL.into(),
            confidence_threshold: 0.70,
            ai_timeout: Duration::from_secs(60),
            ai_features_path: output_dir.join("ai_generated_features.json"),
            unique_features_path: output_dir.join("unique_features.csv"),
            prompt_path: None,
            rules_path: PathBuf::from(DEFAULT_RULES_PATH),
            udx_fields: UDX_FIELD_MAPPING
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            tolerant_xml: true,
            output_dir,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let output_dir = PathBuf::from(get("BME_OUTPUT_DIR").unwrap_or_else(|| DEFAULT_OUTPUT_DIR.into()));
        let mut cfg = Self::with_output_dir(output_dir);

        if let Some(v) = get("COMPARISON_TABLES_DIR") {
            cfg.comparison_tables_dir = v.into();
        }
        if let Some(v) = get("SCRAPED_TEXT_DIR") {
            cfg.scraped_text_dir = v.into();
        }
        if let Some(v) = get("MASTER_COMPARISON_FILENAME") {
            cfg.master_comparison_filename = v;
        }
        if let Some(v) = get("MASTER_JSON_FILENAME") {
            cfg.master_json_filename = v;
        }
        if let Some(v) = get("MASTER_JSON_BACKUP_COUNT") {
            cfg.backup_count = parse_var("MASTER_JSON_BACKUP_COUNT", &v)?;
        }
        cfg.grok_api_key = get("GROK_API_KEY");
        if let Some(v) = get("GROK_MODEL") {
            cfg.grok_model = v;
        }
        if let Some(v) = get("GROK_BASE_URL") {
            cfg.grok_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("GROK_CONFIDENCE_THRESHOLD") {
            let threshold: f64 = parse_var("GROK_CONFIDENCE_THRESHOLD", &v)?;
            if !(0.0..=1.0).contains(&threshold) {
                bail!("GROK_CONFIDENCE_THRESHOLD must be between 0.0 and 1.0, got {}", threshold);
            }
            cfg.confidence_threshold = threshold;
        }
        if let Some(v) = get("AI_TIMEOUT_SECS") {
            cfg.ai_timeout = Duration::from_secs(parse_var("AI_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("AI_FEATURES_PATH") {
            cfg.ai_features_path = v.into();
        }
        if let Some(v) = get("UNIQUE_FEATURES_PATH") {
            cfg.unique_features_path = v.into();
        }
        cfg.prompt_path = get("AI_PROMPT_PATH").map(PathBuf::from);
        if let Some(v) = get("AI_RULES_PATH") {
            cfg.rules_path = v.into();
        }
        if let Some(v) = get("XML_TOLERANT") {
            cfg.tolerant_xml = parse_var("XML_TOLERANT", &v)?;
        }
        Ok(cfg)
    }

    pub fn master_json_path(&self) -> PathBuf {
        self.output_dir.join(&self.master_json_filename)
    }

    pub fn master_comparison_path(&self) -> PathBuf {
        self.comparison_tables_dir.join(&self.master_comparison_filename)
    }

    pub fn scraped_text_path(&self, supplier_id: &str) -> PathBuf {
        self.scraped_text_dir.join(format!("{}.txt", file_stem(supplier_id)))
    }

    pub fn ai_enabled(&self) -> bool {
        self.grok_api_key.is_some()
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid value for {}: '{}'", key, value))
}

/// Identifier made safe for use as a file name.
pub fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}
