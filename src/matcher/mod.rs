//! Taxonomy-constrained feature matching: free text in, vocabulary-checked
//! features out, with the language understanding delegated to a
//! chat-completion service.

pub mod client;
pub mod rules;
pub mod vocab;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::model::AiFeature;
use crate::xml::specs::Sections;
use client::{CompletionClient, GrokClient};
use rules::{RuleSet, NO_RULES};
use vocab::{ControlledVocabulary, DiscoveredVocabulary};

/// Prefix on feature names that are not part of the controlled vocabulary.
pub const MARKER: &str = "⚠️ ";

const DEFAULT_PROMPT: &str = include_str!("../../prompts/xml_specs_mapping.txt");
const VOCAB_SAMPLE: usize = 50;
const DISCOVERED_SAMPLE: usize = 20;

pub struct FeatureMatcher {
    client: Box<dyn CompletionClient>,
    vocabulary: ControlledVocabulary,
    discovered: DiscoveredVocabulary,
    template: String,
    rules: String,
    threshold: f64,
}

impl FeatureMatcher {
    pub fn new(
        client: Box<dyn CompletionClient>,
        vocabulary: ControlledVocabulary,
        discovered: DiscoveredVocabulary,
        template: String,
        rules: String,
        threshold: f64,
    ) -> Self {
        Self {
            client,
            vocabulary,
            discovered,
            template,
            rules,
            threshold,
        }
    }

    /// Wire up the service client and reference data from configuration.
    /// Fails when no credential is configured or a reference file is unusable;
    /// a bad rules file only disables the custom rules.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let api_key = cfg
            .grok_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("GROK_API_KEY not configured"))?;
        let client = GrokClient::new(api_key, &cfg.grok_model, &cfg.grok_base_url, cfg.ai_timeout)?;

        let vocabulary = if cfg.unique_features_path.exists() {
            ControlledVocabulary::load(&cfg.unique_features_path)?
        } else {
            warn!(
                "Controlled vocabulary not found at {}; every AI feature will be flagged",
                cfg.unique_features_path.display()
            );
            ControlledVocabulary::default()
        };
        let discovered = DiscoveredVocabulary::load_or_create(&cfg.ai_features_path, cfg.confidence_threshold)?;

        let template = match &cfg.prompt_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read prompt template {}", path.display()))?,
            None => DEFAULT_PROMPT.to_string(),
        };

        let rules = if cfg.rules_path.exists() {
            match RuleSet::load(&cfg.rules_path) {
                Ok(set) => set.to_instructions(),
                Err(e) => {
                    warn!("Custom rules disabled: {:#}", e);
                    NO_RULES.to_string()
                }
            }
        } else {
            info!("No custom rules file at {}", cfg.rules_path.display());
            NO_RULES.to_string()
        };

        Ok(Self::new(
            Box::new(client),
            vocabulary,
            discovered,
            template,
            rules,
            cfg.confidence_threshold,
        ))
    }

    /// Features for one product's free-text sections. Never fails: service or
    /// parsing problems yield an empty list.
    pub fn match_features(&mut self, raw: &Sections, supplier_id: &str) -> Vec<AiFeature> {
        let combined = combine_sections(raw);
        if combined.is_empty() {
            return Vec::new();
        }

        let prompt = self.build_prompt(&combined);
        match self.request(&prompt, supplier_id) {
            Ok(features) => {
                info!("Matched {} features for {}", features.len(), supplier_id);
                features
            }
            Err(e) => {
                error!("AI matching failed for {}: {:#}", supplier_id, e);
                Vec::new()
            }
        }
    }

    fn build_prompt(&self, text: &str) -> String {
        let allowed: Vec<String> = self
            .vocabulary
            .rows()
            .iter()
            .take(VOCAB_SAMPLE)
            .map(|r| format!("- {}: {}", r.fname_de, r.fvalue_de))
            .collect();
        let discovered: Vec<String> = self
            .discovered
            .features()
            .iter()
            .take(DISCOVERED_SAMPLE)
            .map(|f| format!("- {}: {}", f.fname_de, f.fvalue_de))
            .collect();

        self.template
            .replace("{RAW_TEXT}", text)
            .replace("{ALLOWED_FEATURES_CSV}", &allowed.join("\n"))
            .replace("{AI_FEATURES_FALLBACK}", &discovered.join("\n"))
            .replace("{CONFIDENCE_THRESHOLD}", &self.threshold.to_string())
            .replace("{CUSTOM_RULES}", &self.rules)
    }

    fn request(&mut self, prompt: &str, supplier_id: &str) -> Result<Vec<AiFeature>> {
        let response = self.client.complete_json(prompt)?;
        let items = response
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("response has no 'features' array"))?;

        let mut features = Vec::with_capacity(items.len());
        for item in items {
            let mut feature: AiFeature = match serde_json::from_value(item.clone()) {
                Ok(f) => f,
                Err(e) => {
                    warn!("Skipping malformed feature for {}: {}", supplier_id, e);
                    continue;
                }
            };

            if feature.ai_generated {
                // A proposal without a confidence never clears the gate.
                let confidence = item.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
                if confidence < self.threshold {
                    debug!("Dropping '{}' for {} at confidence {}", feature.fname, supplier_id, confidence);
                    continue;
                }
                if let Err(e) = self
                    .discovered
                    .record(&feature.fname, &feature.fvalue, confidence, supplier_id)
                {
                    warn!("Could not record discovered feature '{}': {:#}", feature.fname, e);
                }
                mark(&mut feature.fname);
            }

            if !feature.fname.is_empty() && !self.vocabulary.contains(&feature.fname) {
                if !feature.fname.starts_with(MARKER) {
                    info!("Feature not in vocabulary: {}", feature.fname);
                }
                mark(&mut feature.fname);
            }
            features.push(feature);
        }
        Ok(features)
    }
}

fn mark(name: &mut String) {
    if !name.is_empty() && !name.starts_with(MARKER) {
        name.insert_str(0, MARKER);
    }
}

/// Non-blank sections as one labelled block; empty when there is nothing.
fn combine_sections(raw: &Sections) -> String {
    raw.iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(name, text)| format!("=== {} ===\n{}", name.to_uppercase(), text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use vocab::VocabRow;

    struct FakeClient {
        reply: Result<Value, String>,
        prompts: Rc<RefCell<Vec<String>>>,
    }

    impl CompletionClient for FakeClient {
        fn complete_json(&self, prompt: &str) -> Result<Value> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.reply.clone().map_err(|e| anyhow!(e))
        }
    }

    fn matcher(dir: &TempDir, reply: Result<Value, String>) -> (FeatureMatcher, Rc<RefCell<Vec<String>>>) {
        let prompts = Rc::new(RefCell::new(Vec::new()));
        let vocabulary = ControlledVocabulary::from_rows(vec![
            VocabRow {
                fname_de: "Akku-Spannung".into(),
                fvalue_de: "18".into(),
                ..Default::default()
            },
            VocabRow {
                fname_de: "Gewicht".into(),
                fvalue_de: "1.5".into(),
                ..Default::default()
            },
        ]);
        let discovered = DiscoveredVocabulary::load_or_create(&dir.path().join("ai.json"), 0.70).unwrap();
        let client = FakeClient {
            reply,
            prompts: Rc::clone(&prompts),
        };
        let m = FeatureMatcher::new(
            Box::new(client),
            vocabulary,
            discovered,
            DEFAULT_PROMPT.to_string(),
            NO_RULES.to_string(),
            0.70,
        );
        (m, prompts)
    }

    fn sections() -> Sections {
        let mut s = Sections::new();
        s.insert("technische_daten".into(), "Spannung: 18 V".into());
        s.insert("garantie".into(), "  ".into());
        s
    }

    #[test]
    fn blank_input_makes_no_call() {
        let dir = TempDir::new().unwrap();
        let (mut m, prompts) = matcher(&dir, Ok(json!({ "features": [] })));
        let mut blank = Sections::new();
        blank.insert("lieferumfang".into(), " ".into());
        assert!(m.match_features(&blank, "P1").is_empty());
        assert!(m.match_features(&Sections::new(), "P1").is_empty());
        assert!(prompts.borrow().is_empty());
    }

    #[test]
    fn prompt_is_filled() {
        let dir = TempDir::new().unwrap();
        let (mut m, prompts) = matcher(&dir, Ok(json!({ "features": [] })));
        m.match_features(&sections(), "P1");
        let prompt = prompts.borrow()[0].clone();
        assert!(prompt.contains("=== TECHNISCHE_DATEN ===\nSpannung: 18 V"));
        assert!(!prompt.contains("GARANTIE"));
        assert!(prompt.contains("- Akku-Spannung: 18"));
        assert!(prompt.contains("below 0.7 will"));
        assert!(prompt.contains(NO_RULES));
        assert!(!prompt.contains("{RAW_TEXT}"));
    }

    #[test]
    fn confidence_gate_and_marking() {
        let dir = TempDir::new().unwrap();
        let reply = json!({ "features": [
            { "fname": "Akku Spannung", "fvalue": "18", "funit": "V", "source": "technische_daten", "ai_generated": false, "confidence": 1.0 },
            { "fname": "Drehmoment", "fvalue": "60", "funit": "Nm", "ai_generated": false },
            { "fname": "Bürstenlos", "fvalue": "Ja", "ai_generated": true, "confidence": 0.69 },
            { "fname": "Schlagzahl", "fvalue": "2000", "ai_generated": true, "confidence": 0.70 },
            { "fname": "Gewicht", "fvalue": "1.5", "ai_generated": true, "confidence": 0.9 },
            { "fname": "Ohne Wert", "ai_generated": true }
        ]});
        let (mut m, _) = matcher(&dir, Ok(reply));
        let out = m.match_features(&sections(), "P1");

        let names: Vec<&str> = out.iter().map(|f| f.fname.as_str()).collect();
        assert_eq!(names, vec!["Akku Spannung", "⚠️ Drehmoment", "⚠️ Schlagzahl", "⚠️ Gewicht"]);
        assert_eq!(out[0].funit.as_deref(), Some("V"));
        assert!((out[1].confidence - 1.0).abs() < f64::EPSILON);

        let recorded: Vec<&str> = m.discovered.features().iter().map(|f| f.fname_de.as_str()).collect();
        assert_eq!(recorded, vec!["Schlagzahl", "Gewicht"]);
    }

    #[test]
    fn service_failure_is_empty() {
        let dir = TempDir::new().unwrap();
        let (mut m, _) = matcher(&dir, Err("timeout".into()));
        assert!(m.match_features(&sections(), "P1").is_empty());

        let (mut m, _) = matcher(&dir, Ok(json!({ "items": [] })));
        assert!(m.match_features(&sections(), "P1").is_empty());
    }
}
