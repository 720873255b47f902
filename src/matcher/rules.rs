use std::path::Path;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

pub const NO_RULES: &str = "No custom rules defined.";

const REQUIRED_FIELDS: [&str; 5] = ["id", "description", "priority", "trigger", "actions"];

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub priority: i64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub trigger: Trigger,
    pub actions: Action,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    TextContains {
        #[serde(default)]
        patterns: Vec<String>,
        #[serde(default)]
        fields: Vec<String>,
    },
    TextAnalysis {
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub not_contains: Option<Vec<String>>,
    #[serde(default)]
    pub contains_any: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    AddMandatoryFields {
        #[serde(default)]
        fields: Vec<String>,
    },
    SetFieldValues {
        #[serde(default)]
        values: IndexMap<String, String>,
    },
    ExtractAndAddField {
        #[serde(default)]
        field_name: String,
        #[serde(default)]
        extraction: Extraction,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub normalize: IndexMap<String, Vec<String>>,
}

/// Business rules injected into the extraction prompt.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Rules file not readable: {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON in rules file {}", path.display()))?;
        let set = Self::from_value(&value)?;
        info!("Loaded {} rules from {}", set.rules.len(), path.display());
        Ok(set)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let problems = validate(value);
        if !problems.is_empty() {
            for p in &problems {
                error!("Rule validation: {}", p);
            }
            bail!("{} rule validation error(s): {}", problems.len(), problems.join("; "));
        }
        let rules = serde_json::from_value(value["rules"].clone()).context("Rule shape not understood")?;
        Ok(Self { rules })
    }

    /// Enabled rules, lowest priority number first.
    pub fn enabled(&self) -> Vec<&Rule> {
        let mut enabled: Vec<&Rule> = self.rules.iter().filter(|r| r.enabled).collect();
        enabled.sort_by_key(|r| r.priority);
        enabled
    }

    /// Natural-language instructions for the prompt.
    pub fn to_instructions(&self) -> String {
        let enabled = self.enabled();
        if enabled.is_empty() {
            return NO_RULES.to_string();
        }

        let mut out = vec!["## CUSTOM EXTRACTION RULES (CRITICAL - FOLLOW STRICTLY)\n".to_string()];
        for rule in enabled {
            out.push(format!("### Rule {}: {}", rule.priority, rule.id));
            out.push(format!("**Description:** {}\n", rule.description));

            out.push("**When:**".to_string());
            match &rule.trigger {
                Trigger::TextContains { patterns, fields } => {
                    out.push(format!("- If ANY of these fields: {}", fields.join(", ")));
                    out.push(format!("- Contains ANY of: {}", patterns.join(", ")));
                }
                Trigger::TextAnalysis { conditions } => {
                    for cond in conditions {
                        if let Some(p) = &cond.not_contains {
                            out.push(format!("- Field '{}' does NOT contain: {}", cond.field, p.join(", ")));
                        }
                        if let Some(p) = &cond.contains_any {
                            out.push(format!("- Field '{}' contains ANY: {}", cond.field, p.join(", ")));
                        }
                    }
                }
                Trigger::Unknown => {}
            }

            out.push("\n**Then:**".to_string());
            match &rule.actions {
                Action::AddMandatoryFields { fields } => {
                    out.push(format!("- MUST include these fields in output: {}", fields.join(", ")));
                    out.push("- These fields are MANDATORY even if values need to be extracted".to_string());
                }
                Action::SetFieldValues { values } => {
                    out.push("- Set these exact values:".to_string());
                    for (name, value) in values {
                        out.push(format!("  * {}: \"{}\"", name, value));
                    }
                }
                Action::ExtractAndAddField { field_name, extraction } => {
                    out.push(format!("- Add new field: '{}'", field_name));
                    let shown: Vec<&str> = extraction.patterns.iter().take(3).map(String::as_str).collect();
                    out.push(format!("- Extract value matching patterns: {}...", shown.join(", ")));
                    if !extraction.normalize.is_empty() {
                        out.push("- Normalize extracted values:".to_string());
                        for (standard, variants) in &extraction.normalize {
                            out.push(format!("  * If found [{}] → use '{}'", variants.join(", "), standard));
                        }
                    }
                }
                Action::Unknown => {}
            }
            out.push(String::new());
        }
        out.join("\n")
    }
}

/// Structural problems in a rules document; empty when it is usable.
pub fn validate(value: &Value) -> Vec<String> {
    let mut problems = Vec::new();
    if value.get("metadata").is_none() {
        problems.push("Missing 'metadata' section".to_string());
    }
    let Some(rules) = value.get("rules") else {
        problems.push("Missing 'rules' array".to_string());
        return problems;
    };
    let Some(rules) = rules.as_array() else {
        problems.push("'rules' must be an array".to_string());
        return problems;
    };

    for (idx, rule) in rules.iter().enumerate() {
        let rule_id = rule
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("rule_{}", idx));
        let Some(obj) = rule.as_object() else {
            problems.push(format!("Rule '{}': must be an object", rule_id));
            continue;
        };
        for field in REQUIRED_FIELDS {
            if !obj.contains_key(field) {
                problems.push(format!("Rule '{}': missing required field '{}'", rule_id, field));
            }
        }
        if let Some(p) = obj.get("priority") {
            if !(p.is_i64() || p.is_u64()) {
                problems.push(format!("Rule '{}': 'priority' must be integer", rule_id));
            }
        }
        for field in ["trigger", "actions"] {
            if obj.get(field).is_some_and(|v| !v.is_object()) {
                problems.push(format!("Rule '{}': '{}' must be an object", rule_id, field));
            }
        }
    }
    problems
}
