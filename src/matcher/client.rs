use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

/// A chat-completion service that answers one prompt with a JSON object.
pub trait CompletionClient {
    fn complete_json(&self, prompt: &str) -> Result<Value>;
}

/// OpenAI-compatible `/chat/completions` endpoint (xAI Grok by default).
pub struct GrokClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GrokClient {
    pub fn new(api_key: &str, model: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl CompletionClient for GrokClient {
    fn complete_json(&self, prompt: &str) -> Result<Value> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.1,
            "response_format": { "type": "json_object" }
        });

        let started = Instant::now();
        debug!("Sending completion request to {} ({} prompt chars)", self.base_url, prompt.len());
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("Completion HTTP error")?;

        let status = resp.status();
        let val: Value = resp.json().context("Completion response is not JSON")?;
        if !status.is_success() {
            return Err(anyhow!("Completion service returned {}: {}", status, val));
        }
        info!("Completion received in {}ms", started.elapsed().as_millis());
        message_json(&val)
    }
}

/// Parse `choices[0].message.content` as a JSON document.
pub fn message_json(response: &Value) -> Result<Value> {
    let content = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Completion response has no choices[0].message.content"))?;
    serde_json::from_str(content).context("Message content is not valid JSON")
}
