//! Ollama-backed [`ArbitrationPort`].
//!
//! Every call POSTs a prompt to `/api/generate` with `format = "json"` and
//! parses the model's JSON answer. Timeouts and the single retry are
//! applied by [`trove_core::arbitration::Arbiter`]; this client makes one
//! attempt per call.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

use trove_core::arbitration::{
    Arbiter, ArbitrationPort, DomainVerdict, IntentVerdict, LabelVerdict, SchemaVerdict,
};
use trove_core::models::{truncate_chars, UNKNOWN};

use crate::config::ArbitrationConfig;

pub struct OllamaArbiter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    health_timeout: Duration,
}

impl OllamaArbiter {
    pub fn new(config: &ArbitrationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
        })
    }

    async fn generate<T: DeserializeOwned>(&self, system: &str, prompt: String) -> Result<T> {
        let body = serde_json::json!({
            "model": self.model,
            "system": system,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": 0.1,
                "num_ctx": 2048,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let raw = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))?;
        parse_verdict(raw)
    }
}

/// Parse the JSON object embedded in a model answer, ignoring any prose
/// around the outermost braces.
fn parse_verdict<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty model answer");
    }
    let json = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if end > start => &raw[start..=end],
        _ => raw,
    };
    Ok(serde_json::from_str(json)?)
}

#[derive(serde::Deserialize)]
struct RawIntent {
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    label: Option<String>,
}

fn known(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(UNKNOWN))
}

#[async_trait]
impl ArbitrationPort for OllamaArbiter {
    async fn is_healthy(&self) -> bool {
        let probe = self
            .client
            .get(&self.base_url)
            .timeout(self.health_timeout)
            .send()
            .await;
        matches!(probe, Ok(r) if r.status().is_success())
    }

    async fn arbitrate_domain(&self, text: &str, shortlist: &[String]) -> Result<DomainVerdict> {
        let prompt = format!(
            "TEXT: '{}'\nCANDIDATE DOMAINS: {}\n\
             Pick the single domain from the candidates that best describes the text. \
             Answer with this format: {{\"domain\": \"string\", \"confidence\": float, \"justification\": \"string\"}}",
            truncate_chars(text, 1000),
            shortlist.join(", ")
        );
        self.generate(
            "You are an expert in document classification. Answer in JSON only.",
            prompt,
        )
        .await
    }

    async fn resolve_schema(&self, sample: &[(String, String)]) -> Result<SchemaVerdict> {
        let rendered = sample
            .iter()
            .map(|(k, v)| format!("{}: {}", k, truncate_chars(v, 80)))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Here is one record from a table:\n{}\n\
             1. Name the column holding the main name or category of the record (the label).\n\
             2. Name the column holding an image path or file name, or null if none.\n\
             Answer with this exact format: {{\"label_column\": \"string\" | null, \"path_column\": \"string\" | null}}",
            rendered
        );
        self.generate(
            "You are an expert in structured data analysis. Answer in JSON only.",
            prompt,
        )
        .await
    }

    async fn refine_label(&self, ocr_text: &str, current_label: &str) -> Result<LabelVerdict> {
        let prompt = format!(
            "Text extracted from the file: '{}'\nCurrent label: '{}'\n\
             Produce a short, precise label (1-4 words) naming what this is. \
             Answer with this format: {{\"label\": \"string\"}}",
            truncate_chars(ocr_text, 500),
            current_label
        );
        self.generate(
            "You are an expert in document recognition. Answer in JSON only.",
            prompt,
        )
        .await
    }

    async fn analyze_intent(&self, text: &str, domains: &[String]) -> Result<IntentVerdict> {
        let prompt = format!(
            "SEARCH TEXT: '{}'\n\
             1. The most likely domain among: {}\n\
             2. The precise name of the object the text is about (the label).\n\
             Use \"unknown\" for anything you cannot tell. \
             Answer with this format: {{\"domain\": \"string\", \"label\": \"string\"}}",
            truncate_chars(text, 1000),
            domains.join(", ")
        );
        let raw: RawIntent = self
            .generate(
                "You are an expert in search intent analysis. Answer in JSON only.",
                prompt,
            )
            .await?;
        Ok(IntentVerdict {
            domain: known(raw.domain),
            label: known(raw.label).map(|l| l.to_lowercase()),
        })
    }
}

/// Build the guarded arbiter for the configured provider.
pub fn create_arbiter(config: &ArbitrationConfig) -> Result<Arbiter> {
    match config.provider.as_str() {
        "disabled" => Ok(Arbiter::disabled()),
        "ollama" => Ok(Arbiter::new(
            std::sync::Arc::new(OllamaArbiter::new(config)?),
            config.settings(),
        )),
        other => bail!("Unknown arbitration provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict_strips_prose() {
        let v: DomainVerdict = parse_verdict(
            "Sure! {\"domain\": \"food\", \"confidence\": 0.8, \"justification\": \"menu\"} hope this helps",
        )
        .unwrap();
        assert_eq!(v.domain, "food");
        assert!((v.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_parse_verdict_rejects_garbage() {
        assert!(parse_verdict::<LabelVerdict>("").is_err());
        assert!(parse_verdict::<LabelVerdict>("no json here").is_err());
        assert!(parse_verdict::<LabelVerdict>("{\"other\": 1}").is_err());
    }

    #[test]
    fn test_schema_verdict_allows_nulls() {
        let v: SchemaVerdict = parse_verdict("{\"label_column\": \"Product\", \"path_column\": null}").unwrap();
        assert_eq!(v.label_column.as_deref(), Some("Product"));
        assert_eq!(v.path_column, None);
    }

    #[test]
    fn test_unknown_intent_fields_dropped() {
        assert_eq!(known(Some(" Unknown ".into())), None);
        assert_eq!(known(Some("food".into())), Some("food".to_string()));
        assert_eq!(known(None), None);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unhealthy() {
        let config = ArbitrationConfig {
            provider: "ollama".into(),
            url: "http://127.0.0.1:9".into(),
            health_timeout_secs: 1,
            ..ArbitrationConfig::default()
        };
        let arbiter = OllamaArbiter::new(&config).unwrap();
        assert!(!arbiter.is_healthy().await);
    }
}
