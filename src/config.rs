//! Configuration parsing and validation.
//!
//! Trove is configured via a TOML file (default: `config/trove.toml`).
//! Only `[db]` and `[dataset]` are required; every other section falls
//! back to defaults.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/trove.sqlite"
//!
//! [dataset]
//! root = "./datasets"
//! domains = ["food", "vehicles", "animals"]
//!
//! [embedding]
//! provider = "local"
//! model = "clip-vit-b-32"
//! dims = 512
//!
//! [ocr]
//! provider = "tesseract"
//!
//! [arbitration]
//! provider = "ollama"
//! model = "llama3.2"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use trove_core::arbitration::ArbiterSettings;
use trove_core::cascade::CascadeConfig;
use trove_core::reference::DOMAIN_TEMPLATES;
use trove_core::retrieval::{RetrievalParams, ScoreWeights};
use trove_core::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub arbitration: ArbitrationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Dataset location and target domains.
#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub root: PathBuf,
    #[serde(default = "default_domains")]
    pub domains: Vec<String>,
    /// Prompt templates for domain centroids; `{}` is the domain name.
    #[serde(default = "default_domain_templates")]
    pub domain_templates: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_domains() -> Vec<String> {
    ["food", "vehicles", "animals", "medical", "documents"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_domain_templates() -> Vec<String> {
    DOMAIN_TEMPLATES.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassificationConfig {
    pub structural_threshold: f32,
    pub structural_weight: f32,
    pub payload_weight: f32,
    pub temperature: f32,
    pub probability_floor: f32,
    pub margin: f32,
    pub shortlist_min_probability: f32,
    pub label_semantic_threshold: f32,
    pub label_min_length: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        let c = CascadeConfig::default();
        Self {
            structural_threshold: c.structural_threshold,
            structural_weight: c.structural_weight,
            payload_weight: c.payload_weight,
            temperature: c.temperature,
            probability_floor: c.probability_floor,
            margin: c.margin,
            shortlist_min_probability: c.shortlist_min_probability,
            label_semantic_threshold: c.label_semantic_threshold,
            label_min_length: c.label_min_length,
        }
    }
}

impl ClassificationConfig {
    pub fn cascade_config(&self, sample_chars: usize) -> CascadeConfig {
        CascadeConfig {
            structural_threshold: self.structural_threshold,
            structural_weight: self.structural_weight,
            payload_weight: self.payload_weight,
            temperature: self.temperature,
            probability_floor: self.probability_floor,
            margin: self.margin,
            shortlist_min_probability: self.shortlist_min_probability,
            label_semantic_threshold: self.label_semantic_threshold,
            label_min_length: self.label_min_length,
            sample_chars,
            ..CascadeConfig::default()
        }
    }
}

/// Worker pool, resource and write-retry settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    /// Fixed worker count; computed from CPU/RAM when absent.
    pub workers: Option<usize>,
    pub cpu_reserve: usize,
    pub per_worker_ram_mb: u64,
    pub system_reserve_mb: u64,
    pub max_workers: usize,
    /// Fraction of total RAM above which the coordinator throttles.
    pub ram_high_water: f32,
    pub throttle_pause_ms: u64,
    pub max_throttle_secs: u64,
    pub write_max_attempts: u32,
    pub write_base_delay_ms: u64,
    pub write_max_delay_ms: u64,
    /// Rows/elements kept per tabular or array file.
    pub max_records_per_file: usize,
    pub excerpt_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            workers: None,
            cpu_reserve: 2,
            per_worker_ram_mb: 2500,
            system_reserve_mb: 10_240,
            max_workers: 8,
            ram_high_water: 0.92,
            throttle_pause_ms: 500,
            max_throttle_secs: 60,
            write_max_attempts: 5,
            write_base_delay_ms: 200,
            write_max_delay_ms: 5000,
            max_records_per_file: 50_000,
            excerpt_chars: 500,
        }
    }
}

impl IngestConfig {
    pub fn write_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.write_max_attempts,
            base_delay: Duration::from_millis(self.write_base_delay_ms),
            max_delay: Duration::from_millis(self.write_max_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub candidate_k: usize,
    pub consensus_top_n: usize,
    pub consensus_min_votes: usize,
    pub visual_weight: f32,
    pub textual_weight: f32,
    pub intent_weight: f32,
    pub max_visual_confirmations: usize,
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: 30,
            consensus_top_n: 15,
            consensus_min_votes: 3,
            visual_weight: 0.5,
            textual_weight: 0.4,
            intent_weight: 0.1,
            max_visual_confirmations: 3,
            final_limit: 10,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            candidate_k: self.candidate_k,
            consensus_top_n: self.consensus_top_n,
            consensus_min_votes: self.consensus_min_votes,
            weights: ScoreWeights {
                visual: self.visual_weight,
                textual: self.textual_weight,
                intent: self.intent_weight,
            },
            max_visual_confirmations: self.max_visual_confirmations,
            ..RetrievalParams::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OcrConfig {
    pub provider: String,
    pub binary: String,
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            binary: "tesseract".to_string(),
            language: "eng".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ArbitrationConfig {
    pub provider: String,
    pub url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub retry_pause_ms: u64,
    pub health_timeout_secs: u64,
    pub health_ttl_secs: u64,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            timeout_secs: 30,
            retry_pause_ms: 2000,
            health_timeout_secs: 2,
            health_ttl_secs: 30,
        }
    }
}

impl ArbitrationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn settings(&self) -> ArbiterSettings {
        ArbiterSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            retries: 1,
            retry_pause: Duration::from_millis(self.retry_pause_ms),
            health_ttl: Duration::from_secs(self.health_ttl_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7341".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period after the last detected change before re-ingesting.
    pub debounce_secs: u64,
    pub poll_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 10,
            poll_secs: 5,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Dataset
    if config.dataset.domains.iter().all(|d| d.trim().is_empty()) {
        anyhow::bail!("dataset.domains must name at least one domain");
    }

    // Classification
    let c = &config.classification;
    for (name, value) in [
        ("structural_threshold", c.structural_threshold),
        ("probability_floor", c.probability_floor),
        ("margin", c.margin),
        ("shortlist_min_probability", c.shortlist_min_probability),
        ("label_semantic_threshold", c.label_semantic_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("classification.{} must be in [0.0, 1.0]", name);
        }
    }
    if c.structural_weight < 0.0 || c.payload_weight < 0.0 {
        anyhow::bail!("classification weights must be >= 0");
    }
    if c.structural_weight + c.payload_weight <= 0.0 {
        anyhow::bail!("classification weights must have a positive sum");
    }
    if c.temperature <= 0.0 {
        anyhow::bail!("classification.temperature must be > 0");
    }

    // Ingest
    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.workers == Some(0) || config.ingest.max_workers == 0 {
        anyhow::bail!("ingest worker counts must be > 0");
    }
    if !(0.0..=1.0).contains(&config.ingest.ram_high_water) {
        anyhow::bail!("ingest.ram_high_water must be in [0.0, 1.0]");
    }
    if config.ingest.write_max_attempts == 0 {
        anyhow::bail!("ingest.write_max_attempts must be >= 1");
    }

    // Retrieval
    let r = &config.retrieval;
    if r.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if r.visual_weight < 0.0 || r.textual_weight < 0.0 || r.intent_weight < 0.0 {
        anyhow::bail!("retrieval weights must be >= 0");
    }
    if r.visual_weight + r.textual_weight + r.intent_weight <= 0.0 {
        anyhow::bail!("retrieval weights must have a positive sum");
    }

    // Embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or local.",
            other
        ),
    }

    match config.ocr.provider.as_str() {
        "disabled" | "tesseract" => {}
        other => anyhow::bail!(
            "Unknown OCR provider: '{}'. Must be disabled or tesseract.",
            other
        ),
    }

    match config.arbitration.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown arbitration provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    const MINIMAL: &str = r#"
        [db]
        path = "./data/trove.sqlite"

        [dataset]
        root = "./datasets"
    "#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.dataset.domains.len(), 5);
        assert_eq!(config.ingest.batch_size, 64);
        assert_eq!(config.retrieval.consensus_min_votes, 3);
        assert_eq!(config.classification.margin, 0.15);
        assert!(!config.embedding.is_enabled());
        assert!(!config.arbitration.is_enabled());
        assert_eq!(config.watch.debounce_secs, 10);
    }

    #[test]
    fn test_enabled_embedding_requires_dims() {
        let err = parse(&format!("{}\n[embedding]\nprovider = \"local\"\n", MINIMAL)).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse(&format!("{}\n[ocr]\nprovider = \"cloud\"\n", MINIMAL)).is_err());
        assert!(parse(&format!("{}\n[arbitration]\nprovider = \"gpt\"\n", MINIMAL)).is_err());
    }

    #[test]
    fn test_threshold_out_of_range() {
        let err = parse(&format!(
            "{}\n[classification]\nstructural_threshold = 1.5\n",
            MINIMAL
        ))
        .unwrap_err();
        assert!(err.to_string().contains("structural_threshold"));
    }

    #[test]
    fn test_zero_weight_sum_rejected() {
        let toml_str = format!(
            "{}\n[retrieval]\nvisual_weight = 0.0\ntextual_weight = 0.0\nintent_weight = 0.0\n",
            MINIMAL
        );
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn test_empty_domains_rejected() {
        let toml_str = r#"
            [db]
            path = "x.sqlite"
            [dataset]
            root = "."
            domains = []
        "#;
        assert!(parse(toml_str).is_err());
    }

    #[test]
    fn test_section_conversions() {
        let config = parse(MINIMAL).unwrap();
        let cascade = config.classification.cascade_config(config.ingest.excerpt_chars);
        assert_eq!(cascade.structural_threshold, 0.5);
        assert_eq!(cascade.sample_chars, 500);
        let policy = config.ingest.write_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(config.retrieval.params().weights.visual, 0.5);
        assert_eq!(config.arbitration.settings().retries, 1);
    }
}
