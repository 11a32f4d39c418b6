//! Classification cascade.
//!
//! Decides a document's domain and label from weak, conflicting signals.
//! Each step short-circuits on success:
//!
//! 1. **Explicit**: a loader-supplied domain is trusted outright (confidence 1.0).
//! 2. **Structural**: path tokens and field names are embedded and compared
//!    against the domain centroids; a best match above
//!    `structural_threshold` forces the domain.
//! 3. **Fusion**: `structural_weight · structural + payload_weight · payload`
//!    per domain, turned into probabilities with a temperature-scaled
//!    softmax. The top domain wins when it clears the probability floor
//!    and no rival sits within the margin.
//! 4. **Arbitration**: only for low-confidence or confused outcomes and
//!    only while the backend is healthy.
//! 5. **Rejection**: `unknown` is a valid terminal outcome.
//!
//! The cascade only returns an error for programmer errors (malformed
//! reference sets, vectors of the wrong dimension). Uncertainty is always
//! expressed through the result.

pub mod cache;
mod label;
pub mod noise;

pub use cache::CascadeCache;
pub use label::LabelVocabulary;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::arbitration::Arbiter;
use crate::embedding::EmbeddingPort;
use crate::models::{Classification, Document, DomainMethod, UNKNOWN};
use crate::reference::{argmax, ReferenceSet};

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("reference set contains an empty name")]
    EmptyName,
    #[error("reference vector for '{name}' has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("reference vector for '{name}' contains non-finite values")]
    NonFinite { name: String },
    #[error("domain reference set is empty")]
    NoDomains,
    #[error("document vector has {found} dimensions, reference set expects {expected}")]
    VectorDimension { expected: usize, found: usize },
}

/// Tunable thresholds of the cascade.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub structural_threshold: f32,
    pub structural_weight: f32,
    pub payload_weight: f32,
    pub temperature: f32,
    pub probability_floor: f32,
    pub margin: f32,
    pub shortlist_min_probability: f32,
    pub label_semantic_threshold: f32,
    pub label_min_length: usize,
    /// Characters of content sent to arbitration and keyword matching.
    pub sample_chars: usize,
    pub context_cache_capacity: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            structural_threshold: 0.50,
            structural_weight: 0.6,
            payload_weight: 0.4,
            temperature: 10.0,
            probability_floor: 0.25,
            margin: 0.15,
            shortlist_min_probability: 0.05,
            label_semantic_threshold: 0.65,
            label_min_length: 3,
            sample_chars: 500,
            context_cache_capacity: 10_000,
        }
    }
}

/// Per-run reference data consumed by [`Cascade::classify`].
#[derive(Debug, Clone, Default)]
pub struct References {
    pub domains: ReferenceSet,
    pub labels: ReferenceSet,
    pub vocabulary: LabelVocabulary,
}

/// Counters for how often each step ran. Used for progress reporting
/// and to observe the cascade's short-circuiting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeStats {
    pub explicit: u64,
    pub structural: u64,
    pub fusion_evaluations: u64,
    pub arbitration_requests: u64,
    pub arbitrated: u64,
    pub rejected: u64,
}

pub struct Cascade {
    embedder: Arc<dyn EmbeddingPort>,
    arbiter: Arbiter,
    config: CascadeConfig,
    cache: CascadeCache,
    stats: CascadeStats,
}

impl Cascade {
    pub fn new(embedder: Arc<dyn EmbeddingPort>, arbiter: Arbiter, config: CascadeConfig) -> Self {
        let cache = CascadeCache::new(config.context_cache_capacity);
        Self {
            embedder,
            arbiter,
            config,
            cache,
            stats: CascadeStats::default(),
        }
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    pub fn cache_mut(&mut self) -> &mut CascadeCache {
        &mut self.cache
    }

    pub fn stats(&self) -> &CascadeStats {
        &self.stats
    }

    /// Forget all per-run state.
    pub fn reset(&mut self) {
        self.cache.reset();
        self.stats = CascadeStats::default();
    }

    /// Context string for structural matching: directories and file stem
    /// relative to `root`, then field names for structured content.
    pub fn context_string(doc: &Document, root: &Path) -> String {
        let rel = doc.source_path.strip_prefix(root).unwrap_or(&doc.source_path);
        let mut tokens: Vec<String> = Vec::new();

        if let Some(parent) = rel.parent() {
            for comp in parent.components() {
                let part = comp.as_os_str().to_string_lossy();
                tokens.push(noise::normalize_label(&part));
            }
        }
        if let Some(stem) = rel.file_stem() {
            tokens.push(noise::normalize_label(&stem.to_string_lossy()));
        }
        for field in doc.field_names() {
            tokens.push(noise::normalize_label(field));
        }

        tokens.retain(|t| !t.is_empty());
        tokens.join(" ")
    }

    /// Embed the context strings of a batch in one call so that
    /// [`classify`](Self::classify) finds them cached.
    pub async fn prefetch_contexts(&mut self, docs: &[Document], root: &Path) -> anyhow::Result<()> {
        let mut missing: Vec<String> = Vec::new();
        for doc in docs {
            if doc.suggested_domain.is_some() {
                continue;
            }
            let ctx = Self::context_string(doc, root);
            if !ctx.is_empty() && self.cache.context_vector(&ctx).is_none() && !missing.contains(&ctx) {
                missing.push(ctx);
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        let vectors = self.embedder.embed_texts(&missing).await?;
        for (ctx, vector) in missing.into_iter().zip(vectors) {
            self.cache.insert_context_vector(ctx, vector);
        }
        Ok(())
    }

    async fn context_vector(&mut self, doc: &Document, root: &Path) -> Option<Vec<f32>> {
        let ctx = Self::context_string(doc, root);
        if ctx.is_empty() {
            return None;
        }
        if let Some(v) = self.cache.context_vector(&ctx) {
            return Some(v.to_vec());
        }
        match self.embedder.embed_text(&ctx).await {
            Ok(v) => {
                self.cache.insert_context_vector(ctx, v.clone());
                Some(v)
            }
            Err(e) => {
                tracing::warn!(context = %ctx, error = %e, "context embedding failed");
                None
            }
        }
    }

    /// Decide domain and label for one document.
    ///
    /// `payload` is the document's stored primary vector (text embedding,
    /// or the fused image/OCR vector for images).
    pub async fn classify(
        &mut self,
        doc: &Document,
        refs: &References,
        root: &Path,
        payload: &[f32],
    ) -> Result<Classification, CascadeError> {
        if refs.domains.is_empty() {
            return Err(CascadeError::NoDomains);
        }

        let (domain, confidence, method) = self.resolve_domain(doc, refs, root, payload).await?;
        let (label, label_method, label_confidence) =
            self.resolve_label(doc, refs, root, payload).await?;

        Ok(Classification {
            domain,
            label,
            confidence,
            method,
            label_method,
            label_confidence,
        })
    }

    async fn resolve_domain(
        &mut self,
        doc: &Document,
        refs: &References,
        root: &Path,
        payload: &[f32],
    ) -> Result<(String, f32, DomainMethod), CascadeError> {
        if let Some(explicit) = doc.suggested_domain.as_deref() {
            let explicit = explicit.trim();
            if !explicit.is_empty() {
                self.stats.explicit += 1;
                let name = refs.domains.find(explicit).unwrap_or(explicit).to_string();
                return Ok((name, 1.0, DomainMethod::Explicit));
            }
        }

        let structural = match self.context_vector(doc, root).await {
            Some(v) => refs.domains.similarities(&v)?,
            None => vec![0.0; refs.domains.len()],
        };

        if let Some((idx, sim)) = argmax(&structural) {
            if sim > self.config.structural_threshold {
                self.stats.structural += 1;
                return Ok((refs.domains.name(idx).to_string(), sim, DomainMethod::Structural));
            }
        }

        self.stats.fusion_evaluations += 1;
        let payload_sims = refs.domains.similarities(payload)?;
        let fused: Vec<f32> = structural
            .iter()
            .zip(payload_sims.iter())
            .map(|(s, p)| self.config.structural_weight * s + self.config.payload_weight * p)
            .collect();
        let probs = softmax(&fused, self.config.temperature);
        let Some((top, top_p)) = argmax(&probs) else {
            return Err(CascadeError::NoDomains);
        };

        let mut shortlist: Vec<(usize, f32)> = probs
            .iter()
            .copied()
            .enumerate()
            .filter(|&(i, p)| {
                i == top
                    || (p > self.config.shortlist_min_probability && top_p - p <= self.config.margin)
            })
            .collect();
        shortlist.sort_by(|a, b| b.1.total_cmp(&a.1));
        let confused = shortlist.len() > 1;
        let confident = top_p >= self.config.probability_floor;

        if confident && !confused {
            return Ok((refs.domains.name(top).to_string(), top_p, DomainMethod::Fusion));
        }

        let names: Vec<String> = shortlist
            .iter()
            .map(|&(i, _)| refs.domains.name(i).to_string())
            .collect();
        let sample = doc.text_sample(self.config.sample_chars);
        if self.arbiter.is_available().await {
            self.stats.arbitration_requests += 1;
            if let Some(verdict) = self.arbiter.arbitrate_domain(&sample, &names).await {
                if let Some(name) = refs.domains.find(&verdict.domain) {
                    self.stats.arbitrated += 1;
                    tracing::debug!(
                        source = %doc.source_path.display(),
                        domain = name,
                        justification = %verdict.justification,
                        "domain arbitrated"
                    );
                    let confidence = if verdict.confidence > 0.0 {
                        verdict.confidence.clamp(0.0, 1.0)
                    } else {
                        top_p
                    };
                    return Ok((name.to_string(), confidence, DomainMethod::Arbitrated));
                }
                tracing::warn!(domain = %verdict.domain, "arbitration named an unknown domain");
            }
        }

        if confident {
            return Ok((refs.domains.name(top).to_string(), top_p, DomainMethod::Fusion));
        }

        self.stats.rejected += 1;
        Ok((UNKNOWN.to_string(), top_p, DomainMethod::Rejected))
    }
}

/// Temperature-scaled softmax, numerically stabilized.
pub fn softmax(values: &[f32], temperature: f32) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values
        .iter()
        .map(|v| ((v - max) * temperature).exp())
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests;
