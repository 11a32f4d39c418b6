//! Hybrid multimodal retrieval and trust scoring.
//!
//! # Pipeline
//!
//! 1. Prepare the query: pure visual vector (image embedding), fused vector
//!    (mean of image and OCR/text embeddings, renormalized), and an intent
//!    guess from the arbitration port when the text is long enough.
//! 2. Run up to three searches: visual column, fused vector against the
//!    primary column, and the primary column filtered by the intent.
//! 3. Merge by `content_hash`, keeping each record's best raw score.
//! 4. Look for a verified label among the top candidates (OCR evidence
//!    first, then a vote). A verified label adds one more label-filtered
//!    pass and restricts the results to that label.
//! 5. Score every candidate ([`scorer`]), tag image results as visual
//!    confirmations (at most `max_visual_confirmations` of them), order
//!    and truncate.

pub mod consensus;
pub mod scorer;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::arbitration::{Arbiter, IntentVerdict};
use crate::embedding::{mean_normalized, EmbeddingPort};
use crate::models::IngestionRecord;
use crate::ocr::OcrPort;
use crate::store::{SearchFilter, StoredMatch, VectorStore};

pub use consensus::{label_consensus, ConsensusSource, LabelConsensus};
pub use scorer::{tokenize, trust_score, ScoreWeights, TrustScore};

/// Which search pass produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    Visual,
    Textual,
    Label,
}

/// A search hit before scoring.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub record: IngestionRecord,
    pub raw_score: f32,
    pub origin: CandidateOrigin,
}

/// How a result is presented to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCategory {
    VisualConfirmation,
    EnrichedInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub record: IngestionRecord,
    pub origin: CandidateOrigin,
    pub raw_score: f32,
    pub trust: TrustScore,
    pub category: ResultCategory,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<RankedResult>,
    /// OCR text of the query image, or the query text.
    pub query_text: String,
    pub intent: Option<IntentVerdict>,
    pub consensus: Option<LabelConsensus>,
}

/// A multimodal query. At least one of the two parts must be present.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub image: Option<PathBuf>,
    pub text: Option<String>,
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Candidates fetched per search pass.
    pub candidate_k: usize,
    /// Candidates considered for label consensus.
    pub consensus_top_n: usize,
    pub consensus_min_votes: usize,
    pub weights: ScoreWeights,
    pub max_visual_confirmations: usize,
    /// Query text must be longer than this to ask for intent.
    pub min_intent_chars: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            candidate_k: 30,
            consensus_top_n: 15,
            consensus_min_votes: 3,
            weights: ScoreWeights::default(),
            max_visual_confirmations: 3,
            min_intent_chars: 4,
        }
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingPort>,
    store: Arc<dyn VectorStore>,
    ocr: Arc<dyn OcrPort>,
    arbiter: Arbiter,
    domains: Vec<String>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingPort>,
        store: Arc<dyn VectorStore>,
        ocr: Arc<dyn OcrPort>,
        arbiter: Arbiter,
        domains: Vec<String>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            embedder,
            store,
            ocr,
            arbiter,
            domains,
            params,
        }
    }

    pub async fn search(&self, query: &SearchQuery, k: usize) -> Result<SearchResponse> {
        let query_text = match (&query.text, &query.image) {
            (Some(text), _) => text.trim().to_string(),
            (None, Some(image)) => {
                let ocr = self.ocr.clone();
                let image = image.clone();
                tokio::task::spawn_blocking(move || ocr.extract_text(&image))
                    .await?
                    .trim()
                    .to_string()
            }
            (None, None) => String::new(),
        };

        let visual = match &query.image {
            Some(path) => Some(self.embedder.embed_image(path).await?),
            None => None,
        };
        let textual = if query_text.is_empty() {
            None
        } else {
            Some(self.embedder.embed_text(&query_text).await?)
        };

        let fused = match (&visual, &textual) {
            (Some(v), Some(t)) => mean_normalized(&[v.as_slice(), t.as_slice()])
                .ok_or_else(|| anyhow::anyhow!("image and text embeddings disagree on dimension"))?,
            (Some(v), None) => v.clone(),
            (None, Some(t)) => t.clone(),
            (None, None) => bail!("query must include an image or text"),
        };

        let intent = if query_text.chars().count() > self.params.min_intent_chars {
            self.arbiter
                .analyze_intent(&query_text, &self.domains)
                .await
                .map(|verdict| self.known_intent(verdict))
        } else {
            None
        };

        let mut merged: HashMap<String, RetrievalCandidate> = HashMap::new();
        if let Some(v) = &visual {
            let hits = self
                .store
                .search(v, &SearchFilter::visual(), self.params.candidate_k)
                .await?;
            merge(&mut merged, hits, CandidateOrigin::Visual);
        }

        let hits = self
            .store
            .search(&fused, &SearchFilter::primary(), self.params.candidate_k)
            .await?;
        merge(&mut merged, hits, CandidateOrigin::Textual);

        if let Some(intent) = &intent {
            let hits = self.intent_pass(&fused, intent).await?;
            merge(&mut merged, hits, CandidateOrigin::Label);
        }

        let mut candidates: Vec<RetrievalCandidate> = merged.into_values().collect();
        sort_by_raw(&mut candidates);

        let top_n = candidates.len().min(self.params.consensus_top_n);
        let consensus = label_consensus(
            &query_text,
            &candidates[..top_n],
            self.params.consensus_min_votes,
        );

        if let Some(verified) = &consensus {
            tracing::debug!(label = %verified.label, source = ?verified.source, "verified label");
            let filter = SearchFilter {
                label: Some(verified.label.clone()),
                ..Default::default()
            };
            let hits = self
                .store
                .search(&fused, &filter, self.params.candidate_k)
                .await?;
            let mut by_hash: HashMap<String, RetrievalCandidate> = candidates
                .into_iter()
                .map(|c| (c.record.content_hash.clone(), c))
                .collect();
            merge(&mut by_hash, hits, CandidateOrigin::Label);
            candidates = by_hash
                .into_values()
                .filter(|c| c.record.label == verified.label)
                .collect();
        }

        let intent_domain = intent.as_ref().and_then(|i| i.domain.as_deref());
        let tokens = tokenize(&query_text);
        let mut ranked: Vec<RankedResult> = candidates
            .into_iter()
            .map(|c| {
                let trust = trust_score(
                    c.raw_score,
                    &tokens,
                    &c.record,
                    intent_domain,
                    &self.params.weights,
                );
                let category = if c.record.kind.is_visual() {
                    ResultCategory::VisualConfirmation
                } else {
                    ResultCategory::EnrichedInfo
                };
                RankedResult {
                    record: c.record,
                    origin: c.origin,
                    raw_score: c.raw_score,
                    trust,
                    category,
                }
            })
            .collect();

        if consensus.is_some() {
            ranked.sort_by(|a, b| {
                b.trust
                    .confidence
                    .total_cmp(&a.trust.confidence)
                    .then_with(|| b.raw_score.total_cmp(&a.raw_score))
                    .then_with(|| a.record.content_hash.cmp(&b.record.content_hash))
            });
        } else {
            ranked.sort_by(|a, b| {
                b.raw_score
                    .total_cmp(&a.raw_score)
                    .then_with(|| a.record.content_hash.cmp(&b.record.content_hash))
            });
        }

        let mut visual_count = 0;
        ranked.retain(|r| {
            if r.category != ResultCategory::VisualConfirmation {
                return true;
            }
            visual_count += 1;
            visual_count <= self.params.max_visual_confirmations
        });
        ranked.truncate(k);

        Ok(SearchResponse {
            results: ranked,
            query_text,
            intent,
            consensus,
        })
    }

    /// Map the verdict's domain onto a configured domain, ignoring case.
    /// Unknown domains and blank labels are dropped.
    fn known_intent(&self, verdict: IntentVerdict) -> IntentVerdict {
        let domain = verdict.domain.and_then(|d| {
            let d = d.trim();
            self.domains.iter().find(|known| known.eq_ignore_ascii_case(d)).cloned()
        });
        let label = verdict
            .label
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        IntentVerdict { domain, label }
    }

    /// Primary-column search restricted to the intent. A guessed label that
    /// matches nothing falls back to the domain alone.
    async fn intent_pass(&self, fused: &[f32], intent: &IntentVerdict) -> Result<Vec<StoredMatch>> {
        if let Some(label) = &intent.label {
            let filter = SearchFilter {
                domain: intent.domain.clone(),
                label: Some(label.clone()),
                ..Default::default()
            };
            let hits = self.store.search(fused, &filter, self.params.candidate_k).await?;
            if !hits.is_empty() {
                return Ok(hits);
            }
        }
        match &intent.domain {
            Some(domain) => {
                let filter = SearchFilter {
                    domain: Some(domain.clone()),
                    ..Default::default()
                };
                self.store.search(fused, &filter, self.params.candidate_k).await
            }
            None => Ok(Vec::new()),
        }
    }
}

fn merge(
    merged: &mut HashMap<String, RetrievalCandidate>,
    hits: Vec<StoredMatch>,
    origin: CandidateOrigin,
) {
    for hit in hits {
        let key = hit.record.content_hash.clone();
        match merged.get_mut(&key) {
            Some(existing) if existing.raw_score >= hit.score => {}
            Some(existing) => {
                existing.raw_score = hit.score;
                existing.origin = origin;
            }
            None => {
                merged.insert(
                    key,
                    RetrievalCandidate {
                        record: hit.record,
                        raw_score: hit.score,
                        origin,
                    },
                );
            }
        }
    }
}

fn sort_by_raw(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .total_cmp(&a.raw_score)
            .then_with(|| a.record.content_hash.cmp(&b.record.content_hash))
    });
}
