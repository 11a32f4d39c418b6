//! Trust scoring for retrieval candidates.
//!
//! ```text
//! confidence = 100 × (visual·w_v + textual·w_t + intent·w_i) / (w_v + w_t + w_i)
//! ```
//!
//! - `visual = max(0, 1 − distance)` with `distance = 1 − cosine`
//! - `textual` = fraction of query tokens found in the candidate's label and excerpt
//! - `intent` = 1 when the candidate's domain equals the query's intent domain
//!
//! `w_t` drops to zero when the query carries no OCR/text, so a purely
//! visual query is not penalized for missing text evidence.

use serde::Serialize;
use std::collections::HashSet;

use crate::models::IngestionRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub visual: f32,
    pub textual: f32,
    pub intent: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            visual: 0.5,
            textual: 0.4,
            intent: 0.1,
        }
    }
}

/// Per-candidate evidence breakdown plus the combined confidence in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrustScore {
    pub visual: f32,
    pub textual: f32,
    pub intent: f32,
    pub confidence: f32,
}

/// Lowercase alphanumeric tokens of at least two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| seen.insert(t.to_string()))
        .map(|t| t.to_string())
        .collect()
}

/// Fraction of `query_tokens` present in the candidate's label or excerpt.
pub fn textual_overlap(query_tokens: &[String], record: &IngestionRecord) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let haystack: HashSet<String> = tokenize(&format!("{} {}", record.label, record.content_excerpt))
        .into_iter()
        .collect();
    let hits = query_tokens.iter().filter(|t| haystack.contains(*t)).count();
    hits as f32 / query_tokens.len() as f32
}

pub fn trust_score(
    cosine: f32,
    query_tokens: &[String],
    record: &IngestionRecord,
    intent_domain: Option<&str>,
    weights: &ScoreWeights,
) -> TrustScore {
    let distance = 1.0 - cosine;
    let visual = (1.0 - distance).clamp(0.0, 1.0);
    let textual = textual_overlap(query_tokens, record);
    let intent = match intent_domain {
        Some(d) if d.eq_ignore_ascii_case(&record.domain) => 1.0,
        _ => 0.0,
    };

    let w_v = weights.visual.max(0.0);
    let w_t = if query_tokens.is_empty() {
        0.0
    } else {
        weights.textual.max(0.0)
    };
    let w_i = weights.intent.max(0.0);
    let total = w_v + w_t + w_i;

    let confidence = if total > 0.0 {
        (100.0 * (visual * w_v + textual * w_t + intent * w_i) / total).clamp(0.0, 100.0)
    } else {
        0.0
    };

    TrustScore {
        visual,
        textual,
        intent,
        confidence,
    }
}
