//! Label consensus over the top retrieval candidates.

use serde::Serialize;
use std::collections::HashMap;

use crate::cascade::noise::contains_word;
use crate::models::UNKNOWN;

use super::RetrievalCandidate;

/// Where a verified label came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusSource {
    /// The query's OCR text names the label verbatim.
    Ocr,
    /// Enough of the top candidates agree on it.
    Consensus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelConsensus {
    pub label: String,
    pub source: ConsensusSource,
    pub votes: usize,
}

/// Find a verified label among `top` (already ordered by raw score).
///
/// OCR evidence wins: the first candidate label contained in `ocr_text`
/// on word boundaries. Otherwise the label with the most votes wins when
/// it has at least `min_votes`; ties go to the label ranked highest.
pub fn label_consensus(
    ocr_text: &str,
    top: &[RetrievalCandidate],
    min_votes: usize,
) -> Option<LabelConsensus> {
    let labels: Vec<&str> = top
        .iter()
        .map(|c| c.record.label.as_str())
        .filter(|l| !l.is_empty() && *l != UNKNOWN)
        .collect();

    let mut votes: HashMap<&str, (usize, usize)> = HashMap::new();
    for (rank, label) in labels.iter().enumerate() {
        let entry = votes.entry(*label).or_insert((0, rank));
        entry.0 += 1;
    }

    let ocr = ocr_text.to_lowercase();
    if !ocr.trim().is_empty() {
        if let Some(label) = labels.iter().find(|l| contains_word(&ocr, &l.to_lowercase())) {
            return Some(LabelConsensus {
                label: label.to_string(),
                source: ConsensusSource::Ocr,
                votes: votes.get(label).map_or(0, |v| v.0),
            });
        }
    }

    votes
        .into_iter()
        .filter(|(_, (n, _))| *n >= min_votes.max(1))
        .min_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)))
        .map(|(label, (n, _))| LabelConsensus {
            label: label.to_string(),
            source: ConsensusSource::Consensus,
            votes: n,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentKind, IngestionRecord};
    use crate::retrieval::CandidateOrigin;

    fn candidate(i: usize, label: &str) -> RetrievalCandidate {
        RetrievalCandidate {
            record: IngestionRecord {
                local_id: Some(i as i64),
                domain: "food".into(),
                label: label.into(),
                source: format!("{}.jpg", i),
                content_hash: format!("h{}", i),
                domain_score: 1.0,
                content_excerpt: String::new(),
                kind: DocumentKind::Image,
                extra: serde_json::json!({}),
            },
            raw_score: 1.0 - i as f32 * 0.01,
            origin: CandidateOrigin::Visual,
        }
    }

    fn fifteen_with(pizza_count: usize) -> Vec<RetrievalCandidate> {
        (0..15)
            .map(|i| {
                if i < pizza_count {
                    candidate(i, "pizza")
                } else {
                    candidate(i, &format!("dish {}", char::from(b'a' + i as u8)))
                }
            })
            .collect()
    }

    #[test]
    fn test_three_votes_reach_consensus() {
        let c = label_consensus("", &fifteen_with(3), 3).unwrap();
        assert_eq!(c.label, "pizza");
        assert_eq!(c.source, ConsensusSource::Consensus);
        assert_eq!(c.votes, 3);
    }

    #[test]
    fn test_two_votes_do_not() {
        assert_eq!(label_consensus("", &fifteen_with(2), 3), None);
    }

    #[test]
    fn test_ocr_match_wins_over_votes() {
        let mut top = fifteen_with(3);
        top[10] = candidate(10, "calzone");
        let c = label_consensus("Fresh CALZONE daily", &top, 3).unwrap();
        assert_eq!(c.label, "calzone");
        assert_eq!(c.source, ConsensusSource::Ocr);
    }

    #[test]
    fn test_tie_goes_to_best_rank() {
        let mut top: Vec<RetrievalCandidate> = Vec::new();
        for (i, label) in ["ramen", "sushi", "ramen", "sushi", "ramen", "sushi"].iter().enumerate() {
            top.push(candidate(i, label));
        }
        let c = label_consensus("", &top, 3).unwrap();
        assert_eq!(c.label, "ramen");
    }

    #[test]
    fn test_unknown_never_votes() {
        let top: Vec<RetrievalCandidate> = (0..5).map(|i| candidate(i, "unknown")).collect();
        assert_eq!(label_consensus("unknown", &top, 3), None);
    }
}
