//! Reference sets: named centroid vectors for domains and labels.
//!
//! Domain centroids are the mean of several prompt-template embeddings
//! (`"A photo of {}."`, `"Category: {}."`, …). Label centroids are built
//! the same way from the vocabulary discovered in the dataset. A set is
//! read-only after construction and is rebuilt per run.

use anyhow::Result;

use crate::cascade::CascadeError;
use crate::embedding::{cosine_similarity, mean_normalized, EmbeddingPort};

/// Prompt templates used to build domain centroids. `{}` is replaced by
/// the domain name.
pub const DOMAIN_TEMPLATES: [&str; 5] = [
    "A photo of {}.",
    "Category: {}.",
    "This is related to {}.",
    "A list of {}.",
    "Technical data about {}.",
];

/// Mapping from a domain or label name to its centroid vector.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    names: Vec<String>,
    centroids: Vec<Vec<f32>>,
    dims: usize,
}

impl ReferenceSet {
    /// Build a set from precomputed centroids.
    ///
    /// Every name must be non-empty and every vector finite and of the
    /// same dimension. An empty set is valid (no vocabulary discovered).
    pub fn new(entries: Vec<(String, Vec<f32>)>) -> Result<Self, CascadeError> {
        let dims = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut names = Vec::with_capacity(entries.len());
        let mut centroids = Vec::with_capacity(entries.len());

        for (name, vector) in entries {
            if name.trim().is_empty() {
                return Err(CascadeError::EmptyName);
            }
            if vector.is_empty() || vector.len() != dims {
                return Err(CascadeError::DimensionMismatch {
                    name,
                    expected: dims,
                    found: vector.len(),
                });
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(CascadeError::NonFinite { name });
            }
            names.push(name);
            centroids.push(vector);
        }

        Ok(Self {
            names,
            centroids,
            dims,
        })
    }

    /// Embed every `template × name` combination and average per name.
    pub async fn from_templates(
        embedder: &dyn EmbeddingPort,
        names: &[String],
        templates: &[String],
    ) -> Result<Self> {
        if names.is_empty() {
            return Ok(Self::default());
        }
        let templates: Vec<String> = if templates.is_empty() {
            vec!["{}".to_string()]
        } else {
            templates.to_vec()
        };

        let mut prompts = Vec::with_capacity(names.len() * templates.len());
        for name in names {
            for template in &templates {
                prompts.push(template.replace("{}", name));
            }
        }

        let vectors = embedder.embed_texts(&prompts).await?;
        if vectors.len() != prompts.len() {
            anyhow::bail!(
                "embedding backend returned {} vectors for {} prompts",
                vectors.len(),
                prompts.len()
            );
        }

        let mut entries = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let group: Vec<&[f32]> = vectors[i * templates.len()..(i + 1) * templates.len()]
                .iter()
                .map(|v| v.as_slice())
                .collect();
            let centroid = mean_normalized(&group)
                .ok_or_else(|| anyhow::anyhow!("inconsistent embeddings for '{}'", name))?;
            entries.push((name.clone(), centroid));
        }

        Ok(Self::new(entries)?)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    /// Case-insensitive lookup returning the canonical name.
    pub fn find(&self, name: &str) -> Option<&str> {
        let wanted = name.trim();
        self.names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(wanted))
            .map(|n| n.as_str())
    }

    /// Cosine similarity of `vector` against every centroid, in set order.
    pub fn similarities(&self, vector: &[f32]) -> Result<Vec<f32>, CascadeError> {
        if !self.is_empty() && vector.len() != self.dims {
            return Err(CascadeError::VectorDimension {
                expected: self.dims,
                found: vector.len(),
            });
        }
        Ok(self
            .centroids
            .iter()
            .map(|c| cosine_similarity(vector, c))
            .collect())
    }

    /// Best-matching entry as `(index, similarity)`.
    pub fn best(&self, vector: &[f32]) -> Result<Option<(usize, f32)>, CascadeError> {
        let sims = self.similarities(vector)?;
        Ok(argmax(&sims))
    }
}

pub(crate) fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
}
