//! Vector store abstraction for Trove.
//!
//! The [`VectorStore`] trait defines all storage operations needed by the
//! ingestion orchestrator and the retriever, enabling pluggable backends
//! (SQLite in the app crate, in-memory here).
//!
//! Implementations must be `Send + Sync` and serialize their own writes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::models::{FolderContract, IngestionRecord};

/// Which stored vector a search runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorColumn {
    /// Text embedding, or fused image/OCR embedding for images.
    #[default]
    Primary,
    /// Pure image embedding; only image records have one.
    Visual,
}

/// Column choice plus optional metadata predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub column: VectorColumn,
    pub domain: Option<String>,
    pub label: Option<String>,
}

impl SearchFilter {
    pub fn primary() -> Self {
        Self::default()
    }

    pub fn visual() -> Self {
        Self {
            column: VectorColumn::Visual,
            ..Default::default()
        }
    }

    pub fn accepts(&self, record: &IngestionRecord) -> bool {
        self.domain.as_deref().map_or(true, |d| record.domain == d)
            && self.label.as_deref().map_or(true, |l| record.label == l)
    }
}

/// Vectors stored alongside one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordVectors {
    pub primary: Vec<f32>,
    pub visual: Option<Vec<f32>>,
}

/// A record returned from a vector search with its cosine similarity.
#[derive(Debug, Clone)]
pub struct StoredMatch {
    pub record: IngestionRecord,
    pub score: f32,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add_documents`](VectorStore::add_documents) | Insert records, ignoring known `content_hash`es |
/// | [`search`](VectorStore::search) | Cosine similarity search with a filter |
/// | [`get_folder_contract`](VectorStore::get_folder_contract) | Load an archive's cached decision |
/// | [`save_folder_contract`](VectorStore::save_folder_contract) | Seal an archive |
/// | [`all_indexed_hashes`](VectorStore::all_indexed_hashes) | Every stored `content_hash` |
/// | [`reset`](VectorStore::reset) | Drop all records and contracts |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert records with their vectors. Records whose `content_hash` is
    /// already stored are skipped. Returns the number actually inserted.
    async fn add_documents(
        &self,
        records: &[IngestionRecord],
        vectors: &[RecordVectors],
    ) -> Result<usize>;

    /// Return up to `k` records ordered by descending similarity.
    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoredMatch>>;

    async fn get_folder_contract(&self, folder_path: &str) -> Result<Option<FolderContract>>;

    /// Insert or replace the contract for `contract.folder_path`.
    async fn save_folder_contract(&self, contract: &FolderContract) -> Result<()>;

    async fn all_indexed_hashes(&self) -> Result<HashSet<String>>;

    async fn reset(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}

/// Sort matches by descending score and keep the best `k`.
pub fn top_k(mut matches: Vec<StoredMatch>, k: usize) -> Vec<StoredMatch> {
    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.record.content_hash.cmp(&b.record.content_hash))
    });
    matches.truncate(k);
    matches
}
