//! In-memory [`VectorStore`] implementation for tests and small datasets.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over all stored vectors.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{FolderContract, IngestionRecord};

use super::{top_k, RecordVectors, SearchFilter, StoredMatch, VectorColumn, VectorStore};

struct StoredRecord {
    record: IngestionRecord,
    vectors: RecordVectors,
}

#[derive(Default)]
struct Inner {
    records: Vec<StoredRecord>,
    hashes: HashSet<String>,
    contracts: HashMap<String, FolderContract>,
}

pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn add_documents(
        &self,
        records: &[IngestionRecord],
        vectors: &[RecordVectors],
    ) -> Result<usize> {
        if records.len() != vectors.len() {
            anyhow::bail!(
                "add_documents: {} records but {} vector sets",
                records.len(),
                vectors.len()
            );
        }
        let mut inner = self.inner.write().map_err(poisoned)?;
        let mut added = 0;
        for (record, vecs) in records.iter().zip(vectors.iter()) {
            if !inner.hashes.insert(record.content_hash.clone()) {
                continue;
            }
            let mut record = record.clone();
            record.local_id = Some(inner.records.len() as i64 + 1);
            inner.records.push(StoredRecord {
                record,
                vectors: vecs.clone(),
            });
            added += 1;
        }
        Ok(added)
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoredMatch>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let matches = inner
            .records
            .iter()
            .filter(|s| filter.accepts(&s.record))
            .filter_map(|s| {
                let stored = match filter.column {
                    VectorColumn::Primary => Some(&s.vectors.primary),
                    VectorColumn::Visual => s.vectors.visual.as_ref(),
                }?;
                Some(StoredMatch {
                    record: s.record.clone(),
                    score: cosine_similarity(vector, stored),
                })
            })
            .collect();
        Ok(top_k(matches, k))
    }

    async fn get_folder_contract(&self, folder_path: &str) -> Result<Option<FolderContract>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.contracts.get(folder_path).cloned())
    }

    async fn save_folder_contract(&self, contract: &FolderContract) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner
            .contracts
            .insert(contract.folder_path.clone(), contract.clone());
        Ok(())
    }

    async fn all_indexed_hashes(&self) -> Result<HashSet<String>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.hashes.clone())
    }

    async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        *inner = Inner::default();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.records.len())
    }
}
