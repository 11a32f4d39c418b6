//! SQLite-backed [`VectorStore`] implementation.
//!
//! Records live in the `records` table with their primary vector (and,
//! for images, the visual-only vector) as little-endian f32 BLOBs. Search
//! is a brute-force cosine scan over the rows that pass the filter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use trove_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use trove_core::models::{DocumentKind, FolderContract, FolderSignature, IngestionRecord};
use trove_core::store::{top_k, RecordVectors, SearchFilter, StoredMatch, VectorColumn, VectorStore};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn record_from_row(row: &SqliteRow) -> Result<IngestionRecord> {
    let kind: String = row.get("kind");
    let extra_json: String = row.get("extra_json");
    let domain_score: f64 = row.get("domain_score");
    Ok(IngestionRecord {
        local_id: Some(row.get("id")),
        domain: row.get("domain"),
        label: row.get("label"),
        source: row.get("source"),
        content_hash: row.get("content_hash"),
        domain_score: domain_score as f32,
        content_excerpt: row.get("content_excerpt"),
        kind: kind.parse::<DocumentKind>()?,
        extra: serde_json::from_str(&extra_json).unwrap_or(serde_json::json!({})),
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
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

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut added = 0;

        for (record, vecs) in records.iter().zip(vectors.iter()) {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO records (content_hash, domain, label, source, kind,
                                               domain_score, content_excerpt, extra_json,
                                               vector, visual_vector, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.content_hash)
            .bind(&record.domain)
            .bind(&record.label)
            .bind(&record.source)
            .bind(record.kind.as_str())
            .bind(record.domain_score as f64)
            .bind(&record.content_excerpt)
            .bind(record.extra.to_string())
            .bind(vec_to_blob(&vecs.primary))
            .bind(vecs.visual.as_deref().map(vec_to_blob))
            .bind(now)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(added)
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoredMatch>> {
        let column = match filter.column {
            VectorColumn::Primary => "vector",
            VectorColumn::Visual => "visual_vector",
        };
        let mut sql = format!(
            "SELECT id, content_hash, domain, label, source, kind, domain_score, \
             content_excerpt, extra_json, {col} AS embedding FROM records WHERE {col} IS NOT NULL",
            col = column
        );
        if filter.domain.is_some() {
            sql.push_str(" AND domain = ?");
        }
        if filter.label.is_some() {
            sql.push_str(" AND label = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(domain) = &filter.domain {
            query = query.bind(domain);
        }
        if let Some(label) = &filter.label {
            query = query.bind(label);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            matches.push(StoredMatch {
                record: record_from_row(row)?,
                score: cosine_similarity(vector, &stored),
            });
        }

        Ok(top_k(matches, k))
    }

    async fn get_folder_contract(&self, folder_path: &str) -> Result<Option<FolderContract>> {
        let row = sqlx::query(
            "SELECT folder_path, content_signature, domain, confidence, verified, sealed_at \
             FROM folder_contracts WHERE folder_path = ?",
        )
        .bind(folder_path)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let signature: String = row.get("content_signature");
        let confidence: f64 = row.get("confidence");
        let verified: i64 = row.get("verified");
        Ok(Some(FolderContract {
            folder_path: row.get("folder_path"),
            content_signature: signature
                .parse::<FolderSignature>()
                .with_context(|| format!("corrupt contract for {}", folder_path))?,
            domain: row.get("domain"),
            confidence: confidence as f32,
            verified: verified != 0,
            sealed_at: row.get("sealed_at"),
        }))
    }

    async fn save_folder_contract(&self, contract: &FolderContract) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO folder_contracts (folder_path, content_signature, domain, confidence, verified, sealed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(folder_path) DO UPDATE SET
                content_signature = excluded.content_signature,
                domain = excluded.domain,
                confidence = excluded.confidence,
                verified = excluded.verified,
                sealed_at = excluded.sealed_at
            "#,
        )
        .bind(&contract.folder_path)
        .bind(contract.content_signature.to_string())
        .bind(&contract.domain)
        .bind(contract.confidence as f64)
        .bind(contract.verified as i64)
        .bind(contract.sealed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_indexed_hashes(&self) -> Result<HashSet<String>> {
        let hashes: Vec<String> = sqlx::query_scalar("SELECT content_hash FROM records")
            .fetch_all(&self.pool)
            .await?;
        Ok(hashes.into_iter().collect())
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM records").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM folder_contracts")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}
