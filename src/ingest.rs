//! Ingestion orchestration.
//!
//! Coordinates a full run over the dataset tree:
//!
//! ```text
//! vocabulary ─▶ archives ─▶ contract check ─▶ parse pool ─▶ batch ─▶ embed ─▶ classify ─▶ store
//! ```
//!
//! Archives are processed one after another by a single coordinator task.
//! In `complete` mode an archive whose folder signature still matches its
//! sealed contract is skipped without parsing, embedding or classifying
//! anything, and files whose content hash is already stored are skipped by
//! the workers. Batches are flushed when full, at the end of each archive
//! and on cancellation. An archive is sealed only when every one of its
//! batches was written.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use trove_core::arbitration::Arbiter;
use trove_core::cascade::{Cascade, CascadeStats, LabelVocabulary, References};
use trove_core::embedding::{mean_normalized, EmbeddingPort};
use trove_core::models::{
    truncate_chars, Document, DocumentContent, FolderContract, IngestionRecord, UNKNOWN,
};
use trove_core::ocr::OcrPort;
use trove_core::reference::ReferenceSet;
use trove_core::retry::RetryPolicy;
use trove_core::store::{RecordVectors, VectorStore};

use crate::arbitration::create_arbiter;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::error::SetupError;
use crate::loaders::{LoaderSettings, WorkerContext};
use crate::migrate;
use crate::monitor::ResourceMonitor;
use crate::ocr::create_ocr;
use crate::pool::{ParseOutcome, ParsePool, WorkerInit};
use crate::progress::{format_number, IngestProgressEvent, IngestProgressReporter, ProgressMode};
use crate::scan::{self, Archive};
use crate::sqlite_store::SqliteStore;
use crate::vocabulary::{self, DiscoveredVocabulary};

/// OCR text longer than this is fused into an image's primary vector.
const MIN_OCR_CHARS: usize = 4;
/// Share of an archive's documents that must agree on the domain for its
/// contract to be marked verified.
const CONTRACT_AGREEMENT: f32 = 0.8;
const PROGRESS_EVERY: u64 = 25;
const LABEL_TEMPLATES: [&str; 2] = ["{}", "A photo of {}."];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IngestMode {
    /// Clear the store (records and contracts), then index everything.
    Reset,
    /// Resume: skip sealed, unchanged archives and already indexed files.
    Complete,
}

/// Model services and storage used by a run.
#[derive(Clone)]
pub struct IngestPorts {
    pub embedder: Arc<dyn EmbeddingPort>,
    pub ocr: Arc<dyn OcrPort>,
    pub arbiter: Arbiter,
    pub store: Arc<dyn VectorStore>,
}

impl IngestPorts {
    /// Build the configured adapters over the SQLite store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;
        Ok(Self {
            embedder: create_embedder(&config.embedding)?,
            ocr: create_ocr(&config.ocr)?,
            arbiter: create_arbiter(&config.arbitration)?,
            store: Arc::new(SqliteStore::new(pool)),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub archives: u64,
    pub archives_unchanged: u64,
    pub archives_sealed: u64,
    /// Files handed to the parse pool (parsed, skipped or failed).
    pub files_scanned: u64,
    pub files_already_indexed: u64,
    pub files_failed: u64,
    pub documents_failed: u64,
    /// Documents whose content hash was already seen earlier in this run.
    pub duplicates_skipped: u64,
    pub records_indexed: u64,
    pub batches_dropped: u64,
    pub records_by_domain: HashMap<String, u64>,
    pub cancelled: bool,
    #[serde(skip)]
    pub cascade: CascadeStats,
    #[serde(skip)]
    pub throttled: Duration,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Fail with [`SetupError::DatasetMissing`] unless the dataset root is a directory.
pub fn ensure_dataset_root(config: &Config) -> Result<()> {
    if !config.dataset.root.is_dir() {
        return Err(SetupError::DatasetMissing(config.dataset.root.clone()).into());
    }
    Ok(())
}

struct Pending {
    doc: Document,
    content_hash: String,
}

/// Per-archive bookkeeping for the pending contract.
#[derive(Default)]
struct ArchiveTally {
    /// domain → (documents, summed confidence)
    domains: HashMap<String, (u64, f32)>,
    total: u64,
    failed_batch: bool,
}

impl ArchiveTally {
    fn record(&mut self, domain: &str, confidence: f32) {
        let entry = self.domains.entry(domain.to_string()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += confidence;
        self.total += 1;
    }

    /// Majority known domain, falling back to `unknown`.
    fn contract(&self, archive: &Archive) -> FolderContract {
        let best = self
            .domains
            .iter()
            .filter(|(d, _)| d.as_str() != UNKNOWN)
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.0.cmp(a.0)));

        let (domain, confidence, verified) = match best {
            Some((domain, &(count, sum))) => {
                let share = count as f32 / self.total.max(1) as f32;
                (domain.clone(), sum / count as f32, share >= CONTRACT_AGREEMENT)
            }
            None => (UNKNOWN.to_string(), 0.0, false),
        };

        FolderContract {
            folder_path: archive.name.clone(),
            content_signature: archive.signature,
            domain,
            confidence,
            verified,
            sealed_at: chrono::Utc::now().timestamp(),
        }
    }
}

struct Coordinator<'a> {
    config: &'a Config,
    ports: &'a IngestPorts,
    root: PathBuf,
    vocabulary: DiscoveredVocabulary,
    refs: Option<Arc<References>>,
    cascade: Cascade,
    /// Content hashes buffered so far this run.
    seen: HashSet<String>,
    policy: RetryPolicy,
    monitor: ResourceMonitor,
    report: IngestReport,
}

/// Run one ingestion pass over `config.dataset.root`.
pub async fn ingest_dataset(
    config: &Config,
    ports: &IngestPorts,
    mode: IngestMode,
    cancel: CancellationToken,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestReport> {
    let started = Instant::now();
    ensure_dataset_root(config)?;
    let root = config.dataset.root.clone();

    if mode == IngestMode::Reset {
        ports.store.reset().await.context("Failed to reset the store")?;
        tracing::info!("store reset");
    }

    let min_len = config.classification.label_min_length;
    let excludes = scan::build_globset(&config.dataset.exclude_globs)?;
    let (vocabulary, archives) = {
        let root = root.clone();
        tokio::task::spawn_blocking(move || -> Result<_> {
            let vocabulary = vocabulary::discover(&root, min_len)?;
            let archives = scan::scan_archives(&root, &excludes)?;
            Ok((vocabulary, archives))
        })
        .await??
    };

    let mut cascade = Cascade::new(
        ports.embedder.clone(),
        ports.arbiter.clone(),
        config.classification.cascade_config(config.ingest.excerpt_chars),
    );
    cascade.cache_mut().load_file_labels(vocabulary.file_labels.clone());

    let mut coordinator = Coordinator {
        config,
        ports,
        root,
        vocabulary,
        refs: None,
        cascade,
        seen: HashSet::new(),
        policy: config.ingest.write_policy(),
        monitor: ResourceMonitor::new(&config.ingest),
        report: IngestReport {
            archives: archives.len() as u64,
            ..IngestReport::default()
        },
    };

    let mut pool: Option<ParsePool> = None;
    for archive in &archives {
        if cancel.is_cancelled() {
            break;
        }

        if mode == IngestMode::Complete && archive.sealable {
            if let Some(contract) = ports.store.get_folder_contract(&archive.name).await? {
                if contract.matches(&archive.signature) {
                    tracing::debug!(archive = %archive.name, "archive unchanged, skipping");
                    coordinator.report.archives_unchanged += 1;
                    progress.report(IngestProgressEvent::Unchanged {
                        archive: archive.name.clone(),
                    });
                    continue;
                }
            }
        }

        progress.report(IngestProgressEvent::Scanning {
            archive: archive.name.clone(),
            files: archive.files.len() as u64,
        });

        let tally = if archive.files.is_empty() {
            ArchiveTally::default()
        } else {
            if pool.is_none() {
                pool = Some(coordinator.start_pool().await?);
            }
            match pool.as_mut() {
                Some(pool) => coordinator.process_archive(pool, archive, &cancel, progress).await?,
                None => ArchiveTally::default(),
            }
        };

        if cancel.is_cancelled() {
            break;
        }
        if archive.sealable && !tally.failed_batch {
            let contract = tally.contract(archive);
            ports.store.save_folder_contract(&contract).await?;
            coordinator.report.archives_sealed += 1;
            tracing::info!(
                archive = %archive.name,
                domain = %contract.domain,
                confidence = contract.confidence,
                verified = contract.verified,
                "archive sealed"
            );
        }
    }

    if let Some(pool) = pool {
        pool.shutdown().await;
    }

    let mut report = coordinator.report;
    report.cascade = coordinator.cascade.stats().clone();
    report.cancelled = cancel.is_cancelled();
    report.elapsed = started.elapsed();
    Ok(report)
}

impl Coordinator<'_> {
    async fn start_pool(&mut self) -> Result<ParsePool> {
        let indexed = Arc::new(self.ports.store.all_indexed_hashes().await?);
        let size = self.monitor.pool_size(&self.config.ingest);
        let ocr = self.ports.ocr.clone();
        let settings = LoaderSettings {
            max_records_per_file: self.config.ingest.max_records_per_file,
        };
        let init: WorkerInit = Arc::new(move |worker_id| {
            tracing::debug!(worker_id, "parse worker started");
            WorkerContext {
                ocr: ocr.clone(),
                settings: settings.clone(),
            }
        });
        Ok(ParsePool::start(size, indexed, init))
    }

    /// Domain and label references, built on first use so that a run where
    /// every archive short-circuits makes no embedding calls.
    async fn references(&mut self) -> Result<Arc<References>> {
        if let Some(refs) = &self.refs {
            return Ok(refs.clone());
        }
        let embedder = self.ports.embedder.as_ref();
        let domains = ReferenceSet::from_templates(
            embedder,
            &self.config.dataset.domains,
            &self.config.dataset.domain_templates,
        )
        .await
        .context("Failed to build domain references")?;
        let templates: Vec<String> = LABEL_TEMPLATES.iter().map(|t| t.to_string()).collect();
        let labels = ReferenceSet::from_templates(embedder, &self.vocabulary.labels, &templates)
            .await
            .context("Failed to build label references")?;

        tracing::info!(
            domains = domains.len(),
            labels = labels.len(),
            "reference sets built"
        );
        let refs = Arc::new(References {
            domains,
            labels,
            vocabulary: LabelVocabulary::new(self.vocabulary.labels.iter()),
        });
        self.refs = Some(refs.clone());
        Ok(refs)
    }

    async fn process_archive(
        &mut self,
        pool: &mut ParsePool,
        archive: &Archive,
        cancel: &CancellationToken,
        progress: &dyn IngestProgressReporter,
    ) -> Result<ArchiveTally> {
        let mut tally = ArchiveTally::default();
        let total = archive.files.len() as u64;
        let batch_size = self.config.ingest.batch_size;
        let mut buffer: Vec<Pending> = Vec::with_capacity(batch_size);

        let mut feeder = pool.feed(archive.files.clone(), cancel.clone());
        let mut expected: Option<usize> = None;
        let mut received = 0usize;

        loop {
            if expected.is_some_and(|e| received >= e) {
                break;
            }
            tokio::select! {
                submitted = &mut feeder, if expected.is_none() => {
                    expected = Some(submitted.context("file feeder stopped")?);
                }
                outcome = pool.next() => {
                    let Some(outcome) = outcome else {
                        break;
                    };
                    received += 1;
                    self.report.files_scanned += 1;
                    match outcome {
                        ParseOutcome::Parsed { file_hash, docs, .. } => {
                            for (i, doc) in docs.into_iter().enumerate() {
                                let content_hash = if i == 0 {
                                    file_hash.clone()
                                } else {
                                    format!("{}:{}", file_hash, i)
                                };
                                if !self.seen.insert(content_hash.clone()) {
                                    tracing::debug!(hash = %content_hash, "duplicate content skipped");
                                    self.report.duplicates_skipped += 1;
                                    continue;
                                }
                                buffer.push(Pending { doc, content_hash });
                            }
                        }
                        ParseOutcome::Skipped { .. } => self.report.files_already_indexed += 1,
                        ParseOutcome::Failed { path, error } => {
                            tracing::warn!(path = %path.display(), error = %error, "file skipped");
                            self.report.files_failed += 1;
                        }
                    }

                    if buffer.len() >= batch_size {
                        self.report.throttled += self.monitor.throttle(cancel).await;
                        let batch = std::mem::take(&mut buffer);
                        self.flush(batch, &mut tally).await?;
                    }
                    if received as u64 % PROGRESS_EVERY == 0 {
                        progress.report(IngestProgressEvent::Ingesting {
                            archive: archive.name.clone(),
                            n: received as u64,
                            total,
                            indexed: self.report.records_indexed,
                        });
                    }
                }
            }
        }

        if !buffer.is_empty() {
            self.flush(buffer, &mut tally).await?;
        }
        progress.report(IngestProgressEvent::Ingesting {
            archive: archive.name.clone(),
            n: received as u64,
            total,
            indexed: self.report.records_indexed,
        });

        // A cancelled archive is incomplete.
        if (received as u64) < total {
            tally.failed_batch = true;
        }
        Ok(tally)
    }

    /// Embed, classify and write one batch.
    async fn flush(&mut self, batch: Vec<Pending>, tally: &mut ArchiveTally) -> Result<()> {
        let refs = self.references().await?;
        let embedded = self.embed_batch(batch).await;
        if embedded.is_empty() {
            return Ok(());
        }

        let (pending, vectors): (Vec<Pending>, Vec<RecordVectors>) = embedded.into_iter().unzip();
        let (docs, hashes): (Vec<Document>, Vec<String>) = pending
            .into_iter()
            .map(|p| (p.doc, p.content_hash))
            .unzip();
        if let Err(e) = self.cascade.prefetch_contexts(&docs, &self.root).await {
            tracing::warn!(error = %e, "context prefetch failed, classifying one by one");
        }

        let excerpt_chars = self.config.ingest.excerpt_chars;
        let mut records = Vec::with_capacity(docs.len());
        let mut kept_vectors = Vec::with_capacity(docs.len());
        for ((doc, content_hash), v) in docs.iter().zip(hashes).zip(vectors) {
            let classification = match self.cascade.classify(doc, &refs, &self.root, &v.primary).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(source = %doc.source_path.display(), error = %e, "classification failed");
                    self.report.documents_failed += 1;
                    continue;
                }
            };
            let source = doc
                .source_path
                .strip_prefix(&self.root)
                .unwrap_or(&doc.source_path)
                .to_string_lossy()
                .to_string();
            records.push(IngestionRecord {
                local_id: None,
                domain: classification.domain.clone(),
                label: classification.label.clone(),
                source,
                content_hash,
                domain_score: classification.confidence,
                content_excerpt: doc.text_sample(excerpt_chars),
                kind: doc.kind,
                extra: serde_json::json!({
                    "domain_method": classification.method.as_str(),
                    "label_method": classification.label_method.as_str(),
                    "label_confidence": classification.label_confidence,
                }),
            });
            kept_vectors.push(v);
        }
        if records.is_empty() {
            return Ok(());
        }

        let store = self.ports.store.clone();
        let written = self
            .policy
            .run("add_documents", || store.add_documents(&records, &kept_vectors))
            .await;

        match written {
            Ok(n) if n < records.len() => {
                // Rows written by someone else meanwhile; which of ours
                // landed is unknown, so they stay out of the tallies.
                tracing::warn!(
                    inserted = n,
                    records = records.len(),
                    "store already held some records of this batch"
                );
                self.report.records_indexed += n as u64;
            }
            Ok(n) => {
                self.report.records_indexed += n as u64;
                for record in &records {
                    tally.record(&record.domain, record.domain_score);
                    *self
                        .report
                        .records_by_domain
                        .entry(record.domain.clone())
                        .or_insert(0) += 1;
                }
            }
            Err(e) => {
                tracing::error!(records = records.len(), error = %e, "batch dropped after retries");
                self.report.batches_dropped += 1;
                tally.failed_batch = true;
            }
        }
        Ok(())
    }

    /// Batch embedding with a per-document fallback; documents that cannot
    /// be embedded are logged and dropped.
    async fn embed_batch(&mut self, batch: Vec<Pending>) -> Vec<(Pending, RecordVectors)> {
        match self.embed_all(&batch).await {
            Ok(vectors) => return batch.into_iter().zip(vectors).collect(),
            Err(e) => {
                tracing::warn!(docs = batch.len(), error = %e, "batch embedding failed, retrying per document");
            }
        }

        let mut out = Vec::with_capacity(batch.len());
        for pending in batch {
            match self.embed_all(std::slice::from_ref(&pending)).await {
                Ok(mut vectors) => {
                    if let Some(v) = vectors.pop() {
                        out.push((pending, v));
                    }
                }
                Err(e) => {
                    tracing::warn!(source = %pending.doc.source_path.display(), error = %e, "embedding failed, document skipped");
                    self.report.documents_failed += 1;
                }
            }
        }
        out
    }

    async fn embed_all(&self, batch: &[Pending]) -> Result<Vec<RecordVectors>> {
        let sample_chars = self.config.ingest.excerpt_chars;
        let mut texts = Vec::new();
        let mut text_idx = Vec::new();
        let mut images = Vec::new();
        let mut image_idx = Vec::new();
        let mut ocr_texts = Vec::new();
        let mut ocr_idx = Vec::new();

        for (i, p) in batch.iter().enumerate() {
            match &p.doc.content {
                DocumentContent::Image { path, ocr_text } => {
                    images.push(path.clone());
                    image_idx.push(i);
                    let ocr_text = ocr_text.trim();
                    if ocr_text.chars().count() > MIN_OCR_CHARS {
                        ocr_texts.push(truncate_chars(ocr_text, sample_chars));
                        ocr_idx.push(i);
                    }
                }
                _ => {
                    texts.push(p.doc.text_sample(sample_chars));
                    text_idx.push(i);
                }
            }
        }

        let embedder = &self.ports.embedder;
        let text_vecs = embed_checked(texts.len(), || embedder.embed_texts(&texts)).await?;
        let image_vecs = embed_checked(images.len(), || embedder.embed_images(&images)).await?;
        let ocr_vecs = embed_checked(ocr_texts.len(), || embedder.embed_texts(&ocr_texts)).await?;

        let mut out: Vec<Option<RecordVectors>> = vec![None; batch.len()];
        for (i, primary) in text_idx.into_iter().zip(text_vecs) {
            out[i] = Some(RecordVectors {
                primary,
                visual: None,
            });
        }
        let mut ocr_by_idx: HashMap<usize, Vec<f32>> = ocr_idx.into_iter().zip(ocr_vecs).collect();
        for (i, visual) in image_idx.into_iter().zip(image_vecs) {
            let primary = ocr_by_idx
                .remove(&i)
                .and_then(|t| mean_normalized(&[visual.as_slice(), t.as_slice()]))
                .unwrap_or_else(|| visual.clone());
            out[i] = Some(RecordVectors {
                primary,
                visual: Some(visual),
            });
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| anyhow::anyhow!("missing vector in batch")))
            .collect()
    }
}

async fn embed_checked<F, Fut>(expected: usize, call: F) -> Result<Vec<Vec<f32>>>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Vec<f32>>>>,
{
    if expected == 0 {
        return Ok(Vec::new());
    }
    let vectors = call().await?;
    if vectors.len() != expected {
        anyhow::bail!(
            "embedding backend returned {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    Ok(vectors)
}

/// `trove ingest`: run once, print a summary, handle Ctrl-C.
pub async fn run_ingest(config: &Config, mode: IngestMode, progress: ProgressMode) -> Result<()> {
    let ports = IngestPorts::from_config(config).await?;
    let cancel = CancellationToken::new();
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received, flushing the current batch...");
                cancel.cancel();
            }
        })
    };

    let reporter = progress.reporter();
    let result = ingest_dataset(config, &ports, mode, cancel, reporter.as_ref()).await;
    signal.abort();
    let report = result?;
    print_summary(&report, &config.dataset.root);
    Ok(())
}

fn print_summary(report: &IngestReport, root: &Path) {
    let secs = report.elapsed.as_secs_f64().max(0.001);
    println!("ingest {}", root.display());
    println!(
        "  archives: {} ({} unchanged, {} sealed)",
        report.archives, report.archives_unchanged, report.archives_sealed
    );
    println!("  files scanned: {}", format_number(report.files_scanned));
    println!(
        "  files already indexed: {}",
        format_number(report.files_already_indexed)
    );
    if report.files_failed > 0 || report.documents_failed > 0 {
        println!(
            "  failed: {} files, {} documents",
            report.files_failed, report.documents_failed
        );
    }
    if report.duplicates_skipped > 0 {
        println!("  duplicates skipped: {}", format_number(report.duplicates_skipped));
    }
    println!("  records indexed: {}", format_number(report.records_indexed));
    let mut domains: Vec<_> = report.records_by_domain.iter().collect();
    domains.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (domain, count) in domains {
        println!("    {}: {}", domain, format_number(*count));
    }
    if report.batches_dropped > 0 {
        println!("  batches dropped: {}", report.batches_dropped);
    }
    println!(
        "  elapsed: {:.1}s ({:.1} files/s)",
        secs,
        report.files_scanned as f64 / secs
    );
    if report.cancelled {
        println!(
            "interrupted: {} records saved; run `trove ingest --mode complete` to resume",
            format_number(report.records_indexed)
        );
    } else {
        println!("ok");
    }
}
