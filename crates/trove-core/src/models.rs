//! Core data models used throughout Trove.
//!
//! These types represent the documents, records, folder contracts, and
//! classification outcomes that flow through the ingestion and retrieval
//! pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Domain and label name used when nothing could be decided.
pub const UNKNOWN: &str = "unknown";

/// File family a document was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Image,
    Csv,
    Tsv,
    Json,
    Text,
    Pdf,
    Hdf5,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 7] = [
        DocumentKind::Image,
        DocumentKind::Csv,
        DocumentKind::Tsv,
        DocumentKind::Json,
        DocumentKind::Text,
        DocumentKind::Pdf,
        DocumentKind::Hdf5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Image => "image",
            DocumentKind::Csv => "csv",
            DocumentKind::Tsv => "tsv",
            DocumentKind::Json => "json",
            DocumentKind::Text => "text",
            DocumentKind::Pdf => "pdf",
            DocumentKind::Hdf5 => "hdf5",
        }
    }

    /// Results of visual kinds count against the visual-confirmation quota.
    pub fn is_visual(&self) -> bool {
        matches!(self, DocumentKind::Image)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown document kind: {}", s))
    }
}

/// Payload of a parsed document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentContent {
    /// Free text (plain text files, list lines, PDF text).
    Text(String),
    /// Ordered `(field, value)` pairs from a tabular or structured source.
    Record(Vec<(String, String)>),
    /// An image on disk plus the OCR text extracted by the worker.
    Image { path: PathBuf, ocr_text: String },
}

/// A unit of content produced by a loader.
///
/// Documents are transient: produced by a parser, consumed once by the
/// cascade, then discarded.
#[derive(Debug, Clone)]
pub struct Document {
    pub source_path: PathBuf,
    pub content: DocumentContent,
    pub suggested_label: Option<String>,
    pub suggested_domain: Option<String>,
    pub kind: DocumentKind,
}

impl Document {
    pub fn new(source_path: impl Into<PathBuf>, kind: DocumentKind, content: DocumentContent) -> Self {
        Self {
            source_path: source_path.into(),
            content,
            suggested_label: None,
            suggested_domain: None,
            kind,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.suggested_label = Some(label.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.suggested_domain = Some(domain.into());
        self
    }

    /// Field names for structured content, empty otherwise.
    pub fn field_names(&self) -> Vec<&str> {
        match &self.content {
            DocumentContent::Record(fields) => fields.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// OCR text for images, `None` for other kinds.
    pub fn ocr_text(&self) -> Option<&str> {
        match &self.content {
            DocumentContent::Image { ocr_text, .. } => Some(ocr_text.as_str()),
            _ => None,
        }
    }

    /// Image path for image documents.
    pub fn image_path(&self) -> Option<&Path> {
        match &self.content {
            DocumentContent::Image { path, .. } => Some(path.as_path()),
            _ => None,
        }
    }

    /// Flattened textual view of the content, truncated to `max_chars`.
    ///
    /// Records render as `field: value` pairs joined by `", "`. Images
    /// render as their OCR text.
    pub fn text_sample(&self, max_chars: usize) -> String {
        let full = match &self.content {
            DocumentContent::Text(text) => text.clone(),
            DocumentContent::Record(fields) => fields
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join(", "),
            DocumentContent::Image { ocr_text, .. } => ocr_text.clone(),
        };
        truncate_chars(full.trim(), max_chars)
    }
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// A classified, embedded document as persisted in the vector store.
///
/// Created once per unique `content_hash`; re-ingesting an identical hash
/// is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
    /// Store-assigned row id, `None` until persisted.
    pub local_id: Option<i64>,
    pub domain: String,
    pub label: String,
    /// Source file path, relative to the dataset root.
    pub source: String,
    pub content_hash: String,
    pub domain_score: f32,
    pub content_excerpt: String,
    pub kind: DocumentKind,
    /// Classification provenance and loader extras (JSON object).
    pub extra: serde_json::Value,
}

/// Folder fingerprint: file count, total byte size, newest mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FolderSignature {
    pub file_count: u64,
    pub total_size: u64,
    pub max_mtime: i64,
}

impl fmt::Display for FolderSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file_count, self.total_size, self.max_mtime)
    }
}

impl FromStr for FolderSignature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            anyhow::bail!("invalid folder signature: {}", s);
        }
        Ok(Self {
            file_count: parts[0].parse()?,
            total_size: parts[1].parse()?,
            max_mtime: parts[2].parse()?,
        })
    }
}

/// A cached decision for an entire archive sub-tree.
///
/// Valid only while `content_signature` matches the live folder; any
/// mismatch invalidates the whole contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderContract {
    pub folder_path: String,
    pub content_signature: FolderSignature,
    pub domain: String,
    pub confidence: f32,
    pub verified: bool,
    /// Unix seconds when the contract was sealed.
    pub sealed_at: i64,
}

impl FolderContract {
    pub fn matches(&self, live: &FolderSignature) -> bool {
        self.content_signature == *live
    }
}

/// How the domain of a document was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainMethod {
    Explicit,
    Structural,
    Fusion,
    Arbitrated,
    Rejected,
}

impl DomainMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainMethod::Explicit => "explicit",
            DomainMethod::Structural => "structural",
            DomainMethod::Fusion => "fusion",
            DomainMethod::Arbitrated => "arbitrated",
            DomainMethod::Rejected => "rejected",
        }
    }
}

/// How the label of a document was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMethod {
    Explicit,
    Mapping,
    Cached,
    Vocabulary,
    Schema,
    Structural,
    Keyword,
    Semantic,
    Arbitrated,
    Fallback,
    Rejected,
}

impl LabelMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelMethod::Explicit => "explicit",
            LabelMethod::Mapping => "mapping",
            LabelMethod::Cached => "cached",
            LabelMethod::Vocabulary => "vocabulary",
            LabelMethod::Schema => "schema",
            LabelMethod::Structural => "structural",
            LabelMethod::Keyword => "keyword",
            LabelMethod::Semantic => "semantic",
            LabelMethod::Arbitrated => "arbitrated",
            LabelMethod::Fallback => "fallback",
            LabelMethod::Rejected => "rejected",
        }
    }
}

/// Outcome of the classification cascade for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub domain: String,
    pub label: String,
    /// Domain confidence in `[0, 1]`.
    pub confidence: f32,
    pub method: DomainMethod,
    pub label_method: LabelMethod,
    pub label_confidence: f32,
}
