//! File-family loaders: one file in, zero or more [`Document`]s out.
//!
//! The file family is the closed [`DocumentKind`] enum, chosen by
//! extension in [`kind_for_path`]; [`loader_for`] is the dispatch table.
//! Loaders run on parse worker threads and receive the worker's
//! [`WorkerContext`]. A loader error never escapes [`load`]: it is logged
//! and the file yields no documents.

pub mod csv;
pub mod hdf5;
pub mod image;
pub mod json;
pub mod pdf;
pub mod text;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use trove_core::models::{Document, DocumentKind};
use trove_core::ocr::OcrPort;

/// Loader failure; the pipeline logs it and skips the file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV parse failed: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("HDF5 read failed: {0}")]
    Hdf5(String),
}

/// Per-file limits handed to every loader.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// Rows/elements kept per tabular or array file.
    pub max_records_per_file: usize,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            max_records_per_file: 50_000,
        }
    }
}

/// Everything a parse worker owns for its lifetime. Built once per worker
/// thread by the pool's init hook.
#[derive(Clone)]
pub struct WorkerContext {
    pub ocr: Arc<dyn OcrPort>,
    pub settings: LoaderSettings,
}

pub type LoadFn = fn(&Path, &WorkerContext) -> Result<Vec<Document>, LoadError>;

/// File family for a path, by lowercase extension.
pub fn kind_for_path(path: &Path) -> Option<DocumentKind> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "webp" | "bmp" | "gif" | "tif" | "tiff" => Some(DocumentKind::Image),
        "csv" => Some(DocumentKind::Csv),
        "tsv" => Some(DocumentKind::Tsv),
        "json" => Some(DocumentKind::Json),
        "txt" | "md" => Some(DocumentKind::Text),
        "pdf" => Some(DocumentKind::Pdf),
        "h5" | "hdf5" => Some(DocumentKind::Hdf5),
        _ => None,
    }
}

pub fn loader_for(kind: DocumentKind) -> LoadFn {
    match kind {
        DocumentKind::Image => image::load,
        DocumentKind::Csv => csv::load_csv,
        DocumentKind::Tsv => csv::load_tsv,
        DocumentKind::Json => json::load,
        DocumentKind::Text => text::load,
        DocumentKind::Pdf => pdf::load,
        DocumentKind::Hdf5 => hdf5::load,
    }
}

/// Parse one file. Unsupported extensions and loader errors yield an
/// empty list.
pub fn load(path: &Path, ctx: &WorkerContext) -> Vec<Document> {
    let Some(kind) = kind_for_path(path) else {
        return Vec::new();
    };
    match loader_for(kind)(path, ctx) {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!(path = %path.display(), kind = %kind, error = %e, "skipping unreadable file");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trove_core::ocr::NoOcr;

    pub(crate) fn ctx() -> WorkerContext {
        WorkerContext {
            ocr: Arc::new(NoOcr),
            settings: LoaderSettings::default(),
        }
    }

    #[test]
    fn test_kind_for_path() {
        assert_eq!(kind_for_path(Path::new("a/B.JPG")), Some(DocumentKind::Image));
        assert_eq!(kind_for_path(Path::new("menu.tsv")), Some(DocumentKind::Tsv));
        assert_eq!(kind_for_path(Path::new("notes.md")), Some(DocumentKind::Text));
        assert_eq!(kind_for_path(Path::new("x.hdf5")), Some(DocumentKind::Hdf5));
        assert_eq!(kind_for_path(Path::new("archive.zip")), None);
        assert_eq!(kind_for_path(Path::new("README")), None);
    }

    #[test]
    fn test_load_errors_become_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bad = tmp.path().join("broken.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(load(&bad, &ctx()).is_empty());
        assert!(load(&tmp.path().join("missing.csv"), &ctx()).is_empty());
    }
}
