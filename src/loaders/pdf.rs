use std::path::Path;

use trove_core::models::{Document, DocumentContent, DocumentKind};

use super::{LoadError, WorkerContext};

/// Whole-document text; a PDF without extractable text yields nothing.
pub fn load(path: &Path, _ctx: &WorkerContext) -> Result<Vec<Document>, LoadError> {
    let bytes = std::fs::read(path)?;
    let text = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| LoadError::Pdf(e.to_string()))?;
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![Document::new(path, DocumentKind::Pdf, DocumentContent::Text(text))])
}
