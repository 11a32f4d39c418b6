//! CSV and TSV: one structured document per row.

use std::path::Path;

use trove_core::models::{Document, DocumentContent, DocumentKind};

use super::{LoadError, WorkerContext};

/// Columns whose value is taken as the row's suggested label, in order.
const LABEL_COLUMNS: [&str; 5] = ["Item", "Product", "Name", "Title", "Label"];

pub fn load_csv(path: &Path, ctx: &WorkerContext) -> Result<Vec<Document>, LoadError> {
    load_delimited(path, ctx, b',', DocumentKind::Csv)
}

pub fn load_tsv(path: &Path, ctx: &WorkerContext) -> Result<Vec<Document>, LoadError> {
    load_delimited(path, ctx, b'\t', DocumentKind::Tsv)
}

fn load_delimited(
    path: &Path,
    ctx: &WorkerContext,
    delimiter: u8,
    kind: DocumentKind,
) -> Result<Vec<Document>, LoadError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut docs = Vec::new();

    for row in reader.records() {
        if docs.len() >= ctx.settings.max_records_per_file {
            tracing::debug!(path = %path.display(), "row limit reached");
            break;
        }
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping malformed row");
                continue;
            }
        };

        let fields: Vec<(String, String)> = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        if fields.is_empty() {
            continue;
        }

        let suggested = LABEL_COLUMNS.iter().find_map(|col| {
            fields
                .iter()
                .find(|(k, v)| k == col && v.chars().count() > 2)
                .map(|(_, v)| v.to_lowercase())
        });

        let mut doc = Document::new(path, kind, DocumentContent::Record(fields));
        if let Some(label) = suggested {
            doc = doc.with_label(label);
        }
        docs.push(doc);
    }

    Ok(docs)
}
