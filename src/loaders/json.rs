//! JSON: an array yields one document per object element; a top-level
//! object yields a single document.

use serde_json::Value;
use std::path::Path;

use trove_core::models::{Document, DocumentContent, DocumentKind};

use super::{LoadError, WorkerContext};

pub fn load(path: &Path, ctx: &WorkerContext) -> Result<Vec<Document>, LoadError> {
    let bytes = std::fs::read(path)?;
    let value: Value = serde_json::from_slice(&bytes)?;

    let objects: Vec<&serde_json::Map<String, Value>> = match &value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_object())
            .take(ctx.settings.max_records_per_file)
            .collect(),
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    };

    Ok(objects
        .into_iter()
        .map(|map| {
            let fields = map
                .iter()
                .map(|(k, v)| (k.clone(), scalar_text(v)))
                .filter(|(_, v)| !v.is_empty())
                .collect();
            Document::new(path, DocumentKind::Json, DocumentContent::Record(fields))
        })
        .collect())
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
