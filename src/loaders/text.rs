//! Plain text and Markdown.
//!
//! Short-line files (fewer than 15 words per line on average over the
//! first 20 lines, more than two lines) are treated as lists: each line
//! becomes a document whose text is also its suggested label. Anything
//! else is one document.

use std::path::Path;

use trove_core::models::{Document, DocumentContent, DocumentKind};

use super::{LoadError, WorkerContext};

const LIST_MAX_AVG_WORDS: f32 = 15.0;
const LIST_SAMPLE_LINES: usize = 20;

pub fn load(path: &Path, ctx: &WorkerContext) -> Result<Vec<Document>, LoadError> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();

    if is_list(&lines) {
        return Ok(lines
            .iter()
            .map(|l| clean(l))
            .filter(|l| l.chars().count() > 2)
            .take(ctx.settings.max_records_per_file)
            .map(|l| Document::new(path, DocumentKind::Text, DocumentContent::Text(l.clone())).with_label(l))
            .collect());
    }

    let body = clean(&text);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![Document::new(path, DocumentKind::Text, DocumentContent::Text(body))])
}

fn is_list(lines: &[&str]) -> bool {
    if lines.len() <= 2 {
        return false;
    }
    let sample = &lines[..lines.len().min(LIST_SAMPLE_LINES)];
    let words: usize = sample.iter().map(|l| l.split_whitespace().count()).sum();
    (words as f32 / sample.len() as f32) < LIST_MAX_AVG_WORDS
}

/// Collapse whitespace runs and drop control characters.
fn clean(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
