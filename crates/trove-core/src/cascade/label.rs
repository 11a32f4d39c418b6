//! Label resolution.
//!
//! Structured records and raw content (text, PDF, images) take different
//! paths; both end in `unknown` when every step fails.

use std::collections::HashSet;
use std::path::Path;

use super::noise::{contains_word, is_label_noisy, is_technical_folder, normalize_label};
use super::{Cascade, CascadeError, References};
use crate::models::{Document, DocumentContent, LabelMethod, UNKNOWN};

/// Header words that usually mark the label column of a table.
pub const MAGIC_COLUMNS: [&str; 9] = [
    "name",
    "label",
    "category",
    "product",
    "title",
    "presentation",
    "chemical",
    "titre",
    "nom",
];

/// Labels discovered for the current dataset, longest first.
#[derive(Debug, Clone, Default)]
pub struct LabelVocabulary {
    labels: Vec<String>,
    set: HashSet<String>,
}

impl LabelVocabulary {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        let mut out = Vec::new();
        for label in labels {
            let norm = normalize_label(label.as_ref());
            if !norm.is_empty() && set.insert(norm.clone()) {
                out.push(norm);
            }
        }
        out.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
        Self { labels: out, set }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn contains(&self, label: &str) -> bool {
        self.set.contains(label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// First (longest) vocabulary label occurring in `text` as whole words.
    pub fn find_in(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.labels
            .iter()
            .find(|l| contains_word(&lower, l))
            .map(|l| l.as_str())
    }
}

type LabelOutcome = (String, LabelMethod, f32);

fn rejected() -> LabelOutcome {
    (UNKNOWN.to_string(), LabelMethod::Rejected, 0.0)
}

impl Cascade {
    fn clean(&self, raw: &str) -> Option<String> {
        let norm = normalize_label(raw);
        (!is_label_noisy(&norm, self.config.label_min_length)).then_some(norm)
    }

    pub(super) async fn resolve_label(
        &mut self,
        doc: &Document,
        refs: &References,
        root: &Path,
        payload: &[f32],
    ) -> Result<LabelOutcome, CascadeError> {
        if let Some(label) = doc.suggested_label.as_deref().and_then(|l| self.clean(l)) {
            return Ok((label, LabelMethod::Explicit, 1.0));
        }

        match &doc.content {
            DocumentContent::Record(fields) => Ok(self.structured_label(doc, fields, refs).await),
            _ => self.raw_label(doc, refs, root, payload).await,
        }
    }

    async fn structured_label(
        &mut self,
        doc: &Document,
        fields: &[(String, String)],
        refs: &References,
    ) -> LabelOutcome {
        let dir = doc
            .source_path
            .parent()
            .unwrap_or(Path::new(""))
            .to_path_buf();

        if let Some(column) = self.cache.schema_column(&dir).map(str::to_string) {
            if let Some(label) = field_value(fields, &column).and_then(|v| self.clean(v)) {
                return (label, LabelMethod::Cached, 0.9);
            }
        }

        for (_, value) in fields {
            let norm = normalize_label(value);
            if refs.vocabulary.contains(&norm) {
                return (norm, LabelMethod::Vocabulary, 0.9);
            }
        }

        for (key, value) in fields {
            let header = key.to_lowercase();
            if MAGIC_COLUMNS.iter().any(|m| header.contains(m)) {
                if let Some(label) = self.clean(value) {
                    self.cache.set_schema_column(&dir, key);
                    return (label, LabelMethod::Schema, 0.8);
                }
            }
        }

        if self.cache.mark_schema_attempt(&dir) {
            let sample: Vec<(String, String)> = fields.iter().take(20).cloned().collect();
            if let Some(verdict) = self.arbiter.resolve_schema(&sample).await {
                if let Some(column) = verdict.label_column {
                    if let Some(label) = field_value(fields, &column).and_then(|v| self.clean(v)) {
                        self.cache.set_schema_column(&dir, &column);
                        return (label, LabelMethod::Arbitrated, 0.7);
                    }
                }
            }
        }

        for (_, value) in fields {
            if let Some(label) = self.clean(value) {
                return (label, LabelMethod::Fallback, 0.4);
            }
        }

        rejected()
    }

    async fn raw_label(
        &mut self,
        doc: &Document,
        refs: &References,
        root: &Path,
        payload: &[f32],
    ) -> Result<LabelOutcome, CascadeError> {
        if let Some(name) = doc.source_path.file_name().map(|n| n.to_string_lossy()) {
            if let Some(label) = self.cache.file_label(&name).map(str::to_string) {
                return Ok((label, LabelMethod::Mapping, 1.0));
            }
        }

        if let Some(label) = self.folder_or_file_label(doc, root) {
            return Ok((label, LabelMethod::Structural, 0.8));
        }

        let sample = doc.text_sample(self.config.sample_chars);
        if let Some(label) = refs.vocabulary.find_in(&sample) {
            return Ok((label.to_string(), LabelMethod::Keyword, 0.75));
        }

        if !refs.labels.is_empty() {
            if let Some((idx, sim)) = refs.labels.best(payload)? {
                if sim >= self.config.label_semantic_threshold {
                    return Ok((refs.labels.name(idx).to_string(), LabelMethod::Semantic, sim));
                }
            }
        }

        if !sample.is_empty() {
            if let Some(verdict) = self.arbiter.refine_label(&sample, UNKNOWN).await {
                if let Some(label) = self.clean(&verdict.label) {
                    return Ok((label, LabelMethod::Arbitrated, 0.7));
                }
            }
        }

        Ok(rejected())
    }

    /// Folder-vs-filename arbitration.
    ///
    /// The nearest enclosing folder that is not a technical folder wins
    /// when its name is clean; otherwise a clean file stem wins.
    fn folder_or_file_label(&self, doc: &Document, root: &Path) -> Option<String> {
        let rel = doc.source_path.strip_prefix(root).unwrap_or(&doc.source_path);

        let folder = rel.parent().and_then(|parent| {
            parent
                .components()
                .rev()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .find(|name| !is_technical_folder(name))
        });
        if let Some(label) = folder.and_then(|f| self.clean(&f)) {
            return Some(label);
        }

        rel.file_stem()
            .and_then(|stem| self.clean(&stem.to_string_lossy()))
    }
}

fn field_value<'a>(fields: &'a [(String, String)], column: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(column))
        .map(|(_, v)| v.as_str())
}
