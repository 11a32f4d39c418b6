//! Per-run caches owned by the classification cascade.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Memoized decisions that are valid for one dataset run.
///
/// - schema columns: directory → label column chosen for its structured files
/// - file labels: lowercase file name → label from a mapping file
/// - context vectors: path/field context string → embedding (bounded)
#[derive(Debug, Default)]
pub struct CascadeCache {
    schema_columns: HashMap<PathBuf, String>,
    schema_attempted: HashSet<PathBuf>,
    file_labels: HashMap<String, String>,
    context_vectors: HashMap<String, Vec<f32>>,
    context_capacity: usize,
}

impl CascadeCache {
    pub fn new(context_capacity: usize) -> Self {
        Self {
            context_capacity,
            ..Default::default()
        }
    }

    /// Drop everything. Called between dataset runs.
    pub fn reset(&mut self) {
        self.schema_columns.clear();
        self.schema_attempted.clear();
        self.file_labels.clear();
        self.context_vectors.clear();
    }

    pub fn schema_column(&self, dir: &Path) -> Option<&str> {
        self.schema_columns.get(dir).map(|s| s.as_str())
    }

    pub fn set_schema_column(&mut self, dir: &Path, column: &str) {
        self.schema_columns
            .insert(dir.to_path_buf(), column.to_string());
    }

    /// Record that schema arbitration ran for `dir`. Returns `false` when
    /// it had already been attempted.
    pub fn mark_schema_attempt(&mut self, dir: &Path) -> bool {
        self.schema_attempted.insert(dir.to_path_buf())
    }

    pub fn file_label(&self, file_name: &str) -> Option<&str> {
        self.file_labels
            .get(&file_name.to_lowercase())
            .map(|s| s.as_str())
    }

    pub fn load_file_labels<I>(&mut self, mappings: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (file, label) in mappings {
            self.file_labels.insert(file.to_lowercase(), label);
        }
    }

    pub fn context_vector(&self, context: &str) -> Option<&[f32]> {
        self.context_vectors.get(context).map(|v| v.as_slice())
    }

    pub fn insert_context_vector(&mut self, context: String, vector: Vec<f32>) {
        if self.context_vectors.len() >= self.context_capacity {
            self.context_vectors.clear();
        }
        self.context_vectors.insert(context, vector);
    }

    pub fn context_len(&self) -> usize {
        self.context_vectors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_all() {
        let mut cache = CascadeCache::new(8);
        cache.set_schema_column(Path::new("menus"), "dish");
        cache.load_file_labels(vec![("A.JPG".to_string(), "sushi".to_string())]);
        cache.insert_context_vector("menus".into(), vec![1.0]);
        assert_eq!(cache.file_label("a.jpg"), Some("sushi"));
        assert_eq!(cache.schema_column(Path::new("menus")), Some("dish"));

        cache.reset();
        assert_eq!(cache.file_label("a.jpg"), None);
        assert_eq!(cache.schema_column(Path::new("menus")), None);
        assert_eq!(cache.context_len(), 0);
    }

    #[test]
    fn test_context_capacity_bound() {
        let mut cache = CascadeCache::new(2);
        cache.insert_context_vector("a".into(), vec![1.0]);
        cache.insert_context_vector("b".into(), vec![1.0]);
        cache.insert_context_vector("c".into(), vec![1.0]);
        assert!(cache.context_len() <= 2);
        assert!(cache.context_vector("c").is_some());
    }

    #[test]
    fn test_schema_attempt_once() {
        let mut cache = CascadeCache::new(2);
        assert!(cache.mark_schema_attempt(Path::new("x")));
        assert!(!cache.mark_schema_attempt(Path::new("x")));
    }
}
