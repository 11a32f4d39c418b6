//! Label vocabulary discovery.
//!
//! Runs once per ingestion run, before scanning. Two sources:
//!
//! - **Leaf folders**: every directory that directly holds files. A name
//!   is kept when it is not a technical folder, passes the noise filter
//!   and (for trees with at least [`FREQUENCY_MIN_FOLDERS`] leaves) is not
//!   repeated across 15% or more of them. Repetition marks structure
//!   (`train/`, `2021/`) rather than content.
//! - **Mapping files**: `.txt`/`.csv` files whose name contains `label`,
//!   `mapping` or `meta`. Lines `file=label` or `file:label` (also
//!   `file,label` in CSV) map a file name to its label; any other line of
//!   at least `min_len` characters is a bare vocabulary entry.

use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use walkdir::WalkDir;

use trove_core::cascade::noise::{is_label_noisy, is_technical_folder, normalize_label};

use crate::scan::is_hidden;

const MAPPING_MARKERS: [&str; 3] = ["label", "mapping", "meta"];
const FREQUENCY_CUTOFF: f32 = 0.15;
pub const FREQUENCY_MIN_FOLDERS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct DiscoveredVocabulary {
    /// Normalized labels, sorted.
    pub labels: Vec<String>,
    /// `(file name, label)` pairs from mapping files, both lowercase.
    pub file_labels: Vec<(String, String)>,
}

pub fn is_mapping_file(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return false;
    };
    (name.ends_with(".txt") || name.ends_with(".csv"))
        && MAPPING_MARKERS.iter().any(|m| name.contains(m))
}

pub fn discover(root: &Path, min_len: usize) -> Result<DiscoveredVocabulary> {
    let mut labels: BTreeSet<String> = BTreeSet::new();
    let mut file_labels: Vec<(String, String)> = Vec::new();
    let mut leaf_counts: HashMap<String, usize> = HashMap::new();
    let mut leaf_total = 0usize;

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()));

    let mut dirs_with_files: BTreeSet<std::path::PathBuf> = BTreeSet::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(parent) = entry.path().parent() {
            if parent != root {
                dirs_with_files.insert(parent.to_path_buf());
            }
        }
        if is_mapping_file(entry.path()) {
            match std::fs::read_to_string(entry.path()) {
                Ok(content) => {
                    let is_csv = entry.path().extension().is_some_and(|e| e.eq_ignore_ascii_case("csv"));
                    parse_mapping(&content, is_csv, min_len, &mut labels, &mut file_labels);
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "unreadable mapping file");
                }
            }
        }
    }

    for dir in &dirs_with_files {
        if let Some(name) = dir.file_name() {
            *leaf_counts.entry(normalize_label(&name.to_string_lossy())).or_insert(0) += 1;
            leaf_total += 1;
        }
    }

    let apply_frequency = leaf_total >= FREQUENCY_MIN_FOLDERS;
    for (name, count) in leaf_counts {
        if name.is_empty() || is_technical_folder(&name) || is_label_noisy(&name, min_len) {
            continue;
        }
        if apply_frequency && count as f32 / leaf_total as f32 >= FREQUENCY_CUTOFF {
            continue;
        }
        labels.insert(name);
    }

    tracing::info!(
        labels = labels.len(),
        mapped_files = file_labels.len(),
        "label vocabulary discovered"
    );

    Ok(DiscoveredVocabulary {
        labels: labels.into_iter().collect(),
        file_labels,
    })
}

fn parse_mapping(
    content: &str,
    is_csv: bool,
    min_len: usize,
    labels: &mut BTreeSet<String>,
    file_labels: &mut Vec<(String, String)>,
) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let split = line
            .split_once('=')
            .or_else(|| line.split_once(':'))
            .or_else(|| if is_csv { line.split_once(',') } else { None });

        match split {
            Some((file, label)) => {
                let file = file.trim().to_lowercase();
                let label = normalize_label(label);
                if file.is_empty() || label.is_empty() {
                    continue;
                }
                labels.insert(label.clone());
                file_labels.push((file, label));
            }
            None if line.chars().count() >= min_len => {
                labels.insert(normalize_label(line));
            }
            None => {}
        }
    }
}
