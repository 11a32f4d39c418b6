//! Dataset scanning: archives, folder signatures and content hashes.
//!
//! Each top-level directory of the dataset root is an **archive**, the
//! unit a folder contract covers. Files lying directly in the root form
//! one extra loose-files archive that is never sealed, so it is always
//! rescanned.
//!
//! The folder signature counts every non-hidden file of the archive
//! (supported or not) so that any change under it invalidates the
//! contract. Only supported, non-excluded, non-mapping files are queued
//! for parsing.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use trove_core::models::FolderSignature;

use crate::loaders::kind_for_path;
use crate::vocabulary::is_mapping_file;

/// Contract key of the loose-files archive.
pub const LOOSE_ARCHIVE: &str = ".";

/// Files larger than this are hashed from samples.
const PARTIAL_HASH_THRESHOLD: u64 = 1024 * 1024;
const SAMPLE_BYTES: u64 = 10 * 1024;

#[derive(Debug, Clone)]
pub struct Archive {
    /// Contract key: the directory name relative to the dataset root, or
    /// [`LOOSE_ARCHIVE`].
    pub name: String,
    pub root: PathBuf,
    /// Supported files to parse, sorted.
    pub files: Vec<PathBuf>,
    pub signature: FolderSignature,
    pub sealable: bool,
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn mtime_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// List the archives under `root` in name order, loose-files archive last.
pub fn scan_archives(root: &Path, excludes: &GlobSet) -> Result<Vec<Archive>> {
    let mut archives = Vec::new();
    let mut loose_files = Vec::new();
    let mut loose_sig = FolderSignature::default();

    let mut entries: Vec<_> = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read dataset root {}", root.display()))?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_hidden(&name) {
            continue;
        }
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(_) => continue,
        };

        if file_type.is_dir() {
            let (files, signature) = walk_archive(root, &path, excludes)?;
            archives.push(Archive {
                name,
                root: path,
                files,
                signature,
                sealable: true,
            });
        } else if file_type.is_file() {
            let meta = entry.metadata()?;
            add_to_signature(&mut loose_sig, &meta);
            if is_queueable(root, &path, excludes) {
                loose_files.push(path);
            }
        }
    }

    if !loose_files.is_empty() {
        archives.push(Archive {
            name: LOOSE_ARCHIVE.to_string(),
            root: root.to_path_buf(),
            files: loose_files,
            signature: loose_sig,
            sealable: false,
        });
    }

    Ok(archives)
}

/// Signature of one archive directory without listing its files.
pub fn folder_signature(dir: &Path) -> Result<FolderSignature> {
    let mut sig = FolderSignature::default();
    for entry in WalkDir::new(dir).into_iter().filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy())) {
        let entry = entry?;
        if entry.file_type().is_file() {
            add_to_signature(&mut sig, &entry.metadata()?);
        }
    }
    Ok(sig)
}

fn walk_archive(root: &Path, dir: &Path, excludes: &GlobSet) -> Result<(Vec<PathBuf>, FolderSignature)> {
    let mut files = Vec::new();
    let mut sig = FolderSignature::default();

    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()));
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
        add_to_signature(&mut sig, &entry.metadata()?);
        if is_queueable(root, entry.path(), excludes) {
            files.push(entry.into_path());
        }
    }

    Ok((files, sig))
}

fn add_to_signature(sig: &mut FolderSignature, meta: &std::fs::Metadata) {
    sig.file_count += 1;
    sig.total_size += meta.len();
    sig.max_mtime = sig.max_mtime.max(mtime_secs(meta));
}

fn is_queueable(root: &Path, path: &Path, excludes: &GlobSet) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    if excludes.is_match(relative) {
        return false;
    }
    kind_for_path(path).is_some() && !is_mapping_file(path)
}

/// SHA-256 (hex) of the file content.
///
/// Files above 1 MiB are hashed from their size plus three 10 KiB
/// samples (head, middle, tail) instead of the full content.
pub fn content_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = Sha256::new();

    if size <= PARTIAL_HASH_THRESHOLD {
        let mut buf = Vec::with_capacity(size as usize);
        file.read_to_end(&mut buf)?;
        hasher.update(&buf);
    } else {
        hasher.update(size.to_le_bytes());
        let mut buf = vec![0u8; SAMPLE_BYTES as usize];
        for offset in [0, size / 2 - SAMPLE_BYTES / 2, size - SAMPLE_BYTES] {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
            hasher.update(&buf);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_archives_and_loose_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "food/sushi/a.jpg", b"img");
        write(root, "food/sushi/notes.bin", b"not supported");
        write(root, "food/labels.txt", b"sushi\nramen\n");
        write(root, "food/.cache/x.jpg", b"hidden");
        write(root, "vehicles/list.csv", b"Name\ntruck\n");
        write(root, "loose.txt", b"hello world");
        write(root, ".hidden.txt", b"skip");

        let excludes = build_globset(&[]).unwrap();
        let archives = scan_archives(root, &excludes).unwrap();
        let names: Vec<&str> = archives.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["food", "vehicles", LOOSE_ARCHIVE]);

        let food = &archives[0];
        assert!(food.sealable);
        assert_eq!(food.files, vec![root.join("food/sushi/a.jpg")]);
        // Signature sees the unsupported and mapping files too, not hidden ones.
        assert_eq!(food.signature.file_count, 3);
        assert_eq!(food.signature, folder_signature(&root.join("food")).unwrap());

        let loose = &archives[2];
        assert!(!loose.sealable);
        assert_eq!(loose.files, vec![root.join("loose.txt")]);
    }

    #[test]
    fn test_excludes_apply_to_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "food/a.jpg", b"1");
        write(root, "food/tmp/b.jpg", b"2");
        let excludes = build_globset(&["**/tmp/**".to_string()]).unwrap();
        let archives = scan_archives(root, &excludes).unwrap();
        assert_eq!(archives[0].files, vec![root.join("food/a.jpg")]);
    }

    #[test]
    fn test_signature_changes_with_content() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "food/a.txt", b"one");
        let before = folder_signature(&root.join("food")).unwrap();
        write(root, "food/b.txt", b"two");
        let after = folder_signature(&root.join("food")).unwrap();
        assert_ne!(before, after);
        assert_eq!(after.file_count, 2);
        assert_eq!(after.total_size, 6);
    }

    #[test]
    fn test_content_hash_small_and_large() {
        let tmp = TempDir::new().unwrap();
        let small = tmp.path().join("s.txt");
        std::fs::write(&small, b"abc").unwrap();
        assert_eq!(
            content_hash(&small).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let big = tmp.path().join("big.bin");
        let mut data = vec![7u8; 3 * 1024 * 1024];
        std::fs::write(&big, &data).unwrap();
        let h1 = content_hash(&big).unwrap();
        // A change outside the sampled windows is not seen.
        data[200 * 1024] = 8;
        std::fs::write(&big, &data).unwrap();
        assert_eq!(content_hash(&big).unwrap(), h1);
        // A change in the head window is.
        data[10] = 9;
        std::fs::write(&big, &data).unwrap();
        assert_ne!(content_hash(&big).unwrap(), h1);
    }
}
