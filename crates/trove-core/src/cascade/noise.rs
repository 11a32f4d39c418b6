//! Label noise filter and name normalization.

/// Words that never make a useful label on their own.
pub const LABEL_STOPLIST: [&str; 10] = [
    "image", "img", "photo", "doc", "document", "file", "unknown", "nan", "null", "none",
];

/// Directory names that describe dataset plumbing rather than content.
pub const TECHNICAL_FOLDERS: [&str; 15] = [
    "images",
    "img",
    "photos",
    "train",
    "test",
    "val",
    "meta",
    "archive",
    "dataset",
    "raw",
    "raw-datasets",
    "data",
    "content",
    "v1",
    "v2",
];

/// Normalize a folder, file or cell name into label form.
///
/// Lowercases, turns `_` and `-` into spaces and collapses whitespace:
/// `"Golden_Retriever"` → `"golden retriever"`.
pub fn normalize_label(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether a candidate label carries no information.
///
/// A label is noisy when it is empty, shorter than `min_len` characters,
/// purely numeric (one decimal point allowed), more than 15% digits, or a
/// stoplisted word.
pub fn is_label_noisy(label: &str, min_len: usize) -> bool {
    let label = label.trim();
    let len = label.chars().count();
    if len == 0 || len < min_len {
        return true;
    }

    let without_point = label.replacen('.', "", 1);
    if !without_point.is_empty() && without_point.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    let digits = label.chars().filter(|c| c.is_ascii_digit()).count();
    if digits as f32 / len as f32 > 0.15 {
        return true;
    }

    let lower = label.to_lowercase();
    LABEL_STOPLIST.contains(&lower.as_str())
}

pub fn is_technical_folder(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    TECHNICAL_FOLDERS.contains(&lower.as_str())
}

/// Whether `needle` occurs in `haystack` on word boundaries.
///
/// Both sides are expected to be lowercase already.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before_ok = haystack[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = begin + haystack[begin..].chars().next().map_or(1, |c| c.len_utf8());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noisy_labels() {
        assert!(is_label_noisy("12345", 3));
        assert!(is_label_noisy("3.14", 3));
        assert!(is_label_noisy("img", 3));
        assert!(is_label_noisy("IMAGE", 3));
        assert!(is_label_noisy("a", 3));
        assert!(is_label_noisy("", 3));
        assert!(is_label_noisy("img 0042", 3));
        assert!(is_label_noisy("nan", 3));
    }

    #[test]
    fn test_clean_labels() {
        assert!(!is_label_noisy("golden retriever", 3));
        assert!(!is_label_noisy("sushi", 3));
        assert!(!is_label_noisy("model t2", 3));
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("Golden_Retriever"), "golden retriever");
        assert_eq!(normalize_label("  fried--rice "), "fried rice");
    }

    #[test]
    fn test_technical_folders() {
        assert!(is_technical_folder("Train"));
        assert!(is_technical_folder("raw-datasets"));
        assert!(!is_technical_folder("sushi"));
    }

    #[test]
    fn test_contains_word() {
        assert!(contains_word("fresh sushi platter", "sushi"));
        assert!(contains_word("sushi", "sushi"));
        assert!(!contains_word("sushiya menu", "sushi"));
        assert!(contains_word("café, pizza!", "pizza"));
        assert!(!contains_word("anything", ""));
    }
}
