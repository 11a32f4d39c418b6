//! Ingestion progress reporting.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for `trove ingest`.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Archive listed and about to be processed. `files` is the number of
    /// supported files queued for parsing.
    Scanning { archive: String, files: u64 },
    /// Archive unchanged since its contract was sealed.
    Unchanged { archive: String },
    /// `n` of `total` files handled; `indexed` records written so far in this run.
    Ingesting {
        archive: String,
        n: u64,
        total: u64,
        indexed: u64,
    },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest food  1,234 / 5,000 files  (980 records)".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Scanning { archive, files } => {
                format!("ingest {}  scanning  {} files\n", archive, format_number(*files))
            }
            IngestProgressEvent::Unchanged { archive } => {
                format!("ingest {}  unchanged, skipped\n", archive)
            }
            IngestProgressEvent::Ingesting {
                archive,
                n,
                total,
                indexed,
            } => format!(
                "ingest {}  {} / {} files  ({} records)\n",
                archive,
                format_number(*n),
                format_number(*total),
                format_number(*indexed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Scanning { archive, files } => serde_json::json!({
                "event": "progress",
                "archive": archive,
                "phase": "scanning",
                "files": files
            }),
            IngestProgressEvent::Unchanged { archive } => serde_json::json!({
                "event": "progress",
                "archive": archive,
                "phase": "unchanged"
            }),
            IngestProgressEvent::Ingesting {
                archive,
                n,
                total,
                indexed,
            } => serde_json::json!({
                "event": "progress",
                "archive": archive,
                "phase": "ingesting",
                "n": n,
                "total": total,
                "indexed": indexed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
