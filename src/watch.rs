//! `trove watch`: debounced re-ingestion.
//!
//! Polls the archive signatures of the dataset root. Once a change has
//! been followed by `debounce_secs` without further changes, a `complete`
//! ingestion runs; unchanged archives short-circuit on their contracts, so
//! only what moved is parsed again.

use anyhow::Result;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use trove_core::models::FolderSignature;

use crate::config::Config;
use crate::ingest::{ensure_dataset_root, ingest_dataset, IngestMode, IngestPorts, IngestReport};
use crate::progress::ProgressMode;
use crate::scan;

/// Fires once the observed state has been stable for `quiet` after a change.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    changed_at: Option<Instant>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            changed_at: None,
        }
    }

    /// Feed one poll result; returns `true` when a run is due.
    pub fn observe(&mut self, changed: bool, now: Instant) -> bool {
        if changed {
            self.changed_at = Some(now);
            return false;
        }
        match self.changed_at {
            Some(at) if now.duration_since(at) >= self.quiet => {
                self.changed_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.changed_at.is_some()
    }
}

type Snapshot = Vec<(String, FolderSignature)>;

async fn snapshot(config: &Config) -> Result<Snapshot> {
    let root = config.dataset.root.clone();
    let excludes = scan::build_globset(&config.dataset.exclude_globs)?;
    tokio::task::spawn_blocking(move || -> Result<Snapshot> {
        Ok(scan::scan_archives(&root, &excludes)?
            .into_iter()
            .map(|a| (a.name, a.signature))
            .collect())
    })
    .await?
}

fn log_report(report: &IngestReport) {
    tracing::info!(
        records = report.records_indexed,
        files = report.files_scanned,
        unchanged = report.archives_unchanged,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "ingestion pass finished"
    );
}

pub async fn run_watch(config: &Config, progress: ProgressMode) -> Result<()> {
    ensure_dataset_root(config)?;
    let ports = IngestPorts::from_config(config).await?;
    let reporter = progress.reporter();

    let cancel = CancellationToken::new();
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received, stopping watch...");
                cancel.cancel();
            }
        })
    };

    let initial_mode = if ports.store.count().await? == 0 {
        IngestMode::Reset
    } else {
        IngestMode::Complete
    };
    let report = ingest_dataset(config, &ports, initial_mode, cancel.clone(), reporter.as_ref()).await?;
    log_report(&report);

    println!(
        "watching {} (poll {}s, debounce {}s)",
        config.dataset.root.display(),
        config.watch.poll_secs,
        config.watch.debounce_secs
    );

    let poll = Duration::from_secs(config.watch.poll_secs.max(1));
    let mut debouncer = Debouncer::new(Duration::from_secs(config.watch.debounce_secs));
    let mut last = snapshot(config).await?;

    while !cancel.is_cancelled() {
        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = cancel.cancelled() => break,
        }

        let current = match snapshot(config).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "dataset scan failed");
                continue;
            }
        };
        let changed = current != last;
        if changed {
            tracing::info!("dataset change detected");
            last = current;
        }

        if debouncer.observe(changed, Instant::now()) {
            let report =
                ingest_dataset(config, &ports, IngestMode::Complete, cancel.clone(), reporter.as_ref()).await?;
            log_report(&report);
            last = snapshot(config).await?;
        }
    }

    signal.abort();
    println!("watch stopped");
    Ok(())
}
