//! Bounded pool of OS threads for hashing, parsing and OCR.
//!
//! Jobs (file paths) travel over a bounded crossbeam channel, so
//! submission blocks while every worker is busy. Each job produces
//! exactly one [`ParseOutcome`] on a bounded tokio channel read by the
//! async coordinator. Workers share nothing mutable: each owns the
//! [`WorkerContext`] built for it by the init hook when the thread starts.

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use trove_core::models::Document;

use crate::loaders::{self, WorkerContext};
use crate::scan;

/// Builds a worker's context; called once on each worker thread with the
/// worker index.
pub type WorkerInit = Arc<dyn Fn(usize) -> WorkerContext + Send + Sync>;

#[derive(Debug)]
pub enum ParseOutcome {
    /// The file was new; `docs` may be empty if nothing was extractable.
    Parsed {
        path: PathBuf,
        file_hash: String,
        docs: Vec<Document>,
    },
    /// The file's content hash is already indexed.
    Skipped { path: PathBuf },
    /// The file could not be read, or its loader panicked.
    Failed { path: PathBuf, error: String },
}

pub struct ParsePool {
    jobs: Option<Sender<PathBuf>>,
    results: mpsc::Receiver<ParseOutcome>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ParsePool {
    /// Start `size` workers. Files whose content hash is in `indexed` are
    /// reported as [`ParseOutcome::Skipped`] without being parsed.
    pub fn start(size: usize, indexed: Arc<HashSet<String>>, init: WorkerInit) -> Self {
        let size = size.max(1);
        let (job_tx, job_rx) = bounded::<PathBuf>(size * 2);
        let (result_tx, result_rx) = mpsc::channel::<ParseOutcome>(size * 2);

        let workers = (0..size)
            .map(|worker_id| {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let indexed = indexed.clone();
                let init = init.clone();
                thread::Builder::new()
                    .name(format!("trove-parse-{}", worker_id))
                    .spawn(move || {
                        let ctx = init(worker_id);
                        worker_loop(jobs, results, ctx, indexed)
                    })
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to spawn parse worker");
                    None
                }
            })
            .collect();

        Self {
            jobs: Some(job_tx),
            results: result_rx,
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Feed `files` to the pool from a blocking task. Stops early when
    /// `cancel` fires. Resolves to the number of files actually submitted.
    pub fn feed(&self, files: Vec<PathBuf>, cancel: CancellationToken) -> tokio::task::JoinHandle<usize> {
        let jobs = self.jobs.clone();
        tokio::task::spawn_blocking(move || {
            let Some(jobs) = jobs else {
                return 0;
            };
            let mut submitted = 0;
            for path in files {
                let mut job = path;
                loop {
                    if cancel.is_cancelled() {
                        return submitted;
                    }
                    match jobs.send_timeout(job, Duration::from_millis(100)) {
                        Ok(()) => break,
                        Err(SendTimeoutError::Timeout(back)) => job = back,
                        Err(SendTimeoutError::Disconnected(_)) => return submitted,
                    }
                }
                submitted += 1;
            }
            submitted
        })
    }

    /// Next finished job, or `None` once every worker has exited.
    pub async fn next(&mut self) -> Option<ParseOutcome> {
        self.results.recv().await
    }

    /// Close the job queue and wait for the workers to exit.
    pub async fn shutdown(mut self) {
        self.jobs.take();
        self.results.close();
        let workers = std::mem::take(&mut self.workers);
        let _ = tokio::task::spawn_blocking(move || {
            for handle in workers {
                let _ = handle.join();
            }
        })
        .await;
    }
}

fn worker_loop(
    jobs: Receiver<PathBuf>,
    results: mpsc::Sender<ParseOutcome>,
    ctx: WorkerContext,
    indexed: Arc<HashSet<String>>,
) {
    for path in jobs.iter() {
        // A loader panic must still produce an outcome, or the coordinator
        // waits forever for this job.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| parse_one(path.clone(), &ctx, &indexed)))
            .unwrap_or_else(|payload| {
                let error = panic_message(payload.as_ref());
                tracing::error!(path = %path.display(), error = %error, "loader panicked");
                ParseOutcome::Failed {
                    path,
                    error: format!("loader panicked: {}", error),
                }
            });
        if results.blocking_send(outcome).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn parse_one(path: PathBuf, ctx: &WorkerContext, indexed: &HashSet<String>) -> ParseOutcome {
    match scan::content_hash(&path) {
        Err(e) => ParseOutcome::Failed {
            path,
            error: e.to_string(),
        },
        Ok(hash) if indexed.contains(&hash) => ParseOutcome::Skipped { path },
        Ok(file_hash) => {
            let docs = loaders::load(&path, ctx);
            ParseOutcome::Parsed {
                path,
                file_hash,
                docs,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::LoaderSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trove_core::ocr::NoOcr;

    fn init_counting(counter: Arc<AtomicUsize>) -> WorkerInit {
        Arc::new(move |_id| {
            counter.fetch_add(1, Ordering::SeqCst);
            WorkerContext {
                ocr: Arc::new(NoOcr),
                settings: LoaderSettings::default(),
            }
        })
    }

    #[tokio::test]
    async fn test_every_job_yields_one_outcome() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        std::fs::write(&a, "a long enough sentence about ramen and noodles and broth").unwrap();
        std::fs::write(&b, "already here").unwrap();
        let missing = tmp.path().join("gone.txt");

        let indexed: HashSet<String> = [scan::content_hash(&b).unwrap()].into_iter().collect();
        let inits = Arc::new(AtomicUsize::new(0));
        let mut pool = ParsePool::start(3, Arc::new(indexed), init_counting(inits.clone()));
        assert_eq!(pool.size(), 3);

        let feeder = pool.feed(vec![a.clone(), b.clone(), missing.clone()], CancellationToken::new());
        let mut parsed = 0;
        let mut skipped = 0;
        let mut failed = 0;
        for _ in 0..3 {
            match pool.next().await.unwrap() {
                ParseOutcome::Parsed { path, docs, .. } => {
                    assert_eq!(path, a);
                    assert_eq!(docs.len(), 1);
                    parsed += 1;
                }
                ParseOutcome::Skipped { path } => {
                    assert_eq!(path, b);
                    skipped += 1;
                }
                ParseOutcome::Failed { path, .. } => {
                    assert_eq!(path, missing);
                    failed += 1;
                }
            }
        }
        assert_eq!(feeder.await.unwrap(), 3);
        assert_eq!((parsed, skipped, failed), (1, 1, 1));
        pool.shutdown().await;
        assert_eq!(inits.load(Ordering::SeqCst), 3);
    }

    struct PanicsOnBad;

    impl trove_core::ocr::OcrPort for PanicsOnBad {
        fn extract_text(&self, image: &std::path::Path) -> String {
            if image.ends_with("bad.jpg") {
                panic!("corrupt image");
            }
            String::new()
        }
    }

    #[tokio::test]
    async fn test_panicking_loader_reports_failure_and_worker_survives() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bad = tmp.path().join("bad.jpg");
        let good = tmp.path().join("good.jpg");
        let later = tmp.path().join("later.jpg");
        std::fs::write(&bad, "bad bytes").unwrap();
        std::fs::write(&good, "good bytes").unwrap();
        std::fs::write(&later, "later bytes").unwrap();

        let init: WorkerInit = Arc::new(|_id| WorkerContext {
            ocr: Arc::new(PanicsOnBad),
            settings: LoaderSettings::default(),
        });
        // One worker: the jobs after the panic only finish if it survived.
        let mut pool = ParsePool::start(1, Arc::new(HashSet::new()), init);
        let feeder = pool.feed(vec![bad.clone(), good.clone(), later.clone()], CancellationToken::new());

        let mut failed = Vec::new();
        let mut parsed = 0;
        for _ in 0..3 {
            let outcome = tokio::time::timeout(Duration::from_secs(5), pool.next())
                .await
                .expect("outcome for every submitted file")
                .unwrap();
            match outcome {
                ParseOutcome::Failed { path, error } => {
                    assert!(error.contains("corrupt image"), "{}", error);
                    failed.push(path);
                }
                ParseOutcome::Parsed { docs, .. } => {
                    assert_eq!(docs.len(), 1);
                    parsed += 1;
                }
                ParseOutcome::Skipped { .. } => panic!("nothing was indexed"),
            }
        }
        assert_eq!(failed, vec![bad]);
        assert_eq!(parsed, 2);
        assert_eq!(feeder.await.unwrap(), 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_feed_submits_nothing() {
        let pool = ParsePool::start(1, Arc::new(HashSet::new()), init_counting(Arc::new(AtomicUsize::new(0))));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let submitted = pool
            .feed(vec![PathBuf::from("x.txt")], cancel)
            .await
            .unwrap();
        assert_eq!(submitted, 0);
        pool.shutdown().await;
    }
}
