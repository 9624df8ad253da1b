//! Batch extraction pipeline
//!
//! Walks the books folder, runs the extractor on worker threads and appends
//! each finished record to the metadata CSV. Books already present in the CSV
//! are skipped, so an interrupted run picks up where it stopped.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::csv_store;
use crate::error::{LibraryError, Result};
use crate::extraction_queue::{ExtractionQueue, ExtractionStatus, ExtractionTask};
use crate::extractor::{BookMetadata, LegacyClassification, MetadataExtractor};
use crate::source::SourceRouter;

/// Options for one extraction run
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub books_dir: PathBuf,
    pub csv_path: PathBuf,
    /// Where embedded covers are saved; `None` disables saving
    pub covers_dir: Option<PathBuf>,
    /// Truncate the CSV and process every book again
    pub restart: bool,
}

/// Outcome of a worker for one file
enum Outcome {
    Record(Box<BookMetadata>),
    Failed(String),
    TimedOut,
}

/// Summary of an extraction run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    /// Supported files in the books folder
    pub total_files: usize,
    /// Already in the CSV before this run
    pub already_processed: usize,
    /// Attempted in this run
    pub processed: usize,
    /// Rows appended to the CSV
    pub written: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub elapsed_secs: f64,
}

impl ExtractionReport {
    /// Share of attempted files that produced a row, in percent
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.written as f64 / self.processed as f64 * 100.0
    }

    /// Files per second over the run
    pub fn rate(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.processed as f64 / self.elapsed_secs
    }
}

impl fmt::Display for ExtractionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Extraction complete")?;
        writeln!(f, "  Books in folder:    {}", self.total_files)?;
        writeln!(f, "  Already processed:  {}", self.already_processed)?;
        writeln!(f, "  Processed this run: {}", self.processed)?;
        writeln!(f, "  Written to CSV:     {}", self.written)?;
        writeln!(f, "  Failed:             {}", self.failed)?;
        writeln!(f, "  Timed out:          {}", self.timed_out)?;
        writeln!(f, "  Success rate:       {:.1}%", self.success_rate())?;
        write!(
            f,
            "  Elapsed:            {:.1}s ({:.2} files/sec)",
            self.elapsed_secs,
            self.rate()
        )
    }
}

/// Supported book files in `dir`, sorted by file name
///
/// Subdirectories and unsupported extensions are ignored.
pub fn scan_books(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(LibraryError::NotFound(dir.display().to_string()));
    }

    let router = SourceRouter::new();
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && router.supports_path(path))
        .collect();

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Stems already recorded in the metadata CSV
pub fn processed_stems(csv_path: &Path) -> Result<HashSet<String>> {
    csv_store::processed_stems(csv_path)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Log a progress line with rate and ETA
fn log_progress(done: usize, total: usize, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
    let remaining = total.saturating_sub(done);
    let eta = if rate > 0.0 { remaining as f64 / rate } else { 0.0 };
    let percent = if total > 0 { done as f64 / total as f64 * 100.0 } else { 100.0 };

    info!(
        "Progress: {}/{} ({:.1}%) | {:.2} files/sec | ETA {:.1} min",
        done,
        total,
        percent,
        rate,
        eta / 60.0
    );
}

/// Move a task to `status`; a poisoned queue lock is logged, not fatal
fn track(queue: &ExtractionQueue, task_id: usize, progress: f32, status: ExtractionStatus) {
    if let Err(e) = queue.update_progress(task_id, progress, status) {
        warn!("Task {}: {}", task_id, e);
    }
}

/// Run the extraction over the books folder
///
/// # Arguments
/// - `config`: extraction limits, worker count and timeout
/// - `legacy`: classification carried over from the old library database
/// - `options`: folders and the restart flag
///
/// # Returns
/// The run report. Timed-out and panicked files are not written, so the next
/// run retries them.
pub async fn run_extraction(
    config: &ExtractionConfig,
    legacy: LegacyClassification,
    options: &ExtractionOptions,
) -> Result<ExtractionReport> {
    let started = Instant::now();
    let files = scan_books(&options.books_dir)?;

    if options.restart && options.csv_path.exists() {
        info!("Restart requested, truncating {}", options.csv_path.display());
        fs::remove_file(&options.csv_path)?;
    }

    csv_store::prepare_metadata_csv(&options.csv_path)?;
    let done = processed_stems(&options.csv_path)?;
    let pending: Vec<PathBuf> = files
        .iter()
        .filter(|path| !done.contains(&file_stem(path)))
        .cloned()
        .collect();

    let mut report = ExtractionReport {
        total_files: files.len(),
        already_processed: files.len() - pending.len(),
        ..ExtractionReport::default()
    };

    info!(
        "{} books found, {} already processed, {} to go",
        report.total_files,
        report.already_processed,
        pending.len()
    );

    if pending.is_empty() {
        report.elapsed_secs = started.elapsed().as_secs_f64();
        return Ok(report);
    }

    let mut extractor = MetadataExtractor::new(config.clone(), legacy);
    if let Some(dir) = &options.covers_dir {
        extractor = extractor.with_covers_dir(dir.clone());
    }
    let extractor = Arc::new(extractor);

    let queue = Arc::new(ExtractionQueue::new(config.workers));
    for (index, path) in pending.iter().enumerate() {
        queue.enqueue(ExtractionTask::new(index, path.clone())).map_err(LibraryError::Task)?;
    }

    // Single writer: workers send records, one task appends them
    let (tx, mut rx) = mpsc::channel::<BookMetadata>(config.workers.max(1) * 2);
    let csv_path = options.csv_path.clone();
    let writer = tokio::spawn(async move {
        let mut written = 0usize;
        while let Some(record) = rx.recv().await {
            let path = csv_path.clone();
            let result = tokio::task::spawn_blocking(move || csv_store::append_records(&path, &[record])).await;
            match result {
                Ok(Ok(n)) => written += n,
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(LibraryError::Task(e.to_string())),
            }
        }
        Ok::<usize, LibraryError>(written)
    });

    let timeout = Duration::from_secs(config.file_timeout_secs.max(1));
    let interval = config.progress_interval.max(1);
    let total = pending.len();
    let mut workers: JoinSet<(usize, PathBuf, Outcome)> = JoinSet::new();

    loop {
        while let Some(task) = queue.dequeue().map_err(LibraryError::Task)? {
            let task_id = task.task_id;
            let path = task.file_path.clone();
            queue.mark_active(task).map_err(LibraryError::Task)?;

            let extractor = Arc::clone(&extractor);
            let worker_queue = Arc::clone(&queue);
            workers.spawn(async move {
                let worker_path = path.clone();
                let job = tokio::task::spawn_blocking(move || {
                    track(&worker_queue, task_id, 0.3, ExtractionStatus::Recognising);
                    extractor.extract_file(&worker_path)
                });
                let outcome = match tokio::time::timeout(timeout, job).await {
                    Ok(Ok(Ok(record))) => Outcome::Record(Box::new(record)),
                    Ok(Ok(Err(e))) => Outcome::Failed(e.to_string()),
                    Ok(Err(join_err)) => Outcome::Failed(format!("worker panicked: {}", join_err)),
                    Err(_) => Outcome::TimedOut,
                };
                (task_id, path, outcome)
            });
        }

        let Some(joined) = workers.join_next().await else {
            break;
        };
        let (task_id, path, outcome) = joined.map_err(|e| LibraryError::Task(e.to_string()))?;
        report.processed += 1;

        match outcome {
            Outcome::Record(record) => {
                track(&queue, task_id, 0.9, ExtractionStatus::Writing);
                debug!("{} done (score {})", record.filename, record.extraction_quality_score);
                if tx.send(*record).await.is_err() {
                    warn!("CSV writer stopped early");
                    report.failed += 1;
                }
            }
            Outcome::Failed(message) => {
                warn!("{} failed: {}", path.display(), message);
                track(&queue, task_id, 1.0, ExtractionStatus::Failed(message));
                report.failed += 1;
            }
            Outcome::TimedOut => {
                let err = LibraryError::Timeout {
                    path: path.display().to_string(),
                    seconds: timeout.as_secs(),
                };
                warn!("{}", err);
                track(&queue, task_id, 1.0, ExtractionStatus::Failed(err.to_string()));
                report.timed_out += 1;
            }
        }
        if let Err(e) = queue.mark_completed(task_id) {
            warn!("Task {}: {}", task_id, e);
        }

        if report.processed % interval == 0 || report.processed == total {
            log_progress(report.processed, total, started);
        }
    }

    drop(tx);
    report.written = writer
        .await
        .map_err(|e| LibraryError::Task(e.to_string()))??;
    report.elapsed_secs = started.elapsed().as_secs_f64();

    info!(
        "Extraction finished: {} written, {} failed, {} timed out",
        report.written, report.failed, report.timed_out
    );
    Ok(report)
}
