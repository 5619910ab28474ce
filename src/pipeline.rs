//! Run coordinator.
//!
//! Wires one source file through the record reader, the entity builder and
//! the batch loader, and sequences several files when the source is a
//! directory. A file that fails fatally (unreadable, missing key column,
//! storage write failure) is recorded in the [`RunReport`] and the run moves
//! on to the next file. Once the cancel flag is raised no further file is
//! started.
//!
//! The coordinator never prints; [`FileReport`] and [`RunReport`] implement
//! `Display` and the CLI decides where the summary goes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::builder::EntityBuilder;
use crate::config::Config;
use crate::discover::list_files;
use crate::error::IngestError;
use crate::loader::{BatchLoader, LoadOptions, PhaseReport};
use crate::progress::{format_number, NoProgress, ProgressEvent, ProgressReporter};
use crate::source::{open_records, Dialect};
use crate::store::Store;

/// Knobs the coordinator needs, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub include_globs: Vec<String>,
    pub delimiter: char,
    pub max_reported_errors: usize,
    pub progress_every: u64,
    pub load: LoadOptions,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            include_globs: config.ingest.include_globs.clone(),
            delimiter: config.ingest.delimiter,
            max_reported_errors: config.ingest.max_reported_errors,
            progress_every: config.ingest.progress_every,
            load: LoadOptions::from_config(config),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Outcome of one source file.
#[derive(Debug, Clone, Default)]
pub struct FileReport {
    pub path: PathBuf,
    pub rows_read: u64,
    pub rows_rejected: u64,
    pub coercion_fallbacks: u64,
    pub duplicate_details: u64,
    pub unique_bookings: u64,
    pub detail_rows: u64,
    pub bookings: PhaseReport,
    pub details: PhaseReport,
    /// First row-level error messages.
    pub errors: Vec<String>,
    /// The fatal error that stopped this file, if any.
    pub failure: Option<String>,
    pub cancelled: bool,
    pub dry_run: bool,
    pub elapsed: Duration,
}

impl FileReport {
    fn new(path: &Path, dry_run: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            dry_run,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    fn fail(&mut self, err: &IngestError) {
        if matches!(err, IngestError::Cancelled { .. }) {
            self.cancelled = true;
        }
        self.failure = Some(err.to_string());
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.dry_run { " (dry-run)" } else { "" };
        writeln!(f, "ingest {}{}", self.path.display(), suffix)?;
        writeln!(f, "  rows read: {}", format_number(self.rows_read))?;
        writeln!(f, "  rows rejected: {}", format_number(self.rows_rejected))?;
        writeln!(f, "  unique bookings: {}", format_number(self.unique_bookings))?;
        writeln!(f, "  detail rows: {}", format_number(self.detail_rows))?;
        if self.duplicate_details > 0 {
            writeln!(
                f,
                "  duplicate details skipped: {}",
                format_number(self.duplicate_details)
            )?;
        }
        if self.coercion_fallbacks > 0 {
            writeln!(
                f,
                "  coercion fallbacks: {}",
                format_number(self.coercion_fallbacks)
            )?;
        }
        if !self.dry_run {
            writeln!(
                f,
                "  booking chunks committed: {}/{}",
                self.bookings.chunks_committed, self.bookings.chunks_total
            )?;
            writeln!(
                f,
                "  detail chunks committed: {}/{}",
                self.details.chunks_committed, self.details.chunks_total
            )?;
        }
        if !self.errors.is_empty() {
            writeln!(f, "  errors:")?;
            for e in &self.errors {
                writeln!(f, "    {}", e)?;
            }
        }
        match &self.failure {
            Some(reason) => writeln!(f, "  FAILED: {}", reason),
            None => writeln!(f, "  elapsed: {:.2}s", self.elapsed.as_secs_f64()),
        }
    }
}

/// Aggregate over every file of a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub files: Vec<FileReport>,
    /// Files never started because the run was cancelled.
    pub skipped: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn files_succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.succeeded()).count()
    }

    pub fn files_failed(&self) -> usize {
        self.files.len() - self.files_succeeded()
    }

    pub fn cancelled(&self) -> bool {
        self.skipped > 0 || self.files.iter().any(|f| f.cancelled)
    }

    pub fn rows_read(&self) -> u64 {
        self.files.iter().map(|f| f.rows_read).sum()
    }

    pub fn rows_rejected(&self) -> u64 {
        self.files.iter().map(|f| f.rows_rejected).sum()
    }

    pub fn unique_bookings(&self) -> u64 {
        self.files.iter().map(|f| f.unique_bookings).sum()
    }

    pub fn detail_rows(&self) -> u64 {
        self.files.iter().map(|f| f.detail_rows).sum()
    }

    pub fn bookings_committed(&self) -> u64 {
        self.files.iter().map(|f| f.bookings.records_committed).sum()
    }

    pub fn details_committed(&self) -> u64 {
        self.files.iter().map(|f| f.details.records_committed).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in &self.files {
            write!(f, "{}", file)?;
        }
        writeln!(f, "run")?;
        writeln!(
            f,
            "  files: {} ({} ok, {} failed)",
            self.files.len(),
            self.files_succeeded(),
            self.files_failed()
        )?;
        if self.skipped > 0 {
            writeln!(f, "  files skipped after cancel: {}", self.skipped)?;
        }
        writeln!(f, "  rows read: {}", format_number(self.rows_read()))?;
        writeln!(f, "  rows rejected: {}", format_number(self.rows_rejected()))?;
        writeln!(
            f,
            "  bookings committed: {}",
            format_number(self.bookings_committed())
        )?;
        writeln!(
            f,
            "  details committed: {}",
            format_number(self.details_committed())
        )?;
        writeln!(f, "  elapsed: {:.2}s", self.elapsed.as_secs_f64())?;
        if self.cancelled() {
            writeln!(f, "cancelled")
        } else {
            writeln!(f, "ok")
        }
    }
}

/// Drives files through the pipeline against an injected store.
pub struct Coordinator<'a> {
    /// `None` in dry-run mode: build only, never load.
    store: Option<&'a dyn Store>,
    settings: IngestSettings,
    progress: &'a dyn ProgressReporter,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Coordinator<'a> {
    pub fn new(store: &'a dyn Store, settings: IngestSettings) -> Self {
        Self {
            store: Some(store),
            settings,
            progress: &NoProgress,
            cancel: None,
        }
    }

    /// A coordinator that tokenizes and builds but makes no storage calls.
    pub fn dry_run(settings: IngestSettings) -> Self {
        Self {
            store: None,
            settings,
            progress: &NoProgress,
            cancel: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Ingest `source`, a single file or a directory of matching files.
    ///
    /// Errors only when the source itself cannot be enumerated; everything
    /// after that is reported per file.
    pub async fn run(&self, source: &Path) -> Result<RunReport> {
        let started = Instant::now();
        let files = list_files(source, &self.settings.include_globs)?;
        tracing::info!(source = %source.display(), files = files.len(), "starting run");

        let mut report = RunReport::default();
        for (i, path) in files.iter().enumerate() {
            if self.cancelled() {
                report.skipped = files.len() - i;
                tracing::warn!(skipped = report.skipped, "run cancelled, remaining files not started");
                break;
            }
            report.files.push(self.ingest_file(path).await);
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            ok = report.files_succeeded(),
            failed = report.files_failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    /// Ingest one file. Never fails: fatal errors land in the report.
    pub async fn ingest_file(&self, path: &Path) -> FileReport {
        let started = Instant::now();
        let mut report = FileReport::new(path, self.store.is_none());
        tracing::info!(file = %path.display(), "ingesting file");

        if let Err(e) = self.process(path, &mut report).await {
            tracing::error!(file = %path.display(), error = %e, "file failed");
            report.fail(&e);
        }

        report.elapsed = started.elapsed();
        report
    }

    async fn process(&self, path: &Path, report: &mut FileReport) -> Result<(), IngestError> {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let dialect = Dialect::for_path(path, self.settings.delimiter);
        let every = self.settings.progress_every.max(1);

        let mut builder = EntityBuilder::new(self.settings.max_reported_errors);
        let mut seen: u64 = 0;
        for item in open_records(path, dialect)? {
            builder.accept(item?);
            seen += 1;
            if seen % every == 0 {
                self.progress.report(ProgressEvent::Reading {
                    file: label.clone(),
                    rows: seen,
                });
            }
        }
        let built = builder.finish();

        report.rows_read = built.rows_read;
        report.rows_rejected = built.rejected;
        report.coercion_fallbacks = built.coercion_fallbacks;
        report.duplicate_details = built.duplicate_details;
        report.unique_bookings = built.bookings.len() as u64;
        report.detail_rows = built.details.len() as u64;
        report.errors = built.errors;

        let Some(store) = self.store else {
            return Ok(());
        };

        let mut loader = BatchLoader::new(store, self.settings.load.clone())
            .with_progress(self.progress, &label);
        if let Some(flag) = self.cancel {
            loader = loader.with_cancel(flag);
        }
        let loaded = loader.load(&built.bookings, &built.details).await;

        report.bookings = loaded.bookings;
        report.details = loaded.details;
        match loaded.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;
    use crate::progress::RecordingProgress;
    use crate::store::memory::Failure;
    use crate::store::InMemoryStore;
    use std::io::Write;

    const SAMPLE: &str = "\
JOB_REFERENCE_FAKE,CARRIER_CODE,JOB_DTL_SEQUENCE,NB_TEU,HAZ_FLAG
A,MSC,1,10,true
A,MSC,2,5,false
B,CMA,1,3,0
";

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_single_file_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bookings.csv", SAMPLE);
        let store = InMemoryStore::new();

        let report = Coordinator::new(&store, IngestSettings::default())
            .ingest_file(&path)
            .await;
        assert!(report.succeeded(), "{:?}", report.failure);
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.unique_bookings, 2);
        assert_eq!(report.detail_rows, 3);
        assert_eq!(report.bookings.chunks_committed, 1);
        assert_eq!(report.details.chunks_committed, 1);
        assert_eq!(store.count(Collection::Bookings).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reports_reading_then_loading_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = String::from("JOB_REFERENCE_FAKE,JOB_DTL_SEQUENCE\n");
        for i in 0..25 {
            body.push_str(&format!("J{:02},1\n", i));
        }
        let path = write(dir.path(), "progress.csv", &body);
        let store = InMemoryStore::new();
        let progress = RecordingProgress::new();

        let mut cfg = Config::default();
        cfg.ingest.chunk_size = 4;
        cfg.ingest.progress_every = 10;
        let report = Coordinator::new(&store, IngestSettings::from_config(&cfg))
            .with_progress(&progress)
            .ingest_file(&path)
            .await;
        assert!(report.succeeded(), "{:?}", report.failure);

        let file = "progress.csv".to_string();
        let reading = |rows| ProgressEvent::Reading {
            file: file.clone(),
            rows,
        };
        let loading = |collection, done| ProgressEvent::Loading {
            file: file.clone(),
            collection,
            done,
            total: 25,
        };
        assert_eq!(
            progress.events(),
            vec![
                reading(10),
                reading(20),
                loading(Collection::Bookings, 12),
                loading(Collection::Bookings, 20),
                loading(Collection::Bookings, 25),
                loading(Collection::DetailSequences, 12),
                loading(Collection::DetailSequences, 20),
                loading(Collection::DetailSequences, 25),
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bookings.csv", SAMPLE);

        let report = Coordinator::dry_run(IngestSettings::default())
            .ingest_file(&path)
            .await;
        assert!(report.succeeded());
        assert!(report.dry_run);
        assert_eq!(report.unique_bookings, 2);
        assert_eq!(report.bookings.chunks_total, 0);
        assert!(report.to_string().contains("(dry-run)"));
    }

    #[tokio::test]
    async fn test_missing_key_column_fails_file_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a_bad.csv", "FOO,BAR\n1,2\n");
        write(dir.path(), "b_good.csv", SAMPLE);
        let store = InMemoryStore::new();

        let report = Coordinator::new(&store, IngestSettings::default())
            .run(dir.path())
            .await
            .unwrap();
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.files_failed(), 1);
        assert_eq!(report.files_succeeded(), 1);
        assert!(report.files[0]
            .failure
            .as_deref()
            .unwrap()
            .contains("JOB_REFERENCE_FAKE"));
        assert_eq!(store.count(Collection::Bookings).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bookings.csv", SAMPLE);
        let store = InMemoryStore::new();
        store.fail_chunk(Collection::DetailSequences, 0, Failure::Permanent);

        let report = Coordinator::new(&store, IngestSettings::default())
            .ingest_file(&path)
            .await;
        assert!(!report.succeeded());
        assert_eq!(report.bookings.chunks_committed, 1);
        assert_eq!(report.details.chunks_committed, 0);
        assert!(report.to_string().contains("FAILED"));
    }

    #[tokio::test]
    async fn test_cancel_skips_remaining_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.csv", SAMPLE);
        write(dir.path(), "b.csv", SAMPLE);
        let store = InMemoryStore::new();
        let flag = AtomicBool::new(true);

        let report = Coordinator::new(&store, IngestSettings::default())
            .with_cancel(&flag)
            .run(dir.path())
            .await
            .unwrap();
        assert!(report.files.is_empty());
        assert_eq!(report.skipped, 2);
        assert!(report.cancelled());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_is_an_error() {
        let store = InMemoryStore::new();
        let result = Coordinator::new(&store, IngestSettings::default())
            .run(Path::new("/definitely/not/here"))
            .await;
        assert!(result.is_err());
    }
}
