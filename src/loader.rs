//! Two-phase chunked loader.
//!
//! Bookings are upserted first, in chunks of `chunk_size`. Only once every
//! booking chunk has committed does the detail phase start, so a store that
//! enforces the detail → booking foreign key never sees an orphan. Within a
//! phase up to `concurrency` chunks may be in flight.
//!
//! A failed chunk aborts the rest of its phase (and, for the booking phase,
//! the whole detail phase). Chunks committed before the failure stay
//! committed; the [`LoadReport`] says how far each phase got.
//!
//! Each attempt is bounded by `timeout`. Transient store errors and
//! timeouts are retried with exponential backoff up to `max_retries` times.
//! Upserts are idempotent, so re-sending a chunk whose first attempt timed
//! out after committing is harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::config::Config;
use crate::error::{IngestError, StoreError};
use crate::models::{BookingAggregate, Collection, DetailSequence};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::store::{Store, UpsertBatch};

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub chunk_size: usize,
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
    pub progress_every: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            concurrency: 1,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: Duration::from_millis(500),
            progress_every: 1000,
        }
    }
}

impl LoadOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.ingest.chunk_size,
            concurrency: config.loader.concurrency,
            timeout: Duration::from_secs(config.loader.timeout_secs),
            max_retries: config.loader.max_retries,
            backoff: Duration::from_millis(config.loader.backoff_ms),
            progress_every: config.ingest.progress_every,
        }
    }
}

/// How far one phase got.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub records_committed: u64,
    pub chunks_committed: usize,
    pub chunks_total: usize,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub bookings: PhaseReport,
    pub details: PhaseReport,
    /// The error that stopped loading, if any.
    pub failure: Option<IngestError>,
}

impl LoadReport {
    pub fn inserted_bookings(&self) -> u64 {
        self.bookings.records_committed
    }

    pub fn inserted_details(&self) -> u64 {
        self.details.records_committed
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    pub fn errors(&self) -> Vec<String> {
        self.failure.iter().map(|e| e.to_string()).collect()
    }
}

/// Records the loader knows how to ship.
trait PhaseRecord: Sync + Sized {
    const COLLECTION: Collection;
    fn batch(chunk: &[Self]) -> UpsertBatch<'_>;
}

impl PhaseRecord for BookingAggregate {
    const COLLECTION: Collection = Collection::Bookings;
    fn batch(chunk: &[Self]) -> UpsertBatch<'_> {
        UpsertBatch::Bookings(chunk)
    }
}

impl PhaseRecord for DetailSequence {
    const COLLECTION: Collection = Collection::DetailSequences;
    fn batch(chunk: &[Self]) -> UpsertBatch<'_> {
        UpsertBatch::Details(chunk)
    }
}

pub struct BatchLoader<'a> {
    store: &'a dyn Store,
    opts: LoadOptions,
    progress: &'a dyn ProgressReporter,
    cancel: Option<&'a AtomicBool>,
    label: String,
}

impl<'a> BatchLoader<'a> {
    pub fn new(store: &'a dyn Store, opts: LoadOptions) -> Self {
        Self {
            store,
            opts,
            progress: &NoProgress,
            cancel: None,
            label: String::new(),
        }
    }

    /// Report progress to `progress`, tagging events with `label`.
    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter, label: &str) -> Self {
        self.progress = progress;
        self.label = label.to_string();
        self
    }

    /// Stop at the next chunk boundary once `flag` is set.
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub async fn load(
        &self,
        bookings: &[BookingAggregate],
        details: &[DetailSequence],
    ) -> LoadReport {
        let modified_at = Utc::now();
        let mut report = LoadReport::default();

        if let Err(e) = self
            .run_phase(bookings, modified_at, &mut report.bookings)
            .await
        {
            report.details.chunks_total = chunk_count(details.len(), self.opts.chunk_size);
            report.failure = Some(e);
            return report;
        }

        // Every booking chunk has committed past this point.
        if let Err(e) = self
            .run_phase(details, modified_at, &mut report.details)
            .await
        {
            report.failure = Some(e);
        }
        report
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|f| f.load(Ordering::SeqCst))
    }

    async fn run_phase<T: PhaseRecord>(
        &self,
        records: &[T],
        modified_at: DateTime<Utc>,
        phase: &mut PhaseReport,
    ) -> Result<(), IngestError> {
        let chunk_size = self.opts.chunk_size.max(1);
        let total = records.len() as u64;
        phase.chunks_total = chunk_count(records.len(), chunk_size);
        let every = self.opts.progress_every.max(1);
        let mut next_report = every;

        let chunks = records
            .chunks(chunk_size)
            .enumerate()
            .map(move |(idx, chunk)| async move {
                if self.cancelled() {
                    return (
                        chunk.len(),
                        Err(IngestError::Cancelled {
                            collection: T::COLLECTION,
                            chunk_index: idx,
                        }),
                    );
                }
                let res = self
                    .upsert_chunk(idx, idx * chunk_size, chunk, modified_at)
                    .await;
                (chunk.len(), res)
            });
        let mut in_flight =
            std::pin::pin!(stream::iter(chunks).buffer_unordered(self.opts.concurrency.max(1)));

        while let Some((len, res)) = in_flight.next().await {
            if let Err(e) = res {
                tracing::error!(collection = %T::COLLECTION, error = %e, "aborting phase");
                return Err(e);
            }
            phase.chunks_committed += 1;
            phase.records_committed += len as u64;

            if phase.records_committed >= next_report || phase.records_committed == total {
                self.progress.report(ProgressEvent::Loading {
                    file: self.label.clone(),
                    collection: T::COLLECTION,
                    done: phase.records_committed,
                    total,
                });
                next_report = (phase.records_committed / every + 1) * every;
            }
        }
        Ok(())
    }

    async fn upsert_chunk<T: PhaseRecord>(
        &self,
        chunk_index: usize,
        offset: usize,
        chunk: &[T],
        modified_at: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        let collection = T::COLLECTION;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome =
                tokio::time::timeout(self.opts.timeout, self.store.upsert(T::batch(chunk), modified_at))
                    .await;
            let err = match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(collection = %collection, chunk_index, records = chunk.len(), "chunk committed");
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => StoreError::Transient {
                    collection,
                    message: format!("timed out after {:?}", self.opts.timeout),
                },
            };

            if !err.is_transient() || attempt > self.opts.max_retries {
                return Err(IngestError::StorageWrite {
                    collection,
                    chunk_index,
                    first_record: offset + 1,
                    last_record: offset + chunk.len(),
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = backoff_delay(self.opts.backoff, attempt);
            tracing::warn!(
                collection = %collection,
                chunk_index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying chunk"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Exponential backoff: base, 2×base, 4×base, ... capped at 32×base.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.saturating_sub(1).min(5))
}

fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size.max(1))
}
