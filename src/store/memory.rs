//! In-memory [`Store`] used as a test double.
//!
//! Behaves like the relational schema: upserts overwrite on the conflict
//! key, a detail whose booking is missing fails the whole batch with a
//! foreign-key error, and batches are applied atomically. Every call is
//! logged so tests can check submission order, and failures or latency can
//! be injected per collection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{BookingAggregate, Collection, DetailSequence};

use super::{Store, UpsertBatch};

/// One logged upsert call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertCall {
    pub collection: Collection,
    pub records: usize,
    pub succeeded: bool,
}

/// What an injected failure looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Fails `times` attempts, then lets the call through.
    Transient { times: u32 },
    /// Fails every attempt.
    Permanent,
}

struct FailRule {
    collection: Collection,
    /// 0-based index among calls to this collection that carry the chunk.
    call: usize,
    failure: Failure,
    fired: u32,
}

#[derive(Default)]
struct State {
    bookings: BTreeMap<String, (BookingAggregate, DateTime<Utc>)>,
    details: BTreeMap<(String, i64), (DetailSequence, DateTime<Utc>)>,
    calls: Vec<UpsertCall>,
    chunks_seen: HashMap<(Collection, String), usize>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    rules: Mutex<Vec<FailRule>>,
    latency: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every upsert by `latency` before it is applied.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the `chunk`-th distinct chunk (0-based, by submission order)
    /// sent to `collection`. Retries of the same chunk count as the same
    /// chunk.
    pub fn fail_chunk(&self, collection: Collection, chunk: usize, failure: Failure) {
        self.rules.lock().unwrap().push(FailRule {
            collection,
            call: chunk,
            failure,
            fired: 0,
        });
    }

    pub fn calls(&self) -> Vec<UpsertCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn booking(&self, job_reference: &str) -> Option<BookingAggregate> {
        let state = self.state.lock().unwrap();
        state.bookings.get(job_reference).map(|(b, _)| b.clone())
    }

    pub fn detail(&self, job_reference: &str, sequence_number: i64) -> Option<DetailSequence> {
        let state = self.state.lock().unwrap();
        state
            .details
            .get(&(job_reference.to_string(), sequence_number))
            .map(|(d, _)| d.clone())
    }

    pub fn modified_at(&self, job_reference: &str) -> Option<DateTime<Utc>> {
        let state = self.state.lock().unwrap();
        state.bookings.get(job_reference).map(|(_, ts)| *ts)
    }

    /// Remove a booking and, like `ON DELETE CASCADE`, its details.
    pub fn delete_booking(&self, job_reference: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let existed = state.bookings.remove(job_reference).is_some();
        state.details.retain(|(job, _), _| job != job_reference);
        existed
    }

    /// Chunk identity is the first key in the batch, so retries map to the
    /// same ordinal.
    fn chunk_ordinal(state: &mut State, batch: &UpsertBatch<'_>) -> usize {
        let first = match batch {
            UpsertBatch::Bookings(b) => b.first().map(|r| r.job_reference.clone()),
            UpsertBatch::Details(d) => d
                .first()
                .map(|r| format!("{}#{}", r.job_reference, r.sequence_number)),
        }
        .unwrap_or_default();
        let collection = batch.collection();
        let seen = state
            .chunks_seen
            .keys()
            .filter(|(c, _)| *c == collection)
            .count();
        *state.chunks_seen.entry((collection, first)).or_insert(seen)
    }

    fn injected_failure(&self, collection: Collection, ordinal: usize) -> Option<StoreError> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .find(|r| r.collection == collection && r.call == ordinal)?;
        match rule.failure {
            Failure::Permanent => Some(StoreError::Permanent {
                collection,
                message: format!("injected failure on chunk {}", ordinal),
            }),
            Failure::Transient { times } if rule.fired < times => {
                rule.fired += 1;
                Some(StoreError::Transient {
                    collection,
                    message: format!("injected transient failure on chunk {}", ordinal),
                })
            }
            Failure::Transient { .. } => None,
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert(
        &self,
        batch: UpsertBatch<'_>,
        modified_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let collection = batch.collection();
        let mut state = self.state.lock().unwrap();
        let ordinal = Self::chunk_ordinal(&mut state, &batch);

        let outcome = match self.injected_failure(collection, ordinal) {
            Some(err) => Err(err),
            None => apply(&mut state, batch, modified_at),
        };

        state.calls.push(UpsertCall {
            collection,
            records: batch.len(),
            succeeded: outcome.is_ok(),
        });
        outcome
    }

    async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(match collection {
            Collection::Bookings => state.bookings.len() as u64,
            Collection::DetailSequences => state.details.len() as u64,
        })
    }
}

fn apply(
    state: &mut State,
    batch: UpsertBatch<'_>,
    modified_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    match batch {
        UpsertBatch::Bookings(rows) => {
            for b in rows {
                state
                    .bookings
                    .insert(b.job_reference.clone(), (b.clone(), modified_at));
            }
        }
        UpsertBatch::Details(rows) => {
            if let Some(orphan) = rows
                .iter()
                .find(|d| !state.bookings.contains_key(&d.job_reference))
            {
                return Err(StoreError::Permanent {
                    collection: Collection::DetailSequences,
                    message: format!(
                        "FOREIGN KEY constraint failed: no booking {}",
                        orphan.job_reference
                    ),
                });
            }
            for d in rows {
                state.details.insert(
                    (d.job_reference.clone(), d.sequence_number),
                    (d.clone(), modified_at),
                );
            }
        }
    }
    Ok(())
}
