//! Storage abstraction for the loader.
//!
//! The pipeline needs exactly one write operation from persistence: upsert a
//! batch of records into a collection, resolving conflicts on the
//! collection's key. [`Store`] captures that, plus a row count used by
//! `stats` and the tests.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteStore`] | Local SQLite file (`BOOKINGS_DATABASE_URL`) |
//! | [`PostgrestStore`] | Hosted Postgres behind PostgREST / Supabase |
//! | [`InMemoryStore`] | Test double with call log and failure injection |
//!
//! The store is constructed once by the caller and passed into the run
//! coordinator; nothing in the pipeline reaches for a global client.

pub mod memory;
pub mod postgrest;
pub mod sqlite;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::StoreCredentials;
use crate::error::StoreError;
use crate::models::{BookingAggregate, Collection, DetailSequence};

pub use memory::InMemoryStore;
pub use postgrest::PostgrestStore;
pub use sqlite::SqliteStore;

/// One chunk of records bound for a single collection.
#[derive(Debug, Clone, Copy)]
pub enum UpsertBatch<'a> {
    Bookings(&'a [BookingAggregate]),
    Details(&'a [DetailSequence]),
}

impl UpsertBatch<'_> {
    pub fn collection(&self) -> Collection {
        match self {
            UpsertBatch::Bookings(_) => Collection::Bookings,
            UpsertBatch::Details(_) => Collection::DetailSequences,
        }
    }

    pub fn conflict_keys(&self) -> &'static [&'static str] {
        self.collection().conflict_keys()
    }

    pub fn len(&self) -> usize {
        match self {
            UpsertBatch::Bookings(b) => b.len(),
            UpsertBatch::Details(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Upsert-capable persistence backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert new records and overwrite every non-key attribute of existing
    /// ones, setting the last-modified marker to `modified_at`.
    ///
    /// A batch is applied atomically where the backend allows it.
    async fn upsert(&self, batch: UpsertBatch<'_>, modified_at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Number of rows currently stored in `collection`.
    async fn count(&self, collection: Collection) -> Result<u64, StoreError>;
}

/// Build the store described by `credentials`.
pub async fn connect(credentials: &StoreCredentials, timeout: Duration) -> Result<Box<dyn Store>> {
    match credentials {
        StoreCredentials::Sqlite { url } => Ok(Box::new(SqliteStore::connect(url).await?)),
        StoreCredentials::Postgrest {
            base_url,
            service_key,
        } => Ok(Box::new(PostgrestStore::new(base_url, service_key, timeout)?)),
    }
}
