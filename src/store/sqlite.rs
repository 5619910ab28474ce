//! SQLite-backed [`Store`].
//!
//! Each batch runs in one transaction, so a chunk is either fully
//! committed or not at all. Foreign keys are switched on for every
//! connection; the schema itself comes from [`crate::migrate`].

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::StoreError;
use crate::models::{BookingAggregate, Collection, DetailSequence};

use super::{Store, UpsertBatch};

const UPSERT_BOOKING: &str = r#"
    INSERT INTO bookings (job_reference, carrier_code, carrier_name, load_port, load_country,
                          discharge_port, discharge_country, origin, destination,
                          confirmation_date, cancellation_date, status_code,
                          created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(job_reference) DO UPDATE SET
        carrier_code = excluded.carrier_code,
        carrier_name = excluded.carrier_name,
        load_port = excluded.load_port,
        load_country = excluded.load_country,
        discharge_port = excluded.discharge_port,
        discharge_country = excluded.discharge_country,
        origin = excluded.origin,
        destination = excluded.destination,
        confirmation_date = excluded.confirmation_date,
        cancellation_date = excluded.cancellation_date,
        status_code = excluded.status_code,
        updated_at = excluded.updated_at
"#;

const UPSERT_DETAIL: &str = r#"
    INSERT INTO detail_sequences (job_reference, sequence_number, nb_teu, nb_units, net_weight,
                                  commodity_code, commodity_description, haz_flag, reefer_flag,
                                  oog_flag, package_code, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(job_reference, sequence_number) DO UPDATE SET
        nb_teu = excluded.nb_teu,
        nb_units = excluded.nb_units,
        net_weight = excluded.net_weight,
        commodity_code = excluded.commodity_code,
        commodity_description = excluded.commodity_description,
        haz_flag = excluded.haz_flag,
        reefer_flag = excluded.reefer_flag,
        oog_flag = excluded.oog_flag,
        package_code = excluded.package_code,
        updated_at = excluded.updated_at
"#;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at a `sqlite:` URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let path = url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if !path.is_empty() && !path.starts_with(":memory:") {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn upsert_bookings(
        &self,
        rows: &[BookingAggregate],
        modified_at: i64,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for b in rows {
            sqlx::query(UPSERT_BOOKING)
                .bind(&b.job_reference)
                .bind(&b.carrier_code)
                .bind(&b.carrier_name)
                .bind(&b.load_port)
                .bind(&b.load_country)
                .bind(&b.discharge_port)
                .bind(&b.discharge_country)
                .bind(&b.origin)
                .bind(&b.destination)
                .bind(&b.confirmation_date)
                .bind(&b.cancellation_date)
                .bind(&b.status_code)
                .bind(modified_at)
                .bind(modified_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    async fn upsert_details(
        &self,
        rows: &[DetailSequence],
        modified_at: i64,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for d in rows {
            sqlx::query(UPSERT_DETAIL)
                .bind(&d.job_reference)
                .bind(d.sequence_number)
                .bind(d.nb_teu)
                .bind(d.nb_units)
                .bind(d.net_weight)
                .bind(&d.commodity_code)
                .bind(&d.commodity_description)
                .bind(d.haz_flag)
                .bind(d.reefer_flag)
                .bind(d.oog_flag)
                .bind(&d.package_code)
                .bind(modified_at)
                .bind(modified_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }
}

/// Busy/locked databases and pool exhaustion are worth retrying;
/// constraint violations are not.
fn classify(collection: Collection, err: sqlx::Error) -> StoreError {
    let message = err.to_string();
    let transient = match &err {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5") | Some("6")),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
        _ => false,
    };
    if transient {
        StoreError::Transient {
            collection,
            message,
        }
    } else {
        StoreError::Permanent {
            collection,
            message,
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert(
        &self,
        batch: UpsertBatch<'_>,
        modified_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let ts = modified_at.timestamp();
        let res = match batch {
            UpsertBatch::Bookings(rows) => self.upsert_bookings(rows, ts).await,
            UpsertBatch::Details(rows) => self.upsert_details(rows, ts).await,
        };
        res.map_err(|e| classify(batch.collection(), e))
    }

    async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.name());
        let n: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(collection, e))?;
        Ok(n as u64)
    }
}
