//! Versioned schema migrations.
//!
//! Migrations are an explicit precondition of ingestion: `bookings-ingest
//! migrate` applies them, and the ingest command never creates tables.
//! Applied versions are recorded in `schema_migrations`, so running the
//! command again is a no-op.
//!
//! Each migration carries a SQLite and a Postgres rendition. SQLite ones are
//! applied directly; the Postgres ones are printed by `migrate --print` for
//! applying to a hosted database.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    sqlite: &'static [&'static str],
    postgres: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_bookings",
        sqlite: &[r#"
            CREATE TABLE IF NOT EXISTS bookings (
                job_reference TEXT PRIMARY KEY,
                carrier_code TEXT,
                carrier_name TEXT,
                load_port TEXT,
                load_country TEXT,
                discharge_port TEXT,
                discharge_country TEXT,
                origin TEXT,
                destination TEXT,
                confirmation_date TEXT,
                cancellation_date TEXT,
                status_code TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#],
        postgres: &[r#"
            CREATE TABLE IF NOT EXISTS bookings (
                job_reference TEXT PRIMARY KEY,
                carrier_code TEXT,
                carrier_name TEXT,
                load_port TEXT,
                load_country TEXT,
                discharge_port TEXT,
                discharge_country TEXT,
                origin TEXT,
                destination TEXT,
                confirmation_date TEXT,
                cancellation_date TEXT,
                status_code TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#],
    },
    Migration {
        version: 2,
        name: "create_detail_sequences",
        sqlite: &[
            r#"
            CREATE TABLE IF NOT EXISTS detail_sequences (
                job_reference TEXT NOT NULL,
                sequence_number INTEGER NOT NULL,
                nb_teu REAL NOT NULL DEFAULT 0,
                nb_units REAL NOT NULL DEFAULT 0,
                net_weight REAL,
                commodity_code TEXT,
                commodity_description TEXT,
                haz_flag INTEGER NOT NULL DEFAULT 0,
                reefer_flag INTEGER NOT NULL DEFAULT 0,
                oog_flag INTEGER NOT NULL DEFAULT 0,
                package_code TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (job_reference, sequence_number),
                FOREIGN KEY (job_reference) REFERENCES bookings(job_reference) ON DELETE CASCADE
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_detail_sequences_job ON detail_sequences(job_reference)",
        ],
        postgres: &[
            r#"
            CREATE TABLE IF NOT EXISTS detail_sequences (
                job_reference TEXT NOT NULL REFERENCES bookings(job_reference) ON DELETE CASCADE,
                sequence_number BIGINT NOT NULL,
                nb_teu DOUBLE PRECISION NOT NULL DEFAULT 0,
                nb_units DOUBLE PRECISION NOT NULL DEFAULT 0,
                net_weight DOUBLE PRECISION,
                commodity_code TEXT,
                commodity_description TEXT,
                haz_flag BOOLEAN NOT NULL DEFAULT FALSE,
                reefer_flag BOOLEAN NOT NULL DEFAULT FALSE,
                oog_flag BOOLEAN NOT NULL DEFAULT FALSE,
                package_code TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (job_reference, sequence_number)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_detail_sequences_job ON detail_sequences(job_reference)",
        ],
    },
    Migration {
        version: 3,
        name: "bookings_reporting_indexes",
        sqlite: &[
            "CREATE INDEX IF NOT EXISTS idx_bookings_carrier ON bookings(carrier_code)",
            "CREATE INDEX IF NOT EXISTS idx_bookings_confirmation ON bookings(confirmation_date)",
        ],
        postgres: &[
            "CREATE INDEX IF NOT EXISTS idx_bookings_carrier ON bookings(carrier_code)",
            "CREATE INDEX IF NOT EXISTS idx_bookings_confirmation ON bookings(confirmation_date)",
        ],
    },
];

/// Apply pending migrations in version order. Returns the versions applied
/// by this call.
pub async fn run_migrations(pool: &SqlitePool) -> Result<Vec<i64>> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?;

    let mut newly_applied = Vec::new();
    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in migration.sqlite {
            sqlx::query(*stmt)
                .execute(&mut *tx)
                .await
                .with_context(|| {
                    format!(
                        "migration {} ({}) failed",
                        migration.version, migration.name
                    )
                })?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(version = migration.version, name = migration.name, "applied migration");
        newly_applied.push(migration.version);
    }

    Ok(newly_applied)
}

/// Postgres DDL for every migration, for hosted stores.
pub fn render_postgres() -> String {
    let mut out = String::new();
    for migration in MIGRATIONS {
        out.push_str(&format!(
            "-- {:03}_{}\n",
            migration.version, migration.name
        ));
        for stmt in migration.postgres {
            out.push_str(stmt.trim());
            out.push_str(";\n");
        }
        out.push('\n');
    }
    out
}
