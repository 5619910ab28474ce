//! Core data models flowing through the ingestion pipeline.
//!
//! A [`RawRow`] lives for one source line. The entity builder turns rows
//! into [`BookingAggregate`]s (one per job reference) and their
//! [`DetailSequence`] children, which the loader upserts into the two
//! persisted collections.

use std::fmt;

use serde::Serialize;

/// Source column holding the booking's natural key.
pub const JOB_REFERENCE: &str = "JOB_REFERENCE_FAKE";

/// Ordered header → raw value mapping for one data line.
///
/// Header names are stored upper-cased and trimmed so lookups are
/// case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number in the source file.
    pub line: u64,
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new(line: u64) -> Self {
        Self {
            line,
            fields: Vec::new(),
        }
    }

    pub fn push(&mut self, header: &str, value: impl Into<String>) {
        self.fields
            .push((header.trim().to_ascii_uppercase(), value.into()));
    }

    /// Raw value for `header`, if the column exists.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h.eq_ignore_ascii_case(header))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Parent entity, one per unique `job_reference`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingAggregate {
    pub job_reference: String,
    pub carrier_code: Option<String>,
    pub carrier_name: Option<String>,
    pub load_port: Option<String>,
    pub load_country: Option<String>,
    pub discharge_port: Option<String>,
    pub discharge_country: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub confirmation_date: Option<String>,
    pub cancellation_date: Option<String>,
    pub status_code: Option<String>,
}

/// Child entity keyed by `(job_reference, sequence_number)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailSequence {
    pub job_reference: String,
    pub sequence_number: i64,
    pub nb_teu: f64,
    pub nb_units: f64,
    pub net_weight: Option<f64>,
    pub commodity_code: Option<String>,
    pub commodity_description: Option<String>,
    pub haz_flag: bool,
    pub reefer_flag: bool,
    pub oog_flag: bool,
    pub package_code: Option<String>,
}

/// The two persisted collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Bookings,
    DetailSequences,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Bookings => "bookings",
            Collection::DetailSequences => "detail_sequences",
        }
    }

    /// Columns used for upsert conflict resolution.
    pub fn conflict_keys(&self) -> &'static [&'static str] {
        match self {
            Collection::Bookings => &["job_reference"],
            Collection::DetailSequences => &["job_reference", "sequence_number"],
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
