//! Entity builder: raw rows → bookings and detail sequences.
//!
//! Single pass over the row stream. The first row seen for a job reference
//! defines the booking; later rows with the same key only contribute detail
//! sequences. Rows without a job reference are rejected outright.

use std::collections::{HashMap, HashSet};

use crate::error::RowError;
use crate::models::{BookingAggregate, DetailSequence, RawRow, JOB_REFERENCE};
use crate::normalize;

/// Source column names understood by the builder.
pub mod columns {
    pub use crate::models::JOB_REFERENCE;
    pub const CARRIER_CODE: &str = "CARRIER_CODE";
    pub const CARRIER_NAME: &str = "CARRIER_NAME";
    pub const LOAD_PORT: &str = "POL_CODE";
    pub const LOAD_COUNTRY: &str = "POL_COUNTRY";
    pub const DISCHARGE_PORT: &str = "POD_CODE";
    pub const DISCHARGE_COUNTRY: &str = "POD_COUNTRY";
    pub const ORIGIN: &str = "ORIGIN";
    pub const DESTINATION: &str = "DESTINATION";
    pub const CONFIRMATION_DATE: &str = "CONFIRMATION_DATE";
    pub const CANCELLATION_DATE: &str = "CANCELLATION_DATE";
    pub const STATUS_CODE: &str = "JOB_STATUS";
    pub const SEQUENCE: &str = "JOB_DTL_SEQUENCE";
    pub const NB_TEU: &str = "NB_TEU";
    pub const NB_UNITS: &str = "NB_UNITS";
    pub const NET_WEIGHT: &str = "NET_WEIGHT";
    pub const COMMODITY_CODE: &str = "COMMODITY_CODE";
    pub const COMMODITY_DESCRIPTION: &str = "COMMODITY_DESCRIPTION";
    pub const HAZ_FLAG: &str = "HAZ_FLAG";
    pub const REEFER_FLAG: &str = "REEFER_FLAG";
    pub const OOG_FLAG: &str = "OOG_FLAG";
    pub const PACKAGE_CODE: &str = "PACKAGE_CODE";
}

/// Everything the builder produced for one source.
#[derive(Debug, Default)]
pub struct BuildOutput {
    /// Bookings in first-seen order.
    pub bookings: Vec<BookingAggregate>,
    pub details: Vec<DetailSequence>,
    pub rows_read: u64,
    pub rejected: u64,
    /// Details dropped because their `(job_reference, sequence_number)`
    /// had already been seen.
    pub duplicate_details: u64,
    /// Optional numeric fields present but unparseable.
    pub coercion_fallbacks: u64,
    /// First row errors, capped by the builder's error limit.
    pub errors: Vec<String>,
    index: HashMap<String, usize>,
}

impl BuildOutput {
    pub fn booking(&self, job_reference: &str) -> Option<&BookingAggregate> {
        self.index.get(job_reference).map(|&i| &self.bookings[i])
    }

    pub fn details_for<'a>(
        &'a self,
        job_reference: &'a str,
    ) -> impl Iterator<Item = &'a DetailSequence> + 'a {
        self.details
            .iter()
            .filter(move |d| d.job_reference == job_reference)
    }
}

pub struct EntityBuilder {
    out: BuildOutput,
    seen_details: HashSet<(String, i64)>,
    max_errors: usize,
}

impl EntityBuilder {
    pub fn new(max_errors: usize) -> Self {
        Self {
            out: BuildOutput::default(),
            seen_details: HashSet::new(),
            max_errors,
        }
    }

    /// Feed one tokenized row, or the error that replaced it.
    pub fn accept(&mut self, row: Result<RawRow, RowError>) {
        match row {
            Ok(row) => self.push(row),
            Err(e) => self.reject(e),
        }
    }

    pub fn push(&mut self, row: RawRow) {
        let job_reference = match normalize::text(row.get(JOB_REFERENCE)) {
            Some(key) => key,
            None => {
                self.reject(RowError::MissingJobReference { line: row.line });
                return;
            }
        };
        self.out.rows_read += 1;

        if !self.out.index.contains_key(&job_reference) {
            let booking = booking_from_row(&job_reference, &row);
            self.out
                .index
                .insert(job_reference.clone(), self.out.bookings.len());
            self.out.bookings.push(booking);
        }

        let Some(sequence_number) = normalize::sequence_number(row.get(columns::SEQUENCE)) else {
            return;
        };
        if !self
            .seen_details
            .insert((job_reference.clone(), sequence_number))
        {
            self.out.duplicate_details += 1;
            return;
        }
        let detail = self.detail_from_row(job_reference, sequence_number, &row);
        self.out.details.push(detail);
    }

    pub fn reject(&mut self, err: RowError) {
        self.out.rows_read += 1;
        self.out.rejected += 1;
        if self.out.errors.len() < self.max_errors {
            self.out.errors.push(err.to_string());
        }
    }

    pub fn finish(self) -> BuildOutput {
        self.out
    }

    fn detail_from_row(
        &mut self,
        job_reference: String,
        sequence_number: i64,
        row: &RawRow,
    ) -> DetailSequence {
        let nb_teu = normalize::decimal_or(row.get(columns::NB_TEU), 0.0);
        let nb_units = normalize::decimal_or(row.get(columns::NB_UNITS), 0.0);
        let net_weight = normalize::decimal(row.get(columns::NET_WEIGHT));
        self.out.coercion_fallbacks += [nb_teu.fell_back, nb_units.fell_back, net_weight.fell_back]
            .iter()
            .filter(|&&f| f)
            .count() as u64;

        DetailSequence {
            job_reference,
            sequence_number,
            nb_teu: nb_teu.value,
            nb_units: nb_units.value,
            net_weight: net_weight.value,
            commodity_code: normalize::text(row.get(columns::COMMODITY_CODE)),
            commodity_description: normalize::text(row.get(columns::COMMODITY_DESCRIPTION)),
            haz_flag: normalize::flag(row.get(columns::HAZ_FLAG)),
            reefer_flag: normalize::flag(row.get(columns::REEFER_FLAG)),
            oog_flag: normalize::flag(row.get(columns::OOG_FLAG)),
            package_code: normalize::text(row.get(columns::PACKAGE_CODE)),
        }
    }
}

fn booking_from_row(job_reference: &str, row: &RawRow) -> BookingAggregate {
    BookingAggregate {
        job_reference: job_reference.to_string(),
        carrier_code: normalize::text(row.get(columns::CARRIER_CODE)),
        carrier_name: normalize::text(row.get(columns::CARRIER_NAME)),
        load_port: normalize::text(row.get(columns::LOAD_PORT)),
        load_country: normalize::text(row.get(columns::LOAD_COUNTRY)),
        discharge_port: normalize::text(row.get(columns::DISCHARGE_PORT)),
        discharge_country: normalize::text(row.get(columns::DISCHARGE_COUNTRY)),
        origin: normalize::text(row.get(columns::ORIGIN)),
        destination: normalize::text(row.get(columns::DESTINATION)),
        confirmation_date: normalize::date(row.get(columns::CONFIRMATION_DATE)),
        cancellation_date: normalize::date(row.get(columns::CANCELLATION_DATE)),
        status_code: normalize::text(row.get(columns::STATUS_CODE)),
    }
}

/// Build entities from a row stream in one pass.
pub fn build<I>(rows: I, max_errors: usize) -> BuildOutput
where
    I: IntoIterator<Item = Result<RawRow, RowError>>,
{
    let mut builder = EntityBuilder::new(max_errors);
    for row in rows {
        builder.accept(row);
    }
    builder.finish()
}
