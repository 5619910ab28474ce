//! # Bookings Ingest
//!
//! Bulk ingestion of shipping booking extracts into a relational store.
//!
//! Each source line carries one booking detail together with a copy of its
//! booking's attributes. The pipeline folds those lines into two linked
//! collections, `bookings` and `detail_sequences`, and upserts them in
//! chunks so re-running on the same input converges to the same state.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────────┐   ┌─────────┐
//! │  source  │──▶│ tokenize  │──▶│ builder  │──▶│    loader    │──▶│  store  │
//! │ csv/jsonl│   │ normalize │   │ dedup    │   │ bookings then│   │ sqlite/ │
//! └──────────┘   └───────────┘   └──────────┘   │ details      │   │ postgrest│
//!                                               └──────────────┘   └─────────┘
//! ```
//!
//! The [`pipeline`] coordinator runs that chain once per source file.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML tuning knobs and environment credentials |
//! | [`error`] | Row, store and run error types |
//! | [`models`] | Raw rows and the two persisted entities |
//! | [`tokenize`] | Quote-aware line splitting |
//! | [`normalize`] | Field coercion (text, dates, flags, decimals) |
//! | [`source`] | Delimited and JSON-lines record readers |
//! | [`discover`] | Source file enumeration |
//! | [`builder`] | Row → booking/detail folding with first-wins dedup |
//! | [`loader`] | Two-phase chunked upsert with retries |
//! | [`pipeline`] | Per-file and per-run coordination and reports |
//! | [`store`] | `Store` trait with SQLite, PostgREST and in-memory backends |
//! | [`migrate`] | Versioned schema migrations |
//! | [`progress`] | Progress reporting |
//! | [`stats`] | Row counts per collection |

pub mod builder;
pub mod config;
pub mod discover;
pub mod error;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod stats;
pub mod store;
pub mod tokenize;
