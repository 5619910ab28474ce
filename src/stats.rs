//! Row counts per collection.
//!
//! Used by `bookings-ingest stats` to confirm that a run landed what the
//! summary said it did.

use anyhow::Result;

use crate::models::Collection;
use crate::progress::format_number;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub bookings: u64,
    pub details: u64,
}

impl StoreStats {
    /// Average detail rows per booking, `0.0` for an empty store.
    pub fn details_per_booking(&self) -> f64 {
        if self.bookings == 0 {
            0.0
        } else {
            self.details as f64 / self.bookings as f64
        }
    }
}

pub async fn collect(store: &dyn Store) -> Result<StoreStats> {
    Ok(StoreStats {
        bookings: store.count(Collection::Bookings).await?,
        details: store.count(Collection::DetailSequences).await?,
    })
}

/// Run the stats command: count both collections and print a summary.
pub async fn run_stats(store: &dyn Store, backend: &str) -> Result<()> {
    let stats = collect(store).await?;

    println!("Bookings store ({})", backend);
    println!();
    println!("  {:<18} {:>12}", Collection::Bookings.name(), format_number(stats.bookings));
    println!(
        "  {:<18} {:>12}",
        Collection::DetailSequences.name(),
        format_number(stats.details)
    );
    println!("  {:<18} {:>12.2}", "details/booking", stats.details_per_booking());
    println!();

    Ok(())
}
